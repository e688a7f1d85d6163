//! End-to-end watch sessions driven through the key and file-change channels

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use runx_watch::config::RunSettings;
use runx_watch::render::{Line, SharedBuffer};
use runx_watch::results::{TestCase, TestCaseResult};
use runx_watch::search::TestIndex;
use runx_watch::{
    AggregatedResult, HeadlessRenderer, Key, LineRenderer, Mode, OutputSink, RunConfig,
    RunCoordinator, RunRequest, SearchResult, SearchSource, TestFile, TestFileResult, TestStatus,
    WatchController, WatchOptions,
};

/// Headless renderer the test can read while the controller owns it
#[derive(Clone)]
struct SharedRenderer(Arc<Mutex<HeadlessRenderer>>);

impl SharedRenderer {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(HeadlessRenderer::new(80))))
    }

    fn screen_text(&self) -> Vec<String> {
        self.0.lock().unwrap().screen_text()
    }
}

impl LineRenderer for SharedRenderer {
    fn columns(&self) -> usize {
        self.0.lock().unwrap().columns()
    }

    fn clear(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().clear()
    }

    fn write_lines(&mut self, lines: &[Line]) -> io::Result<()> {
        self.0.lock().unwrap().write_lines(lines)
    }

    fn place_cursor(&mut self, row: usize, column: usize) -> io::Result<()> {
        self.0.lock().unwrap().place_cursor(row, column)
    }
}

#[derive(Default)]
struct RebuildLog {
    count: usize,
    held: bool,
    pending: Vec<oneshot::Sender<()>>,
}

/// Counts rebuilds; while held, they finish only when released
#[derive(Clone, Default)]
struct Rebuilds(Arc<Mutex<RebuildLog>>);

impl Rebuilds {
    fn count(&self) -> usize {
        self.0.lock().unwrap().count
    }

    fn hold(&self) {
        self.0.lock().unwrap().held = true;
    }

    fn release(&self) {
        for tx in self.0.lock().unwrap().pending.drain(..) {
            let _ = tx.send(());
        }
    }
}

struct FakeSearch {
    index: TestIndex,
    rebuilds: Rebuilds,
}

impl SearchSource for FakeSearch {
    fn find_matching_tests(&self, pattern: &str) -> SearchResult {
        self.index.find_matching(pattern)
    }

    fn find_related_tests(&self, changed: &[PathBuf]) -> SearchResult {
        let changed: Vec<String> = changed
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        self.index.find_related(&changed)
    }

    fn all_tests(&self) -> SearchResult {
        SearchResult {
            paths: self.index.paths(),
        }
    }

    fn test_file(&self, path: &str) -> Option<TestFile> {
        self.index.get(path)
    }

    fn rebuild(&self) -> BoxFuture<'static, Result<TestIndex>> {
        let index = self.index.clone();
        let mut log = self.rebuilds.0.lock().unwrap();
        log.count += 1;

        if !log.held {
            return futures::future::ok(index).boxed();
        }

        let (tx, rx) = oneshot::channel();
        log.pending.push(tx);
        async move {
            rx.await.map_err(|_| anyhow::anyhow!("rebuild abandoned"))?;
            Ok(index)
        }
        .boxed()
    }

    fn install(&mut self, index: TestIndex) {
        self.index = index;
    }
}

#[derive(Default)]
struct RunLog {
    requests: Vec<RunRequest>,
    pending: Vec<oneshot::Sender<Result<AggregatedResult>>>,
}

/// Coordinator whose runs settle only when the test says so
#[derive(Clone, Default)]
struct ManualRuns(Arc<Mutex<RunLog>>);

impl ManualRuns {
    fn count(&self) -> usize {
        self.0.lock().unwrap().requests.len()
    }

    fn request(&self, index: usize) -> RunRequest {
        self.0.lock().unwrap().requests[index].clone()
    }

    fn settle(&self, result: Result<AggregatedResult>) {
        let tx = self.0.lock().unwrap().pending.remove(0);
        let _ = tx.send(result);
    }
}

impl RunCoordinator for ManualRuns {
    fn run(&mut self, request: RunRequest) -> BoxFuture<'static, Result<AggregatedResult>> {
        let (tx, rx) = oneshot::channel();
        let mut log = self.0.lock().unwrap();
        log.requests.push(request);
        log.pending.push(tx);

        async move {
            rx.await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("run abandoned")))
        }
        .boxed()
    }
}

struct Session {
    controller: WatchController<SharedRenderer, ManualRuns, FakeSearch>,
    runs: ManualRuns,
    rebuilds: Rebuilds,
    renderer: SharedRenderer,
    output: SharedBuffer,
}

fn session(options: WatchOptions) -> Session {
    let mut index = TestIndex::new();
    index.insert("src/math.rs", "math::tests::adds");
    index.insert("src/math.rs", "math::tests::subtracts");
    index.insert("src/parser/mod.rs", "parser::tests::parses");

    let runs = ManualRuns::default();
    let rebuilds = Rebuilds::default();
    let renderer = SharedRenderer::new();
    let output = SharedBuffer::new();

    let controller = WatchController::new(
        renderer.clone(),
        runs.clone(),
        FakeSearch {
            index,
            rebuilds: rebuilds.clone(),
        },
        RunConfig::new(".", &RunSettings::default()),
        OutputSink::new(output.clone()),
        options,
    );

    Session {
        controller,
        runs,
        rebuilds,
        renderer,
        output,
    }
}

fn results_for(files: &[(&str, &[&str])]) -> AggregatedResult {
    let mut aggregated = AggregatedResult::new(files.len());
    for (path, names) in files {
        let mut file = TestFileResult::new(*path);
        for name in names.iter() {
            let case = TestCase::from_name(name);
            file.push(TestCaseResult {
                full_name: case.full_name,
                title: case.title,
                status: TestStatus::Passed,
                duration_ms: Some(1),
                failure_messages: Vec::new(),
            });
        }
        aggregated.add_file_result(file);
    }
    aggregated
}

/// Let the controller drain everything that is ready
async fn idle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

async fn send_text(keys: &mpsc::Sender<Key>, text: &str) {
    for c in text.chars() {
        keys.send(Key::Char(c)).await.unwrap();
    }
}

#[tokio::test]
async fn test_keys_during_run_never_start_a_second_run() {
    let Session {
        mut controller,
        runs,
        ..
    } = session(WatchOptions {
        mode: Mode::WatchAll,
        ..WatchOptions::default()
    });
    let (key_tx, key_rx) = mpsc::channel(16);
    let (_change_tx, change_rx) = mpsc::channel(16);

    let script = async {
        idle().await;
        assert_eq!(runs.count(), 1);
        assert_eq!(runs.request(0).context.test_files.len(), 2);

        // Not an abort key: the start request is dropped
        key_tx.send(Key::Char('u')).await.unwrap();
        idle().await;
        assert_eq!(runs.count(), 1);

        // Abort key: only the active token is touched
        let first_token = runs.request(0).token;
        key_tx.send(Key::Enter).await.unwrap();
        idle().await;
        assert!(first_token.is_interrupted());
        assert_eq!(runs.count(), 1);

        runs.settle(Ok(results_for(&[("src/math.rs", &["math::tests::adds"])])));
        idle().await;

        key_tx.send(Key::Enter).await.unwrap();
        idle().await;
        assert_eq!(runs.count(), 2);

        // The first run's token is stale and cannot reach the new run
        let second_token = runs.request(1).token;
        first_token.interrupt();
        assert!(!second_token.is_interrupted());
        assert!(!second_token.same_token(&first_token));

        // Force quit while the second run is still active
        key_tx.send(Key::Interrupt).await.unwrap();
    };

    let (result, ()) = tokio::join!(controller.watch(key_rx, change_rx), script);
    result.unwrap();
    assert!(controller.state().running);
}

#[tokio::test]
async fn test_pattern_prompt_flow() {
    let Session {
        mut controller,
        runs,
        renderer,
        ..
    } = session(WatchOptions::default());
    let (key_tx, key_rx) = mpsc::channel(64);
    let (_change_tx, change_rx) = mpsc::channel(16);

    let script = async {
        idle().await;
        runs.settle(Ok(results_for(&[(
            "src/math.rs",
            &["math::tests::adds", "math::tests::subtracts"],
        )])));
        idle().await;
        assert!(renderer.screen_text().contains(&"Watch Usage".to_string()));

        key_tx.send(Key::Char('p')).await.unwrap();
        send_text(&key_tx, "add").await;
        idle().await;
        let screen = renderer.screen_text();
        assert_eq!(screen[4], " pattern › add");
        assert_eq!(screen[6], " Pattern matches 1 test from cached test files");
        assert_eq!(screen[7], "  › math::tests::adds");

        // Escape discards the buffer and shows the usage banner again
        key_tx.send(Key::Escape).await.unwrap();
        idle().await;
        assert_eq!(renderer.screen_text().last().unwrap(), " › Press Enter to trigger a test run.");
        assert_eq!(runs.count(), 1);

        key_tx.send(Key::Char('p')).await.unwrap();
        send_text(&key_tx, "subx").await;
        key_tx.send(Key::Backspace).await.unwrap();
        key_tx.send(Key::Left).await.unwrap();
        key_tx.send(Key::Enter).await.unwrap();
        idle().await;

        assert_eq!(runs.count(), 2);
        let request = runs.request(1);
        assert_eq!(request.config.test_name_pattern.as_deref(), Some("sub"));
        let paths: Vec<&str> = request
            .context
            .test_files
            .iter()
            .map(|file| file.path.as_str())
            .collect();
        assert_eq!(paths, vec!["src/math.rs"]);

        runs.settle(Ok(results_for(&[(
            "src/math.rs",
            &["math::tests::subtracts"],
        )])));
        idle().await;
        assert!(renderer.screen_text().contains(&" Active Filters: test name /sub/".to_string()));

        key_tx.send(Key::Char('q')).await.unwrap();
    };

    let (result, ()) = tokio::join!(controller.watch(key_rx, change_rx), script);
    result.unwrap();

    assert_eq!(controller.state().pattern.as_deref(), Some("sub"));
    assert_eq!(controller.prompt().cached_records()[0].titles.len(), 1);
}

#[tokio::test]
async fn test_escape_restores_committed_pattern() {
    let Session {
        mut controller,
        runs,
        ..
    } = session(WatchOptions {
        pattern: Some("parses".to_string()),
        ..WatchOptions::default()
    });
    let (key_tx, key_rx) = mpsc::channel(64);
    let (_change_tx, change_rx) = mpsc::channel(16);

    let script = async {
        idle().await;
        runs.settle(Ok(results_for(&[("src/parser/mod.rs", &["parser::tests::parses"])])));
        idle().await;

        key_tx.send(Key::Char('p')).await.unwrap();
        send_text(&key_tx, "adds").await;
        key_tx.send(Key::Escape).await.unwrap();
        key_tx.send(Key::Enter).await.unwrap();
        idle().await;

        assert_eq!(
            runs.request(1).config.test_name_pattern.as_deref(),
            Some("parses")
        );
        key_tx.send(Key::Interrupt).await.unwrap();
    };

    let (result, ()) = tokio::join!(controller.watch(key_rx, change_rx), script);
    result.unwrap();
    assert_eq!(controller.state().pattern.as_deref(), Some("parses"));
}

#[tokio::test]
async fn test_file_changes_rebuild_and_run_related_tests() {
    let Session {
        mut controller,
        runs,
        rebuilds,
        ..
    } = session(WatchOptions::default());
    let (key_tx, key_rx) = mpsc::channel(64);
    let (change_tx, change_rx) = mpsc::channel(16);

    let script = async {
        idle().await;
        // Nothing changed yet, so nothing is related
        assert!(runs.request(0).context.test_files.is_empty());
        runs.settle(Ok(results_for(&[])));
        idle().await;

        // A change arrives while typing a pattern
        key_tx.send(Key::Char('p')).await.unwrap();
        send_text(&key_tx, "ad").await;
        idle().await;
        change_tx
            .send(vec![PathBuf::from("src/parser/mod.rs")])
            .await
            .unwrap();
        idle().await;

        assert_eq!(runs.count(), 2);
        let request = runs.request(1);
        assert_eq!(request.context.test_files[0].path, "src/parser/mod.rs");
        assert_eq!(
            request.context.changed_files,
            vec![PathBuf::from("src/parser/mod.rs")]
        );

        // Changes during a run are kept for the next one
        change_tx
            .send(vec![PathBuf::from("src/math.rs")])
            .await
            .unwrap();
        idle().await;
        assert_eq!(runs.count(), 2);

        runs.settle(Ok(results_for(&[("src/parser/mod.rs", &["parser::tests::parses"])])));
        idle().await;
        key_tx.send(Key::Enter).await.unwrap();
        idle().await;

        assert_eq!(runs.count(), 3);
        let request = runs.request(2);
        assert_eq!(request.context.changed_files, vec![PathBuf::from("src/math.rs")]);
        assert_eq!(request.context.test_files[0].path, "src/math.rs");

        key_tx.send(Key::EndOfInput).await.unwrap();
    };

    let (result, ()) = tokio::join!(controller.watch(key_rx, change_rx), script);
    result.unwrap();

    assert!(!controller.state().entering_pattern);
    assert!(controller.state().buffer.is_empty());
    // Initial build plus one per change notification
    assert_eq!(rebuilds.count(), 3);
}

#[tokio::test]
async fn test_keys_handled_while_index_rebuilds() {
    let Session {
        mut controller,
        runs,
        rebuilds,
        ..
    } = session(WatchOptions {
        mode: Mode::WatchAll,
        ..WatchOptions::default()
    });
    let (key_tx, key_rx) = mpsc::channel(64);
    let (change_tx, change_rx) = mpsc::channel(16);
    rebuilds.hold();

    let script = async {
        idle().await;
        // The first run waits for the index
        assert_eq!(rebuilds.count(), 1);
        assert_eq!(runs.count(), 0);

        key_tx.send(Key::Char('a')).await.unwrap();
        idle().await;
        rebuilds.release();
        idle().await;

        // It starts once indexed, already interrupted
        assert_eq!(runs.count(), 1);
        assert!(runs.request(0).token.is_interrupted());
        assert_eq!(runs.request(0).context.test_files.len(), 2);
        runs.settle(Ok(results_for(&[])));
        idle().await;

        // Force quit does not wait for a pending rebuild
        change_tx
            .send(vec![PathBuf::from("src/math.rs")])
            .await
            .unwrap();
        idle().await;
        assert_eq!(rebuilds.count(), 2);
        key_tx.send(Key::Interrupt).await.unwrap();
    };

    let (result, ()) = tokio::join!(controller.watch(key_rx, change_rx), script);
    result.unwrap();
    assert_eq!(runs.count(), 1);
    assert!(controller.state().running);
}

#[tokio::test]
async fn test_failed_run_is_reported_and_cleaned_up() {
    let Session {
        mut controller,
        runs,
        output,
        ..
    } = session(WatchOptions::default());
    let (key_tx, key_rx) = mpsc::channel(16);
    let (_change_tx, change_rx) = mpsc::channel(16);

    let script = async {
        idle().await;
        let first_token = runs.request(0).token;
        runs.settle(Err(anyhow::anyhow!("reporter hook failed")));
        idle().await;

        assert!(output.contents().contains("reporter hook failed"));

        // Cleanup ran: a new run can start with a fresh token
        key_tx.send(Key::Enter).await.unwrap();
        idle().await;
        assert_eq!(runs.count(), 2);
        assert!(!runs.request(1).token.same_token(&first_token));

        runs.settle(Ok(results_for(&[])));
        idle().await;
        key_tx.send(Key::Char('q')).await.unwrap();
    };

    let (result, ()) = tokio::join!(controller.watch(key_rx, change_rx), script);
    result.unwrap();
    assert!(!controller.state().running);
}
