//! `cargo test` run coordinator
//!
//! Runs one `cargo test` invocation per test file, restricted to that file's
//! tests, and streams the parsed results through the reporter dispatcher.

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{LibtestParser, RunCoordinator, RunRequest};
use crate::config::RunConfig;
use crate::prompt::compile_pattern;
use crate::reporter::{ReporterDispatcher, RunStartOptions};
use crate::results::{AggregatedResult, TestCase, TestFile, TestFileResult};

pub const NO_TESTS_MESSAGE: &str = "No tests found related to files changed since last run.";

/// Lines of stderr kept when a file fails without running any test
const STDERR_TAIL_LINES: usize = 20;

/// Coordinator that shells out to `cargo test`
pub struct CargoRunCoordinator {
    dispatcher: Arc<ReporterDispatcher>,
}

impl CargoRunCoordinator {
    pub fn new(dispatcher: ReporterDispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn dispatcher(&self) -> &ReporterDispatcher {
        &self.dispatcher
    }
}

impl RunCoordinator for CargoRunCoordinator {
    fn run(&mut self, request: RunRequest) -> BoxFuture<'static, Result<AggregatedResult>> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let config = Arc::clone(&request.config);
        let args = request.args.clone();

        async move {
            drive_run(&dispatcher, request, move |test| {
                run_test_file(Arc::clone(&config), args.clone(), test)
            })
            .await
        }
        .boxed()
    }
}

/// Run every file of the request in order, reporting as results arrive
///
/// The token is checked before each file; once it is interrupted no further
/// file starts and the aggregated result is marked interrupted. A file that
/// is already running is allowed to finish.
pub async fn drive_run<F, Fut>(
    dispatcher: &ReporterDispatcher,
    request: RunRequest,
    mut run_file: F,
) -> Result<AggregatedResult>
where
    F: FnMut(TestFile) -> Fut,
    Fut: Future<Output = Result<TestFileResult>>,
{
    let RunRequest {
        context,
        config,
        sink,
        token,
        ..
    } = request;

    let mut aggregated = AggregatedResult::new(context.test_files.len());

    if context.test_files.is_empty() {
        sink.write_line(NO_TESTS_MESSAGE)?;
    }

    let options = RunStartOptions {
        estimated_time_ms: None,
        show_status: !context.test_files.is_empty(),
    };
    dispatcher.on_run_start(&aggregated, &options).await?;

    for test in &context.test_files {
        if token.is_interrupted() {
            tracing::debug!("Run interrupted before {}", test.path);
            aggregated.mark_interrupted();
            break;
        }

        dispatcher.on_test_file_start(test).await?;

        let mut result = run_file(test.clone()).await?;

        for case_result in &result.test_results {
            let test_case = TestCase::from_name(&case_result.full_name);
            dispatcher
                .on_test_case_result(test, &test_case, case_result)
                .await?;
        }

        dispatcher
            .on_test_file_result(test, &mut result, &aggregated)
            .await?;
        aggregated.add_file_result(result);
    }

    if config.update_snapshots && !aggregated.interrupted && !aggregated.snapshot.failure {
        aggregated.snapshot.updated = true;
    }

    dispatcher
        .on_run_complete(std::slice::from_ref(&context), &aggregated)
        .await?;

    Ok(aggregated)
}

/// Test names to pass as filters for `test`
///
/// With a name pattern only the matching tests are selected; when nothing in
/// the file matches (the file matched by path) every test runs.
pub fn select_tests(test: &TestFile, test_name_pattern: Option<&str>) -> Vec<String> {
    if let Some(regex) = test_name_pattern.and_then(compile_pattern) {
        let selected: Vec<String> = test
            .titles
            .iter()
            .filter(|name| regex.is_match(name))
            .cloned()
            .collect();
        if !selected.is_empty() {
            return selected;
        }
    }
    test.titles.clone()
}

fn stderr_tail(lines: &[String], count: usize) -> String {
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Run the tests of one file through `cargo test` and collect its result
async fn run_test_file(
    config: Arc<RunConfig>,
    args: Vec<String>,
    test: TestFile,
) -> Result<TestFileResult> {
    let start = Instant::now();
    let filters = select_tests(&test, config.test_name_pattern.as_deref());

    let mut cmd = Command::new("cargo");
    cmd.arg("test")
        .args(&config.cargo_args)
        .args(&args)
        .arg("--")
        .arg("--exact")
        .arg(format!("--test-threads={}", config.test_threads))
        .args(&filters)
        .current_dir(&config.project_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if config.update_snapshots {
        cmd.env("INSTA_UPDATE", "always");
    }

    tracing::debug!("Running {} test(s) from {}", filters.len(), test.path);

    let mut child = cmd.spawn().context("Failed to spawn cargo test")?;
    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    // Compiler output goes to stderr; drain it alongside stdout
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            collected.push(line);
        }
        collected
    });

    let mut parser = LibtestParser::new();
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read cargo test output")?
    {
        parser.push_line(line);
    }

    let status = child.wait().await.context("Failed to wait for cargo test")?;
    let stderr_lines = stderr_task.await.unwrap_or_default();

    let mut result = parser.finish(&test.path);
    result.duration_ms = start.elapsed().as_millis() as u64;

    if !status.success() && result.test_results.is_empty() {
        result.failure_message = Some(stderr_tail(&stderr_lines, STDERR_TAIL_LINES));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::config::{RunOverrides, RunSettings};
    use crate::coordinator::RunContext;
    use crate::render::{OutputSink, SharedBuffer};
    use crate::reporter::{completed, HookFuture, Reporter};
    use crate::results::{TestCaseResult, TestStatus};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<String>>>);

    impl EventLog {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Recorder(EventLog);

    impl Reporter for Recorder {
        fn on_run_start<'a>(
            &'a self,
            results: &'a AggregatedResult,
            _options: &'a RunStartOptions,
        ) -> Option<HookFuture<'a>> {
            self.0.push(format!("run_start:{}", results.num_total_test_files));
            completed()
        }

        fn on_test_file_start<'a>(&'a self, test: &'a TestFile) -> Option<HookFuture<'a>> {
            self.0.push(format!("file_start:{}", test.path));
            completed()
        }

        fn on_test_case_result<'a>(
            &'a self,
            _test: &'a TestFile,
            test_case: &'a TestCase,
            result: &'a TestCaseResult,
        ) -> Option<HookFuture<'a>> {
            self.0
                .push(format!("case:{}:{:?}", test_case.title, result.status));
            completed()
        }

        fn on_test_file_result<'a>(
            &'a self,
            test: &'a TestFile,
            result: &'a TestFileResult,
            _aggregated: &'a AggregatedResult,
        ) -> Option<HookFuture<'a>> {
            self.0.push(format!(
                "file_result:{}:console={}",
                test.path,
                result.console.is_some()
            ));
            completed()
        }

        fn on_run_complete<'a>(
            &'a self,
            contexts: &'a [RunContext],
            results: &'a AggregatedResult,
        ) -> Option<HookFuture<'a>> {
            self.0.push(format!(
                "run_complete:{}:{}",
                contexts.len(),
                results.num_total_tests
            ));
            completed()
        }
    }

    fn request(paths: &[&str], token: CancelToken) -> (RunRequest, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let config = RunConfig::new(".", &RunSettings::default());
        let request = RunRequest {
            context: RunContext {
                test_files: paths
                    .iter()
                    .map(|path| TestFile::new(*path, vec![format!("{}::works", path)]))
                    .collect(),
                changed_files: Vec::new(),
            },
            config: config.merged(&RunOverrides::default()),
            args: Vec::new(),
            sink: OutputSink::new(buffer.clone()),
            token,
        };
        (request, buffer)
    }

    fn passing_result(test: &TestFile) -> TestFileResult {
        let mut result = TestFileResult::new(test.path.clone());
        let test_case = TestCase::from_name(&test.titles[0]);
        result.push(TestCaseResult {
            full_name: test_case.full_name,
            title: test_case.title,
            status: TestStatus::Passed,
            duration_ms: Some(1),
            failure_messages: Vec::new(),
        });
        result.console = Some(vec!["running 1 test".to_string()]);
        result
    }

    #[tokio::test]
    async fn test_drive_run_hook_order() {
        let log = EventLog::default();
        let mut dispatcher = ReporterDispatcher::new();
        dispatcher.register(Box::new(Recorder(log.clone())));

        let (request, _buffer) = request(&["src/a.rs", "src/b.rs"], CancelToken::new());
        let aggregated = drive_run(&dispatcher, request, |test| async move {
            Ok(passing_result(&test))
        })
        .await
        .unwrap();

        assert_eq!(
            log.events(),
            vec![
                "run_start:2",
                "file_start:src/a.rs",
                "case:works:Passed",
                "file_result:src/a.rs:console=true",
                "file_start:src/b.rs",
                "case:works:Passed",
                "file_result:src/b.rs:console=true",
                "run_complete:1:2",
            ]
        );
        assert!(aggregated.success);
        assert_eq!(aggregated.num_passed_test_files, 2);
        // Heavy fields are gone once reporters have seen the result
        assert!(aggregated.test_results.iter().all(|r| r.console.is_none()));
    }

    #[tokio::test]
    async fn test_drive_run_stops_after_interrupt() {
        let token = CancelToken::new();
        let dispatcher = ReporterDispatcher::new();
        let (request, _buffer) = request(&["src/a.rs", "src/b.rs", "src/c.rs"], token.clone());

        let mut started = Vec::new();
        let aggregated = drive_run(&dispatcher, request, |test| {
            started.push(test.path.clone());
            // Interrupt while the first file is running
            token.interrupt();
            async move { Ok(passing_result(&test)) }
        })
        .await
        .unwrap();

        assert_eq!(started, vec!["src/a.rs"]);
        assert!(aggregated.interrupted);
        assert!(!aggregated.success);
        assert_eq!(aggregated.test_results.len(), 1);
    }

    #[tokio::test]
    async fn test_drive_run_empty_context_prints_message() {
        let log = EventLog::default();
        let mut dispatcher = ReporterDispatcher::new();
        dispatcher.register(Box::new(Recorder(log.clone())));

        let (request, buffer) = request(&[], CancelToken::new());
        let aggregated = drive_run(&dispatcher, request, |test| async move {
            Ok(passing_result(&test))
        })
        .await
        .unwrap();

        assert!(buffer.contents().contains(NO_TESTS_MESSAGE));
        assert_eq!(log.events(), vec!["run_start:0", "run_complete:1:0"]);
        assert!(aggregated.success);
    }

    #[tokio::test]
    async fn test_drive_run_propagates_file_errors() {
        let dispatcher = ReporterDispatcher::new();
        let (request, _buffer) = request(&["src/a.rs"], CancelToken::new());

        let result = drive_run(&dispatcher, request, |_test| async {
            Err::<TestFileResult, _>(anyhow::anyhow!("cargo not found"))
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "cargo not found");
    }

    #[tokio::test]
    async fn test_drive_run_marks_snapshots_updated() {
        let dispatcher = ReporterDispatcher::new();
        let (mut request, _buffer) = request(&["src/a.rs"], CancelToken::new());
        request.config = request.config.merged(&RunOverrides::update_snapshots());

        let aggregated = drive_run(&dispatcher, request, |test| async move {
            Ok(passing_result(&test))
        })
        .await
        .unwrap();

        assert!(aggregated.snapshot.updated);
    }

    #[test]
    fn test_select_tests() {
        let test = TestFile::new(
            "src/math.rs",
            vec![
                "math::tests::adds".to_string(),
                "math::tests::subtracts".to_string(),
            ],
        );

        assert_eq!(select_tests(&test, None).len(), 2);
        assert_eq!(select_tests(&test, Some("ADDS")), vec!["math::tests::adds"]);
        // The file matched by path only: run everything
        assert_eq!(select_tests(&test, Some("math.rs")).len(), 2);
        assert_eq!(select_tests(&test, Some("(bad")).len(), 2);
    }

    #[test]
    fn test_stderr_tail() {
        let lines: Vec<String> = (0..5).map(|i| format!("line {}", i)).collect();
        assert_eq!(stderr_tail(&lines, 2), "line 3\nline 4");
        assert_eq!(stderr_tail(&lines, 10).lines().count(), 5);
    }
}
