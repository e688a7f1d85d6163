//! Watch controller
//!
//! Runs the control loop: keys and file changes come in over channels, the
//! pure state machine decides what to do, and the controller carries out
//! the effects against the renderer, the prompt, the search index and the
//! run coordinator.

use anyhow::Result;
use colored::Colorize;
use futures::future::{self, BoxFuture};
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::state::{transition, Effect, Mode, RunOutcome, WatchEvent, WatchState};
use super::usage::usage_lines;
use crate::cancel::CancelToken;
use crate::config::{RunConfig, RunOverrides};
use crate::coordinator::{RunContext, RunCoordinator, RunRequest};
use crate::keys::Key;
use crate::prompt::{CachedTestRecord, PatternPrompt};
use crate::render::{LineRenderer, OutputSink};
use crate::results::AggregatedResult;
use crate::search::{SearchSource, TestIndex};

type RunFuture = BoxFuture<'static, Result<AggregatedResult>>;
type IndexFuture = BoxFuture<'static, Result<TestIndex>>;

/// Initial settings of a watch session
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub mode: Mode,
    /// Pattern committed before the first run
    pub pattern: Option<String>,
    pub hide_usage: bool,
    /// Raw arguments forwarded to every run
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct WatchController<R, C, S> {
    state: WatchState,
    renderer: R,
    coordinator: C,
    search: S,
    prompt: PatternPrompt,
    config: RunConfig,
    args: Vec<String>,
    sink: OutputSink,
    token: CancelToken,
    /// Paths changed since the last run started
    changed: Vec<PathBuf>,
    in_flight: Option<RunFuture>,
    indexing: Option<IndexFuture>,
    /// Run requested while the index was rebuilding
    deferred: Option<RunOverrides>,
}

impl<R, C, S> WatchController<R, C, S>
where
    R: LineRenderer,
    C: RunCoordinator,
    S: SearchSource,
{
    pub fn new(
        renderer: R,
        coordinator: C,
        search: S,
        config: RunConfig,
        sink: OutputSink,
        options: WatchOptions,
    ) -> Self {
        let mut state = WatchState::new(options.mode, options.hide_usage);
        state.pattern = options.pattern;

        Self {
            state,
            renderer,
            coordinator,
            search,
            prompt: PatternPrompt::default(),
            config,
            args: options.args,
            sink,
            token: CancelToken::new(),
            changed: Vec::new(),
            in_flight: None,
            indexing: None,
            deferred: None,
        }
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    pub fn search(&self) -> &S {
        &self.search
    }

    pub fn prompt(&self) -> &PatternPrompt {
        &self.prompt
    }

    /// The token of the active run, or the one the next run will replace
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Build the index, start the first run and handle events until quit
    ///
    /// Returns when a quit key arrives or the key channel closes. A run
    /// still in flight at that point is dropped without notifying
    /// reporters.
    pub async fn watch(
        &mut self,
        mut keys: mpsc::Receiver<Key>,
        mut changes: mpsc::Receiver<Vec<PathBuf>>,
    ) -> Result<()> {
        let mut effects = vec![Effect::RebuildIndex];
        self.state.request_run(RunOverrides::default(), &mut effects);
        self.execute(effects, None)?;

        loop {
            let (event, settled) = tokio::select! {
                key = keys.recv() => match key {
                    Some(key) => (WatchEvent::Key(key), None),
                    None => {
                        tracing::debug!("Keyboard input closed");
                        return Ok(());
                    }
                },
                Some(paths) = changes.recv() => {
                    self.changed.extend(paths);
                    (WatchEvent::FilesChanged, None)
                }
                result = settle(&mut self.in_flight) => {
                    self.in_flight = None;
                    let outcome = match result {
                        Ok(ref results) => RunOutcome::Completed {
                            snapshot_failure: results.snapshot.failure,
                        },
                        Err(_) => RunOutcome::Failed,
                    };
                    (WatchEvent::RunSettled(outcome), Some(result))
                }
                index = settle(&mut self.indexing) => {
                    self.indexing = None;
                    self.index_settled(index)?;
                    continue;
                }
            };

            if self.handle(event, settled)? == Flow::Exit {
                return Ok(());
            }
        }
    }

    fn handle(
        &mut self,
        event: WatchEvent,
        settled: Option<Result<AggregatedResult>>,
    ) -> Result<Flow> {
        tracing::debug!(?event, "watch event");
        let (state, effects) = transition(self.state.clone(), event);
        self.state = state;
        self.execute(effects, settled)
    }

    fn execute(
        &mut self,
        effects: Vec<Effect>,
        settled: Option<Result<AggregatedResult>>,
    ) -> Result<Flow> {
        for effect in effects {
            match effect {
                Effect::Exit => return Ok(Flow::Exit),
                Effect::Interrupt => {
                    tracing::debug!("Interrupting active run");
                    self.token.interrupt();
                }
                Effect::StartRun(overrides) => self.start_run(overrides),
                Effect::RebuildIndex => self.rebuild_index(),
                Effect::RenderPrompt => {
                    let frame = self
                        .prompt
                        .render(&self.state.buffer, self.renderer.columns());
                    self.renderer.draw(&frame)?;
                }
                Effect::ShowUsage => {
                    self.renderer.write_lines(&usage_lines(&self.state))?;
                }
                Effect::CacheResults => {
                    if let Some(Ok(ref results)) = settled {
                        self.prompt.update_cached_records(cached_records(results));
                    }
                }
                Effect::ReplaceToken => self.token = CancelToken::new(),
                Effect::ReportFailure => {
                    if let Some(Err(ref e)) = settled {
                        tracing::error!("Test run failed: {:#}", e);
                        self.sink.write_line(&format!(
                            "{} {:#}",
                            "✗ Test run failed:".red().bold(),
                            e
                        ))?;
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Allocate the run's token and launch it, or hold it until the index
    /// rebuild settles
    fn start_run(&mut self, mut overrides: RunOverrides) {
        self.token = CancelToken::new();

        if overrides.test_name_pattern.is_none() {
            overrides.test_name_pattern = Some(self.state.pattern.clone());
        }
        if overrides.watch_all.is_none() {
            overrides.watch_all = Some(self.state.mode == Mode::WatchAll);
        }

        if self.indexing.is_some() {
            tracing::debug!("Waiting for the test index before starting the run");
            self.deferred = Some(overrides);
            return;
        }

        self.launch(overrides);
    }

    fn launch(&mut self, overrides: RunOverrides) {
        let config = self.config.merged(&overrides);
        let context = self.resolve_context(&config);

        tracing::debug!(
            files = context.test_files.len(),
            changed = context.changed_files.len(),
            "starting run"
        );

        if let Err(e) = self.renderer.clear() {
            tracing::warn!("Failed to clear the screen: {}", e);
        }

        let request = RunRequest {
            context,
            config,
            args: self.args.clone(),
            sink: self.sink.clone(),
            token: self.token.clone(),
        };
        self.in_flight = Some(self.coordinator.run(request));
    }

    /// Select the files to run: the committed pattern wins, then watch-all,
    /// then the files related to what changed
    fn resolve_context(&mut self, config: &RunConfig) -> RunContext {
        let changed_files = std::mem::take(&mut self.changed);

        let found = match config.test_name_pattern {
            Some(ref pattern) => self.search.find_matching_tests(pattern),
            None if config.watch_all => self.search.all_tests(),
            None => self.search.find_related_tests(&changed_files),
        };

        let test_files = found
            .paths
            .iter()
            .filter_map(|path| self.search.test_file(path))
            .collect();

        RunContext {
            test_files,
            changed_files,
        }
    }

    /// Start re-indexing; a rebuild already underway is abandoned
    fn rebuild_index(&mut self) {
        if self.indexing.is_some() {
            tracing::debug!("Restarting test index rebuild");
        }
        self.indexing = Some(self.search.rebuild());
    }

    /// Install the rebuilt index and launch a run that was waiting on it
    ///
    /// A failed rebuild keeps the previous index.
    fn index_settled(&mut self, index: Result<TestIndex>) -> Result<()> {
        match index {
            Ok(index) => self.search.install(index),
            Err(e) => {
                tracing::warn!("Failed to rebuild test index: {:#}", e);
                self.sink.write_line(&format!(
                    "{} {:#}",
                    "⚠️  Failed to index tests:".yellow(),
                    e
                ))?;
            }
        }

        if let Some(overrides) = self.deferred.take() {
            self.launch(overrides);
        }
        Ok(())
    }
}

/// Wait for pending work; pending forever when there is none
async fn settle<T>(pending: &mut Option<BoxFuture<'static, Result<T>>>) -> Result<T> {
    match pending {
        Some(work) => work.await,
        None => future::pending().await,
    }
}

/// Full test names per file, in result order
pub fn cached_records(results: &AggregatedResult) -> Vec<CachedTestRecord> {
    results
        .test_results
        .iter()
        .map(|file| CachedTestRecord {
            file_path: file.test_file_path.clone(),
            titles: file
                .test_results
                .iter()
                .map(|case| case.full_name.clone())
                .collect(),
        })
        .collect()
}
