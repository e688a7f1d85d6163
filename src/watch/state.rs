//! Watch state machine
//!
//! `transition` is pure: it takes the current state and one event and
//! returns the next state plus the effects the controller must execute, in
//! order.

use crate::config::RunOverrides;
use crate::keys::Key;

/// Which tests an unfiltered run selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Only tests related to changed files
    #[default]
    Watch,
    /// Every test
    WatchAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchState {
    pub mode: Mode,
    /// Committed test name pattern
    pub pattern: Option<String>,
    pub entering_pattern: bool,
    /// Pattern being typed while `entering_pattern`
    pub buffer: String,
    pub running: bool,
    /// Print the usage banner after the next settlement
    pub display_help: bool,
    pub has_snapshot_failure: bool,
    pub hide_usage: bool,
}

impl WatchState {
    pub fn new(mode: Mode, hide_usage: bool) -> Self {
        Self {
            mode,
            pattern: None,
            entering_pattern: false,
            buffer: String::new(),
            running: false,
            display_help: true,
            has_snapshot_failure: false,
            hide_usage,
        }
    }

    /// Ask for a run; dropped while another run is active
    pub fn request_run(&mut self, overrides: RunOverrides, effects: &mut Vec<Effect>) {
        if self.running {
            tracing::debug!("Run already active, dropping start request");
            return;
        }
        self.running = true;
        effects.push(Effect::StartRun(overrides));
    }
}

/// How a run settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { snapshot_failure: bool },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Key(Key),
    /// Changed paths were accumulated by the controller
    FilesChanged,
    RunSettled(RunOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Terminate the process without waiting for the active run
    Exit,
    /// Interrupt the active run's token
    Interrupt,
    StartRun(RunOverrides),
    RebuildIndex,
    RenderPrompt,
    ShowUsage,
    /// Replace the prompt's cached titles with the settled run's results
    CacheResults,
    ReplaceToken,
    ReportFailure,
}

/// Keys that only interrupt the active run while one is running
fn is_abort_key(key: &Key) -> bool {
    matches!(
        key,
        Key::Char('q') | Key::Enter | Key::Char('a') | Key::Char('o') | Key::Char('p')
    )
}

pub fn transition(state: WatchState, event: WatchEvent) -> (WatchState, Vec<Effect>) {
    let mut state = state;
    let mut effects = Vec::new();

    match event {
        WatchEvent::Key(key) => on_key(&mut state, key, &mut effects),
        WatchEvent::FilesChanged => {
            effects.push(Effect::RebuildIndex);
            state.buffer.clear();
            state.entering_pattern = false;
            state.request_run(RunOverrides::default(), &mut effects);
        }
        WatchEvent::RunSettled(outcome) => {
            state.running = false;
            match outcome {
                RunOutcome::Completed { snapshot_failure } => {
                    state.has_snapshot_failure = snapshot_failure;
                    effects.push(Effect::ReplaceToken);
                    effects.push(Effect::CacheResults);
                }
                RunOutcome::Failed => {
                    effects.push(Effect::ReportFailure);
                    effects.push(Effect::ReplaceToken);
                }
            }
            if state.entering_pattern {
                // Keep the prompt on screen; the banner waits for the next run
                effects.push(Effect::RenderPrompt);
            } else if state.display_help {
                effects.push(Effect::ShowUsage);
                state.display_help = !state.hide_usage;
            }
        }
    }

    (state, effects)
}

fn on_key(state: &mut WatchState, key: Key, effects: &mut Vec<Effect>) {
    if matches!(key, Key::Interrupt | Key::EndOfInput) {
        effects.push(Effect::Exit);
        return;
    }

    if state.entering_pattern {
        on_pattern_key(state, key, effects);
        return;
    }

    if state.running && is_abort_key(&key) {
        effects.push(Effect::Interrupt);
        return;
    }

    match key {
        Key::Char('q') => effects.push(Effect::Exit),
        Key::Enter => state.request_run(RunOverrides::default(), effects),
        Key::Char('u') => state.request_run(RunOverrides::update_snapshots(), effects),
        Key::Char('a') => {
            state.mode = Mode::WatchAll;
            let overrides = RunOverrides {
                watch_all: Some(true),
                ..RunOverrides::default()
            };
            state.request_run(overrides, effects);
        }
        Key::Char('o') => {
            state.mode = Mode::Watch;
            let overrides = RunOverrides {
                watch_all: Some(false),
                ..RunOverrides::default()
            };
            state.request_run(overrides, effects);
        }
        Key::Char('p') => {
            state.entering_pattern = true;
            state.buffer.clear();
            effects.push(Effect::RenderPrompt);
        }
        Key::Char('?') => {
            if state.hide_usage {
                effects.push(Effect::ShowUsage);
            }
        }
        _ => {}
    }
}

fn on_pattern_key(state: &mut WatchState, key: Key, effects: &mut Vec<Effect>) {
    match key {
        Key::Enter => {
            let committed = std::mem::take(&mut state.buffer);
            state.pattern = if committed.is_empty() {
                None
            } else {
                Some(committed)
            };
            state.entering_pattern = false;
            let overrides = RunOverrides {
                test_name_pattern: Some(state.pattern.clone()),
                ..RunOverrides::default()
            };
            state.request_run(overrides, effects);
        }
        Key::Escape => {
            state.buffer.clear();
            state.entering_pattern = false;
            effects.push(Effect::ShowUsage);
        }
        key if key.is_arrow() => {}
        Key::Backspace => {
            state.buffer.pop();
            effects.push(Effect::RenderPrompt);
        }
        Key::Char(c) if !c.is_control() => {
            state.buffer.push(c);
            effects.push(Effect::RenderPrompt);
        }
        _ => {}
    }
}
