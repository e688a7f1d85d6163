//! Watch usage banner

use super::state::{Mode, WatchState};
use crate::render::{Line, Style};

fn entry(key: &str, action: &str) -> Line {
    Line::new()
        .push(" › Press ", Style::Dim)
        .push(key, Style::Plain)
        .push(format!(" to {}.", action), Style::Dim)
}

/// Lines of the usage banner for the current state
pub fn usage_lines(state: &WatchState) -> Vec<Line> {
    let mut lines = Vec::new();

    if let Some(ref pattern) = state.pattern {
        lines.push(
            Line::new()
                .push(" Active Filters: ", Style::Bold)
                .push("test name ", Style::Dim)
                .push(format!("/{}/", pattern), Style::Plain),
        );
        lines.push(Line::new());
    }

    lines.push(Line::styled("Watch Usage", Style::Bold));

    match state.mode {
        Mode::Watch => lines.push(entry("a", "run all tests")),
        Mode::WatchAll => lines.push(entry("o", "only run tests related to changed files")),
    }

    if state.has_snapshot_failure {
        lines.push(entry("u", "update failing snapshots"));
    }

    lines.push(entry("p", "filter by a test name regex pattern"));
    lines.push(entry("q", "quit watch mode"));
    lines.push(entry("Enter", "trigger a test run"));

    lines
}
