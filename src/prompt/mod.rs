//! Incremental test-name pattern prompt
//!
//! Provides:
//! - A cache of the test titles seen in the last completed run
//! - Case-insensitive regex filtering over those titles
//! - A scrolling, highlighted match list with an optional selected row

mod highlight;
mod scroll;

pub use highlight::*;
pub use scroll::*;

use regex::Regex;
use unicode_width::UnicodeWidthStr;

use crate::render::{Frame, Line, Style};

pub const DEFAULT_MAX_VISIBLE: usize = 10;

const INPUT_PREFIX: &str = " pattern › ";
const ITEM_PREFIX: &str = "  › ";

/// Test titles of one file, as seen in the last run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTestRecord {
    pub file_path: String,
    pub titles: Vec<String>,
}

/// A title that matched the current pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch<'a> {
    pub file_path: &'a str,
    pub title: &'a str,
    /// Byte range of the first match inside `title`
    pub range: std::ops::Range<usize>,
}

/// Pattern-mode prompt over cached test titles
#[derive(Debug, Clone)]
pub struct PatternPrompt {
    records: Vec<CachedTestRecord>,
    max_visible: usize,
    selected: Option<usize>,
    selected_pattern: Option<String>,
    last_match_count: usize,
}

impl Default for PatternPrompt {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VISIBLE)
    }
}

impl PatternPrompt {
    pub fn new(max_visible: usize) -> Self {
        Self {
            records: Vec::new(),
            max_visible: max_visible.max(1),
            selected: None,
            selected_pattern: None,
            last_match_count: 0,
        }
    }

    /// Replace the cached titles with those of the latest run
    pub fn update_cached_records(&mut self, records: Vec<CachedTestRecord>) {
        self.records = records;
        self.reset_selection();
    }

    pub fn cached_records(&self) -> &[CachedTestRecord] {
        &self.records
    }

    /// Every cached title matching `pattern`, in cache order
    ///
    /// A pattern that is not a valid regex matches nothing.
    pub fn matches(&self, pattern: &str) -> Vec<PatternMatch<'_>> {
        match compile_pattern(pattern) {
            Some(regex) => self.matches_regex(&regex),
            None => Vec::new(),
        }
    }

    fn matches_regex(&self, regex: &Regex) -> Vec<PatternMatch<'_>> {
        self.records
            .iter()
            .flat_map(|record| {
                record.titles.iter().filter_map(move |title| {
                    regex.find(title).map(|m| PatternMatch {
                        file_path: &record.file_path,
                        title,
                        range: m.range(),
                    })
                })
            })
            .collect()
    }

    /// Move the selection down one row of the last render
    ///
    /// The watch loop ignores arrow keys, so this is for callers that embed
    /// the prompt and bind their own navigation keys.
    pub fn select_next(&mut self) {
        if self.last_match_count == 0 {
            return;
        }
        let last = self.last_match_count - 1;
        self.selected = Some(match self.selected {
            None => 0,
            Some(index) => (index + 1).min(last),
        });
    }

    /// Move the selection up; past the first row it clears
    pub fn select_prev(&mut self) {
        self.selected = match self.selected {
            None | Some(0) => None,
            Some(index) => Some(index - 1),
        };
    }

    pub fn reset_selection(&mut self) {
        self.selected = None;
        self.selected_pattern = None;
    }

    /// Anchored pattern (`^title$`) for the selected row of the last render
    pub fn selected_pattern(&self) -> Option<&str> {
        self.selected_pattern.as_deref()
    }

    /// Build the prompt screen for the current input
    pub fn render(&mut self, input: &str, columns: usize) -> Frame {
        let mut lines = usage_lines();

        let input_row = lines.len();
        lines.push(
            Line::new()
                .push(INPUT_PREFIX, Style::Dim)
                .push(input, Style::Plain),
        );

        self.selected_pattern = None;

        if input.is_empty() {
            self.last_match_count = 0;
            lines.push(Line::new());
            lines.push(Line::styled(
                " Start typing to filter by a test name regex pattern.",
                Style::Dim,
            ));
        } else {
            let compiled = compile_pattern(input);
            let matches = compiled
                .as_ref()
                .map(|compiled| self.matches_regex(compiled))
                .unwrap_or_default();
            let count = matches.len();

            lines.push(Line::new());
            if count == 0 {
                lines.push(
                    Line::new()
                        .push(" Pattern matches ", Style::Plain)
                        .push("no tests", Style::Bold),
                );
            } else {
                lines.push(
                    Line::new()
                        .push(" Pattern matches ", Style::Plain)
                        .push(pluralize("test", count), Style::Bold)
                        .push(" from cached test files", Style::Dim),
                );
            }

            let window = scroll(count, self.selected, self.max_visible);
            let title_width = columns.saturating_sub(ITEM_PREFIX.width());
            let mut selected_pattern = None;

            for (index, item) in matches
                .iter()
                .enumerate()
                .take(window.end)
                .skip(window.start)
            {
                let mut line = Line::new().push(ITEM_PREFIX, Style::Dim);
                if window.selected == Some(index) {
                    line = line.push(truncate(item.title, title_width), Style::Inverse);
                    selected_pattern = Some(format!("^{}$", regex::escape(item.title)));
                } else {
                    line = line.extend(highlight(item.title, Some(item.range.clone()), title_width));
                }
                lines.push(line);
            }

            let hidden = count - (window.end - window.start);
            if hidden > 0 {
                lines.push(Line::styled(
                    format!(
                        "  ...and {} more {}",
                        hidden,
                        if hidden == 1 { "test" } else { "tests" }
                    ),
                    Style::Dim,
                ));
            }

            self.selected_pattern = selected_pattern;
            self.last_match_count = count;
            self.selected = window.selected;
        }

        let lines = lines
            .into_iter()
            .map(|line| fit_line(line, columns))
            .collect();

        let cursor_column = (INPUT_PREFIX.width() + input.width()).min(columns);

        Frame {
            lines,
            cursor: Some((input_row, cursor_column)),
        }
    }
}

fn usage_lines() -> Vec<Line> {
    vec![
        Line::styled(" Pattern Mode Usage", Style::Bold),
        Line::new()
            .push(" › Press ", Style::Dim)
            .push("Esc", Style::Plain)
            .push(" to exit pattern mode.", Style::Dim),
        Line::new()
            .push(" › Press ", Style::Dim)
            .push("Enter", Style::Plain)
            .push(" to filter by a test name regex pattern.", Style::Dim),
        Line::new(),
    ]
}
