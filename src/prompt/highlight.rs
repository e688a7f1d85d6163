//! Pattern matching and match highlighting helpers

use regex::{Regex, RegexBuilder};
use std::ops::Range;
use unicode_width::UnicodeWidthChar;

use crate::render::{Line, Span, Style};

const ELLIPSIS: &str = "…";

/// Compile a user-typed pattern as a case-insensitive regex
///
/// Returns `None` for patterns that do not compile.
pub fn compile_pattern(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

/// "1 test", "3 tests"
pub fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

/// Cut `text` to at most `max_width` terminal columns, ending with an
/// ellipsis when something was removed
pub fn truncate(text: &str, max_width: usize) -> String {
    let (kept, cut) = truncate_at(text, max_width);
    if cut {
        format!("{}{}", &text[..kept], ELLIPSIS)
    } else {
        text.to_string()
    }
}

/// Byte length of the prefix that fits, and whether anything was cut
fn truncate_at(text: &str, max_width: usize) -> (usize, bool) {
    let total: usize = text.chars().map(|c| c.width().unwrap_or(0)).sum();
    if total <= max_width {
        return (text.len(), false);
    }

    // Leave a column for the ellipsis
    let budget = max_width.saturating_sub(1);
    let mut width = 0;
    let mut end = 0;
    for (idx, c) in text.char_indices() {
        let w = c.width().unwrap_or(0);
        if width + w > budget {
            break;
        }
        width += w;
        end = idx + c.len_utf8();
    }
    (end, true)
}

/// Style `text` for the match list: everything outside `matched` is dimmed
///
/// The text is truncated to `max_width` first; the match range is clamped to
/// what is still visible.
pub fn highlight(text: &str, matched: Option<Range<usize>>, max_width: usize) -> Vec<Span> {
    let (kept, cut) = truncate_at(text, max_width);
    let visible = &text[..kept];

    let mut spans = match matched {
        Some(range) => {
            let start = range.start.min(kept);
            let end = range.end.min(kept);
            vec![
                span(&visible[..start], Style::Dim),
                span(&visible[start..end], Style::Plain),
                span(&visible[end..], Style::Dim),
            ]
        }
        None => vec![span(visible, Style::Dim)],
    };

    if cut {
        spans.push(span(ELLIPSIS, Style::Dim));
    }

    spans.retain(|s| !s.text.is_empty());
    spans
}

fn span(text: &str, style: Style) -> Span {
    Span {
        text: text.to_string(),
        style,
    }
}

/// Truncate every span of a line so the whole line fits in `max_width`
pub fn fit_line(line: Line, max_width: usize) -> Line {
    if line.width() <= max_width {
        return line;
    }

    let mut fitted = Line::new();
    let mut remaining = max_width;
    for s in line.spans {
        if remaining == 0 {
            break;
        }
        let width: usize = s.text.chars().map(|c| c.width().unwrap_or(0)).sum();
        if width < remaining {
            remaining -= width;
            fitted = fitted.push(s.text, s.style);
        } else {
            fitted = fitted.push(truncate(&s.text, remaining), s.style);
            remaining = 0;
        }
    }
    fitted
}
