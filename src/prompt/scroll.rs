//! Scrolling window over a list with an optional selected row

/// Visible slice `start..end` of a list and the selected absolute index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollWindow {
    pub start: usize,
    pub end: usize,
    pub selected: Option<usize>,
}

/// Compute the window of at most `max` rows over `size` items
///
/// The selected row stays in the lower half of the window once the list
/// scrolls, and the window never runs past the end of the list.
pub fn scroll(size: usize, selected: Option<usize>, max: usize) -> ScrollWindow {
    let Some(offset) = selected.filter(|_| size > 0) else {
        return ScrollWindow {
            start: 0,
            end: size.min(max),
            selected: None,
        };
    };

    let index = offset.min(size - 1);
    let half = max / 2;

    let start = if index <= half || size <= max {
        0
    } else {
        (index - half - 1).min(size - max)
    };

    ScrollWindow {
        start,
        end: size.min(start + max),
        selected: Some(index),
    }
}
