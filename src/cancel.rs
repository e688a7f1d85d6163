//! Per-run cancellation tokens
//!
//! A token is shared between the watch controller (which may interrupt it)
//! and the run in progress (which polls it between units of work). Every run
//! gets a fresh token, so interrupting a token that belongs to a finished run
//! never reaches a later one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop request for a single run
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    interrupted: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run holding this token to stop scheduling further work
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Whether both handles refer to the same run's token
    pub fn same_token(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.interrupted, &other.interrupted)
    }
}
