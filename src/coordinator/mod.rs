//! Run coordination
//!
//! Provides:
//! - The `RunCoordinator` contract used by the watch controller
//! - `CargoRunCoordinator`, which runs `cargo test` once per test file
//! - Parsing of libtest's human-readable output

mod cargo;
mod libtest;

pub use cargo::*;
pub use libtest::*;

use anyhow::Result;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::render::OutputSink;
use crate::results::{AggregatedResult, TestFile};

/// What a run should execute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    pub test_files: Vec<TestFile>,
    /// Files whose changes led to this run, if any
    pub changed_files: Vec<PathBuf>,
}

/// Everything a coordinator receives for one run
#[derive(Clone)]
pub struct RunRequest {
    pub context: RunContext,
    pub config: Arc<RunConfig>,
    /// Raw arguments forwarded from the command line
    pub args: Vec<String>,
    pub sink: OutputSink,
    pub token: CancelToken,
}

/// Executes test runs
///
/// The returned future owns everything it needs, so the watch controller can
/// keep handling input while it is pending. Implementations are expected to
/// drive the reporter hooks and to check `request.token` between units of
/// work.
pub trait RunCoordinator {
    fn run(&mut self, request: RunRequest) -> BoxFuture<'static, Result<AggregatedResult>>;
}
