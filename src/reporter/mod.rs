//! Reporters
//!
//! Provides:
//! - The `Reporter` plugin trait, where every hook is optional
//! - `ReporterDispatcher`, which fans run events out to reporters in order
//! - Built-in summary and JSON reporters

mod dispatcher;
mod json;
mod summary;

pub use dispatcher::*;
pub use json::*;
pub use summary::*;

use anyhow::Result;
use futures::future::{self, BoxFuture, FutureExt};

use crate::coordinator::RunContext;
use crate::results::{AggregatedResult, TestCase, TestCaseResult, TestFile, TestFileResult};

/// Completion of a reporter hook
pub type HookFuture<'a> = BoxFuture<'a, Result<()>>;

/// An already-completed hook, for reporters that do their work synchronously
pub fn completed<'a>() -> Option<HookFuture<'a>> {
    Some(future::ok(()).boxed())
}

/// Options passed to `on_run_start`
#[derive(Debug, Clone, Default)]
pub struct RunStartOptions {
    /// Estimated duration from the previous run, if known
    pub estimated_time_ms: Option<u64>,
    pub show_status: bool,
}

/// Consumer of run-lifecycle events
///
/// Every hook is optional. A hook that returns `None` (the default) is
/// treated as not implemented and is skipped by the dispatcher; the
/// `on_test_start` and `on_test_result` hooks are legacy aliases that are
/// only consulted when the preferred hook is absent.
pub trait Reporter: Send + Sync {
    /// Identifies the reporter's concrete type
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn on_run_start<'a>(
        &'a self,
        _results: &'a AggregatedResult,
        _options: &'a RunStartOptions,
    ) -> Option<HookFuture<'a>> {
        None
    }

    fn on_test_file_start<'a>(&'a self, _test: &'a TestFile) -> Option<HookFuture<'a>> {
        None
    }

    /// Legacy alias of `on_test_file_start`
    fn on_test_start<'a>(&'a self, _test: &'a TestFile) -> Option<HookFuture<'a>> {
        None
    }

    fn on_test_file_result<'a>(
        &'a self,
        _test: &'a TestFile,
        _result: &'a TestFileResult,
        _aggregated: &'a AggregatedResult,
    ) -> Option<HookFuture<'a>> {
        None
    }

    /// Legacy alias of `on_test_file_result`
    fn on_test_result<'a>(
        &'a self,
        _test: &'a TestFile,
        _result: &'a TestFileResult,
        _aggregated: &'a AggregatedResult,
    ) -> Option<HookFuture<'a>> {
        None
    }

    fn on_test_case_result<'a>(
        &'a self,
        _test: &'a TestFile,
        _test_case: &'a TestCase,
        _result: &'a TestCaseResult,
    ) -> Option<HookFuture<'a>> {
        None
    }

    fn on_run_complete<'a>(
        &'a self,
        _contexts: &'a [RunContext],
        _results: &'a AggregatedResult,
    ) -> Option<HookFuture<'a>> {
        None
    }

    /// The last error this reporter wants to surface, if any
    fn last_error(&self) -> Option<String> {
        None
    }
}
