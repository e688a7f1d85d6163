//! Sequential fan-out of run events to registered reporters

use anyhow::Result;

use super::{Reporter, RunStartOptions};
use crate::coordinator::RunContext;
use crate::results::{AggregatedResult, TestCase, TestCaseResult, TestFile, TestFileResult};

/// Forwards run-lifecycle events to reporters in registration order
///
/// Each hook is awaited before the next reporter is called. Hook errors are
/// returned to the caller as-is.
#[derive(Default)]
pub struct ReporterDispatcher {
    reporters: Vec<Box<dyn Reporter>>,
}

impl ReporterDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    /// Remove every reporter matching `predicate`
    pub fn unregister<F>(&mut self, predicate: F)
    where
        F: Fn(&dyn Reporter) -> bool,
    {
        self.reporters.retain(|reporter| !predicate(reporter.as_ref()));
    }

    /// Remove every reporter of type `R`
    pub fn unregister_kind<R: Reporter>(&mut self) {
        let kind = std::any::type_name::<R>();
        self.unregister(|reporter| reporter.kind() == kind);
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    pub async fn on_run_start(
        &self,
        results: &AggregatedResult,
        options: &RunStartOptions,
    ) -> Result<()> {
        for reporter in &self.reporters {
            if let Some(hook) = reporter.on_run_start(results, options) {
                hook.await?;
            }
        }
        Ok(())
    }

    pub async fn on_test_file_start(&self, test: &TestFile) -> Result<()> {
        for reporter in &self.reporters {
            let hook = reporter
                .on_test_file_start(test)
                .or_else(|| reporter.on_test_start(test));
            if let Some(hook) = hook {
                hook.await?;
            }
        }
        Ok(())
    }

    /// Dispatch a file result, then drop its heavy payloads
    ///
    /// The eviction happens even when no reporter is registered, so a
    /// long-lived watch process does not keep coverage and console output
    /// from every run.
    pub async fn on_test_file_result(
        &self,
        test: &TestFile,
        result: &mut TestFileResult,
        aggregated: &AggregatedResult,
    ) -> Result<()> {
        {
            let file_result: &TestFileResult = result;
            for reporter in &self.reporters {
                let hook = reporter
                    .on_test_file_result(test, file_result, aggregated)
                    .or_else(|| reporter.on_test_result(test, file_result, aggregated));
                if let Some(hook) = hook {
                    hook.await?;
                }
            }
        }
        result.evict_heavy_fields();
        Ok(())
    }

    pub async fn on_test_case_result(
        &self,
        test: &TestFile,
        test_case: &TestCase,
        result: &TestCaseResult,
    ) -> Result<()> {
        for reporter in &self.reporters {
            if let Some(hook) = reporter.on_test_case_result(test, test_case, result) {
                hook.await?;
            }
        }
        Ok(())
    }

    pub async fn on_run_complete(
        &self,
        contexts: &[RunContext],
        results: &AggregatedResult,
    ) -> Result<()> {
        for reporter in &self.reporters {
            if let Some(hook) = reporter.on_run_complete(contexts, results) {
                hook.await?;
            }
        }
        Ok(())
    }

    /// Last errors of the reporters that expose one, in registration order
    pub fn errors(&self) -> Vec<String> {
        self.reporters
            .iter()
            .filter_map(|reporter| reporter.last_error())
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors().is_empty()
    }
}
