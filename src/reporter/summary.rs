//! Default reporter: colored per-file lines and an end-of-run summary

use colored::Colorize;
use std::sync::Mutex;
use std::time::Instant;

use super::{completed, HookFuture, Reporter, RunStartOptions};
use crate::coordinator::RunContext;
use crate::render::OutputSink;
use crate::results::{AggregatedResult, TestFile, TestFileResult, TestStatus};

/// Prints file results as they arrive and a summary when the run completes
pub struct SummaryReporter {
    sink: OutputSink,
    started: Mutex<Option<Instant>>,
    last_error: Mutex<Option<String>>,
}

impl SummaryReporter {
    pub fn new(sink: OutputSink) -> Self {
        Self {
            sink,
            started: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    fn write(&self, line: &str) {
        if let Err(e) = self.sink.write_line(line) {
            *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(format!("summary reporter could not write: {}", e));
        }
    }

    fn elapsed_ms(&self) -> u128 {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|started| started.elapsed().as_millis())
            .unwrap_or(0)
    }
}

impl Reporter for SummaryReporter {
    fn on_run_start<'a>(
        &'a self,
        results: &'a AggregatedResult,
        _options: &'a RunStartOptions,
    ) -> Option<HookFuture<'a>> {
        *self.started.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.write(&format!(
            "{} Running {} test file(s)...",
            "→".blue(),
            results.num_total_test_files
        ));
        completed()
    }

    fn on_test_file_result<'a>(
        &'a self,
        test: &'a TestFile,
        result: &'a TestFileResult,
        _aggregated: &'a AggregatedResult,
    ) -> Option<HookFuture<'a>> {
        if let Some(ref message) = result.failure_message {
            self.write(&format!("{} {}", " FAIL ".on_red().bold(), test.path));
            for line in message.lines() {
                self.write(&format!("    {}", line.red()));
            }
            return completed();
        }

        if result.failed() {
            self.write(&format!("{} {}", " FAIL ".on_red().bold(), test.path));
        } else {
            self.write(&format!("{} {}", " PASS ".on_green().bold(), test.path.dimmed()));
        }

        for case in result
            .test_results
            .iter()
            .filter(|case| case.status == TestStatus::Failed)
        {
            self.write(&format!("   {} {}", case.status.symbol().red(), case.full_name.red()));
            for message in &case.failure_messages {
                for line in message.lines() {
                    self.write(&format!("      {}", line.dimmed()));
                }
            }
        }

        if result.snapshot_failure {
            self.write(&format!(
                "   {} snapshot mismatch in {}",
                "›".yellow(),
                test.path.yellow()
            ));
        }

        completed()
    }

    fn on_run_complete<'a>(
        &'a self,
        _contexts: &'a [RunContext],
        results: &'a AggregatedResult,
    ) -> Option<HookFuture<'a>> {
        let total_time = self.elapsed_ms();

        self.write(&"─".repeat(50).dimmed().to_string());

        if results.interrupted {
            self.write(&format!(
                "{} Run interrupted after {} of {} file(s)",
                "!".yellow().bold(),
                results.test_results.len(),
                results.num_total_test_files
            ));
        }

        if results.num_failed_tests == 0 && results.num_failed_test_files == 0 {
            self.write(&format!(
                "{} {} test(s) passed in {} file(s) ({}ms)",
                "✓".green().bold(),
                results.num_passed_tests.to_string().green(),
                results.num_passed_test_files,
                total_time
            ));
        } else {
            self.write(&format!(
                "{} {} passed, {} failed, {} ignored ({}ms)",
                "✗".red().bold(),
                results.num_passed_tests.to_string().green(),
                results.num_failed_tests.to_string().red(),
                results.num_pending_tests,
                total_time
            ));
        }

        if results.snapshot.failure {
            self.write(&format!(
                "{} {} file(s) with snapshot failures",
                "›".yellow(),
                results.snapshot.files_with_failures
            ));
        } else if results.snapshot.updated {
            self.write(&format!("{} Snapshots updated", "›".green()));
        }

        completed()
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
