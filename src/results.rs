//! Test result model
//!
//! Data flowing from a run to the reporters: per-test-case results,
//! per-file results and the aggregated result of a whole run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Test has not run yet
    #[default]
    Pending,
    /// Test is currently running
    Running,
    /// Test passed
    Passed,
    /// Test failed
    Failed,
    /// Test is marked with #[ignore]
    Ignored,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pending => "○",
            TestStatus::Running => "●",
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Ignored => "⊘",
        }
    }
}

/// A test file scheduled for a run, with the tests it contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFile {
    pub path: String,
    /// Full test names (e.g. "math::tests::adds_numbers")
    pub titles: Vec<String>,
}

impl TestFile {
    pub fn new(path: impl Into<String>, titles: Vec<String>) -> Self {
        Self {
            path: path.into(),
            titles,
        }
    }
}

/// A single test case inside a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Short name (e.g. "adds_numbers")
    pub title: String,
    /// Full name including the module path
    pub full_name: String,
}

impl TestCase {
    pub fn from_name(full_name: &str) -> Self {
        let title = full_name.rsplit("::").next().unwrap_or(full_name).to_string();
        Self {
            title,
            full_name: full_name.to_string(),
        }
    }
}

/// Outcome of a single test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub full_name: String,
    pub title: String,
    pub status: TestStatus,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub failure_messages: Vec<String>,
}

/// Result of running one test file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFileResult {
    pub test_file_path: String,
    pub test_results: Vec<TestCaseResult>,
    pub num_passing_tests: usize,
    pub num_failing_tests: usize,
    pub num_pending_tests: usize,
    /// A snapshot assertion failed in this file
    pub snapshot_failure: bool,
    /// Set when the file could not run at all (e.g. a compile error)
    pub failure_message: Option<String>,
    pub duration_ms: u64,
    /// Heavy payloads, dropped once every reporter has seen the result
    pub source_maps: Option<HashMap<String, String>>,
    pub coverage: Option<serde_json::Value>,
    pub console: Option<Vec<String>>,
}

impl TestFileResult {
    pub fn new(test_file_path: impl Into<String>) -> Self {
        Self {
            test_file_path: test_file_path.into(),
            ..Default::default()
        }
    }

    /// Record a finished test case and update the counters
    pub fn push(&mut self, result: TestCaseResult) {
        match result.status {
            TestStatus::Passed => self.num_passing_tests += 1,
            TestStatus::Failed => self.num_failing_tests += 1,
            TestStatus::Ignored | TestStatus::Pending => self.num_pending_tests += 1,
            TestStatus::Running => {}
        }
        self.test_results.push(result);
    }

    pub fn failed(&self) -> bool {
        self.num_failing_tests > 0 || self.failure_message.is_some()
    }

    /// Drop source maps, coverage and captured console output
    pub fn evict_heavy_fields(&mut self) {
        self.source_maps = None;
        self.coverage = None;
        self.console = None;
    }
}

/// Snapshot summary of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    /// At least one snapshot assertion failed
    pub failure: bool,
    pub files_with_failures: usize,
    /// Snapshots were written because of the update override
    pub updated: bool,
}

/// Aggregated result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub num_total_test_files: usize,
    pub num_passed_test_files: usize,
    pub num_failed_test_files: usize,
    pub num_total_tests: usize,
    pub num_passed_tests: usize,
    pub num_failed_tests: usize,
    pub num_pending_tests: usize,
    pub snapshot: SnapshotSummary,
    pub start_time: DateTime<Utc>,
    pub test_results: Vec<TestFileResult>,
    /// The run stopped early because its token was interrupted
    pub interrupted: bool,
    pub success: bool,
}

impl AggregatedResult {
    pub fn new(num_total_test_files: usize) -> Self {
        Self {
            num_total_test_files,
            num_passed_test_files: 0,
            num_failed_test_files: 0,
            num_total_tests: 0,
            num_passed_tests: 0,
            num_failed_tests: 0,
            num_pending_tests: 0,
            snapshot: SnapshotSummary::default(),
            start_time: Utc::now(),
            test_results: Vec::new(),
            interrupted: false,
            success: true,
        }
    }

    /// Fold a finished file into the totals
    pub fn add_file_result(&mut self, result: TestFileResult) {
        if result.failed() {
            self.num_failed_test_files += 1;
            self.success = false;
        } else {
            self.num_passed_test_files += 1;
        }
        if result.snapshot_failure {
            self.snapshot.failure = true;
            self.snapshot.files_with_failures += 1;
        }
        self.num_passed_tests += result.num_passing_tests;
        self.num_failed_tests += result.num_failing_tests;
        self.num_pending_tests += result.num_pending_tests;
        self.num_total_tests +=
            result.num_passing_tests + result.num_failing_tests + result.num_pending_tests;
        self.test_results.push(result);
    }

    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
        self.success = false;
    }
}
