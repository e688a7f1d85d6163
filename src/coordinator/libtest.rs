//! Parser for libtest's human-readable output

use std::collections::HashMap;
use std::time::Instant;

use crate::results::{TestCase, TestCaseResult, TestFileResult, TestStatus};

/// Information parsed from a test line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestLineInfo {
    pub name: String,
    pub status: TestStatus,
}

/// Parse a line like "test module::test_name ... ok"
pub fn parse_test_line(line: &str) -> Option<TestLineInfo> {
    if !line.starts_with("test ") || line.starts_with("test result:") {
        return None;
    }

    let rest = &line[5..]; // Skip "test "

    // Find the test name (ends at " ... " or " ..." at end of line)
    let (name, status_part) = if let Some(idx) = rest.find(" ... ") {
        (&rest[..idx], &rest[idx + 5..])
    } else if let Some(stripped) = rest.strip_suffix(" ...") {
        (stripped, "")
    } else {
        (rest.trim(), "")
    };

    let status = if status_part.is_empty() || status_part.trim() == "..." {
        TestStatus::Running
    } else if status_part.contains("FAILED") {
        TestStatus::Failed
    } else if status_part.contains("ignored") {
        TestStatus::Ignored
    } else if status_part.contains("ok") {
        TestStatus::Passed
    } else {
        TestStatus::Running
    };

    Some(TestLineInfo {
        name: name.to_string(),
        status,
    })
}

/// Whether failure output comes from an insta snapshot assertion
pub fn is_snapshot_failure(output: &str) -> bool {
    output.contains("Snapshot Summary") || output.contains("snapshot assertion for")
}

/// Header of a captured-output section: "---- name stdout ----"
fn section_header(line: &str) -> Option<&str> {
    line.strip_prefix("---- ")?.strip_suffix(" stdout ----")
}

/// Incremental parser for the stdout of one `cargo test` invocation
#[derive(Debug)]
pub struct LibtestParser {
    results: Vec<TestCaseResult>,
    console: Vec<String>,
    failures: HashMap<String, Vec<String>>,
    current_section: Option<String>,
    last_result_at: Instant,
}

impl Default for LibtestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LibtestParser {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            console: Vec::new(),
            failures: HashMap::new(),
            current_section: None,
            last_result_at: Instant::now(),
        }
    }

    pub fn push_line(&mut self, line: String) {
        if let Some(name) = section_header(&line) {
            self.current_section = Some(name.to_string());
        } else if line == "failures:" || line.starts_with("test result:") {
            self.current_section = None;
        } else if let Some(ref name) = self.current_section {
            self.failures
                .entry(name.clone())
                .or_default()
                .push(line.clone());
        } else if let Some(info) = parse_test_line(&line) {
            if info.status != TestStatus::Running {
                let test_case = TestCase::from_name(&info.name);
                self.results.push(TestCaseResult {
                    full_name: test_case.full_name,
                    title: test_case.title,
                    status: info.status,
                    duration_ms: Some(self.last_result_at.elapsed().as_millis() as u64),
                    failure_messages: Vec::new(),
                });
                self.last_result_at = Instant::now();
            }
        }

        self.console.push(line);
    }

    /// Attach failure output to failed tests and build the file result
    pub fn finish(mut self, test_file_path: &str) -> TestFileResult {
        let mut result = TestFileResult::new(test_file_path);

        for mut case in self.results {
            if case.status == TestStatus::Failed {
                if let Some(lines) = self.failures.remove(&case.full_name) {
                    let message = lines.join("\n").trim().to_string();
                    if is_snapshot_failure(&message) {
                        result.snapshot_failure = true;
                    }
                    if !message.is_empty() {
                        case.failure_messages.push(message);
                    }
                }
            }
            result.push(case);
        }

        result.console = Some(self.console);
        result
    }
}
