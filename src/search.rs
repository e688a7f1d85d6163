//! Test search index
//!
//! Resolves a name pattern or a set of changed files to the test files
//! that should run. The cargo implementation discovers tests with
//! `cargo test -- --list` and maps each test's module path to a source
//! file with a file-naming heuristic.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::RegexBuilder;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::results::TestFile;

/// Test file paths selected by a search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub paths: Vec<String>,
}

/// Resolves patterns and changed files to test files
pub trait SearchSource {
    /// Test files whose path or any test name matches `pattern`
    /// (case-insensitive regex); an invalid pattern matches nothing
    fn find_matching_tests(&self, pattern: &str) -> SearchResult;

    /// Test files affected by changes to `changed`
    fn find_related_tests(&self, changed: &[PathBuf]) -> SearchResult;

    fn all_tests(&self) -> SearchResult;

    /// The indexed file at `path` with its test names
    fn test_file(&self, path: &str) -> Option<TestFile>;

    /// Re-read the project into a fresh index
    ///
    /// The future owns its inputs, so the caller keeps handling input
    /// while it runs. Dropping it abandons the rebuild.
    fn rebuild(&self) -> BoxFuture<'static, Result<TestIndex>>;

    /// Replace the index with one produced by `rebuild`
    fn install(&mut self, index: TestIndex);
}

/// In-memory index of test files, ordered by path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestIndex {
    files: BTreeMap<String, Vec<String>>,
}

impl TestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, test_name: impl Into<String>) {
        self.files
            .entry(path.into())
            .or_default()
            .push(test_name.into());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn test_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn get(&self, path: &str) -> Option<TestFile> {
        self.files
            .get(path)
            .map(|titles| TestFile::new(path, titles.clone()))
    }

    pub fn find_matching(&self, pattern: &str) -> SearchResult {
        let regex = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => regex,
            Err(_) => return SearchResult::default(),
        };

        let paths = self
            .files
            .iter()
            .filter(|(path, tests)| regex.is_match(path) || tests.iter().any(|t| regex.is_match(t)))
            .map(|(path, _)| path.clone())
            .collect();

        SearchResult { paths }
    }

    /// Files affected by the changed paths (relative to the project root)
    ///
    /// A manifest change or a Rust file that maps to nothing selects every
    /// file, since the dependency between them is unknown.
    pub fn find_related(&self, changed: &[String]) -> SearchResult {
        let mut selected: Vec<String> = Vec::new();

        for file in changed {
            let normalized = normalize_path(file);

            if normalized.ends_with("Cargo.toml") {
                return SearchResult { paths: self.paths() };
            }

            let module_dir = normalized.trim_end_matches(".rs").trim_end_matches("/mod");
            let mut matched = false;
            for path in self.files.keys() {
                let path_dir = path.trim_end_matches(".rs").trim_end_matches("/mod");
                if *path == normalized
                    || path_dir.starts_with(&format!("{}/", module_dir))
                    || module_dir.starts_with(&format!("{}/", path_dir))
                {
                    selected.push(path.clone());
                    matched = true;
                }
            }

            if !matched && normalized.ends_with(".rs") {
                return SearchResult { paths: self.paths() };
            }
        }

        selected.sort();
        selected.dedup();
        SearchResult { paths: selected }
    }
}

/// Search source backed by `cargo test -- --list`
pub struct CargoSearchSource {
    project_dir: PathBuf,
    cargo_args: Vec<String>,
    index: TestIndex,
}

impl CargoSearchSource {
    pub fn new(project_dir: &Path, cargo_args: Vec<String>) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            cargo_args,
            index: TestIndex::new(),
        }
    }

    pub fn index(&self) -> &TestIndex {
        &self.index
    }

    fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.project_dir).unwrap_or(path);
        normalize_path(&relative.to_string_lossy())
    }
}

impl SearchSource for CargoSearchSource {
    fn find_matching_tests(&self, pattern: &str) -> SearchResult {
        self.index.find_matching(pattern)
    }

    fn find_related_tests(&self, changed: &[PathBuf]) -> SearchResult {
        let changed: Vec<String> = changed.iter().map(|p| self.relative(p)).collect();
        self.index.find_related(&changed)
    }

    fn all_tests(&self) -> SearchResult {
        SearchResult {
            paths: self.index.paths(),
        }
    }

    fn test_file(&self, path: &str) -> Option<TestFile> {
        self.index.get(path)
    }

    fn rebuild(&self) -> BoxFuture<'static, Result<TestIndex>> {
        let project_dir = self.project_dir.clone();
        let cargo_args = self.cargo_args.clone();

        async move {
            let output = run_cargo_test_list(&project_dir, &cargo_args).await?;
            let index = build_index(&parse_test_list(&output), |candidate| {
                project_dir.join(candidate).exists()
            });
            tracing::debug!(
                files = index.len(),
                tests = index.test_count(),
                "rebuilt test index"
            );
            Ok(index)
        }
        .boxed()
    }

    fn install(&mut self, index: TestIndex) {
        self.index = index;
    }
}

/// Run `cargo test -- --list` and capture output
async fn run_cargo_test_list(project_dir: &Path, cargo_args: &[String]) -> Result<String> {
    let output = Command::new("cargo")
        .arg("test")
        .args(cargo_args)
        .args(["--", "--list"])
        .current_dir(project_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .context("Failed to execute cargo test --list")?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();

    if !output.status.success() && stdout.is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("cargo test --list failed: {}", stderr);
    }

    Ok(stdout)
}

/// Parse the output of `cargo test -- --list`
///
/// Output format:
/// ```text
/// module::submodule::test_name: test
/// other::test_name: test
///
/// 2 tests, 0 benchmarks
/// ```
/// Doc-tests and benchmarks are skipped.
fn parse_test_list(output: &str) -> Vec<String> {
    let mut tests = Vec::new();

    for line in output.lines() {
        let line = line.trim();

        if line.is_empty() || line.contains(" tests,") || line.contains(" test,") {
            continue;
        }

        if let Some((name, kind)) = line.rsplit_once(": ") {
            if kind.trim() != "test" || name.contains(" (line ") {
                continue;
            }
            tests.push(name.to_string());
        }
    }

    tests
}

/// Group test names by the source file their module most likely lives in
fn build_index(test_names: &[String], exists: impl Fn(&str) -> bool) -> TestIndex {
    let mut index = TestIndex::new();
    for name in test_names {
        index.insert(infer_source_path(name, &exists), name.clone());
    }
    index
}

/// Infer the source file of a test from its module path
///
/// `config::tests::parses` lives in `src/config.rs` or `src/config/mod.rs`;
/// nested modules fall back to their closest existing parent, and anything
/// unresolved belongs to the crate root.
fn infer_source_path(test_name: &str, exists: &impl Fn(&str) -> bool) -> String {
    let mut parts: Vec<&str> = test_name.split("::").collect();
    parts.pop();
    let mut module_parts: Vec<&str> = parts
        .into_iter()
        .filter(|p| *p != "tests" && *p != "test")
        .collect();

    while !module_parts.is_empty() {
        let module_path = module_parts.join("/");
        for candidate in [format!("src/{}.rs", module_path), format!("src/{}/mod.rs", module_path)] {
            if exists(candidate.as_str()) {
                return candidate;
            }
        }
        module_parts.pop();
    }

    if !exists("src/lib.rs") && exists("src/main.rs") {
        "src/main.rs".to_string()
    } else {
        "src/lib.rs".to_string()
    }
}

/// Normalize path separators and remove leading ./
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> TestIndex {
        let files = ["src/lib.rs", "src/math.rs", "src/parser/mod.rs", "src/parser/lexer.rs"];
        build_index(
            &[
                "root_smoke".to_string(),
                "math::tests::adds_numbers".to_string(),
                "math::tests::subtracts_numbers".to_string(),
                "parser::tests::parses_empty".to_string(),
                "parser::lexer::tests::lexes_ident".to_string(),
            ],
            |candidate| files.contains(&candidate),
        )
    }

    #[test]
    fn test_parse_test_list() {
        let output = r#"
math::tests::adds_numbers: test
math::tests::subtracts_numbers: test
benches::sum: bench

2 tests, 1 benchmarks

Doc-tests calculator

src/lib.rs - add (line 10): test

1 test, 0 benchmarks
"#;

        let tests = parse_test_list(output);
        assert_eq!(
            tests,
            vec!["math::tests::adds_numbers", "math::tests::subtracts_numbers"]
        );
    }

    #[test]
    fn test_infer_source_path() {
        let index = sample_index();
        assert_eq!(index.paths(), vec!["src/lib.rs", "src/math.rs", "src/parser/lexer.rs", "src/parser/mod.rs"]);
        assert_eq!(
            index.get("src/math.rs").unwrap().titles,
            vec!["math::tests::adds_numbers", "math::tests::subtracts_numbers"]
        );
        assert_eq!(index.get("src/lib.rs").unwrap().titles, vec!["root_smoke"]);
    }

    #[test]
    fn test_infer_falls_back_to_main() {
        let exists = |candidate: &str| candidate == "src/main.rs";
        assert_eq!(infer_source_path("cli::tests::parses", &exists), "src/main.rs");
    }

    #[test]
    fn test_find_matching_by_name_and_path() {
        let index = sample_index();

        assert_eq!(index.find_matching("ADDS").paths, vec!["src/math.rs"]);
        assert_eq!(index.find_matching("parser/").paths, vec!["src/parser/lexer.rs", "src/parser/mod.rs"]);
        assert!(index.find_matching("(unbalanced").paths.is_empty());
    }

    #[test]
    fn test_find_related() {
        let index = sample_index();

        assert_eq!(index.find_related(&["src/math.rs".to_string()]).paths, vec!["src/math.rs"]);
        assert_eq!(
            index.find_related(&["./src/parser/mod.rs".to_string()]).paths,
            vec!["src/parser/lexer.rs", "src/parser/mod.rs"]
        );
        // Unknown Rust files and manifests select everything
        assert_eq!(index.find_related(&["build.rs".to_string()]).paths.len(), 4);
        assert_eq!(index.find_related(&["Cargo.toml".to_string()]).paths.len(), 4);
        // Non-Rust files that map to nothing select nothing
        assert!(index.find_related(&["README.md".to_string()]).paths.is_empty());
    }

    #[test]
    fn test_install_replaces_index() {
        let mut source = CargoSearchSource::new(Path::new("."), Vec::new());
        assert!(source.all_tests().paths.is_empty());

        source.install(sample_index());
        assert_eq!(source.all_tests().paths.len(), 4);
        assert_eq!(source.find_matching_tests("lexes").paths, vec!["src/parser/lexer.rs"]);
    }

    #[tokio::test]
    async fn test_rebuild_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let source = CargoSearchSource::new(&missing, Vec::new());

        let err = source.rebuild().await.unwrap_err();
        assert!(format!("{:#}", err).contains("cargo test --list"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src/foo.rs"), "src/foo.rs");
        assert_eq!(normalize_path("src\\foo.rs"), "src/foo.rs");
    }
}
