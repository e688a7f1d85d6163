use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable that stops the usage banner from being redrawn
/// after every run once it has been shown
pub const HIDE_USAGE_ENV: &str = "RUNX_HIDE_USAGE";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: Project,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub run: RunSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchSettings {
    /// File extensions (without dot) that trigger a run
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Glob patterns, relative to the project directory, that never trigger a run
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore: default_ignore(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSettings {
    /// Extra arguments passed to `cargo test` before `--`
    #[serde(default)]
    pub cargo_args: Vec<String>,
    #[serde(default = "default_test_threads")]
    pub test_threads: usize,
    /// Write the aggregated result of every run to this file
    #[serde(default)]
    pub json_output: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            cargo_args: Vec::new(),
            test_threads: default_test_threads(),
            json_output: None,
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["rs".to_string(), "toml".to_string()]
}

fn default_ignore() -> Vec<String> {
    ["target/**", ".git/**", "**/*.snap.new", "**/*.pending-snap"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_test_threads() -> usize {
    1
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        for pattern in &self.watch.ignore {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid ignore pattern '{}'", pattern))?;
        }

        if self.watch.extensions.is_empty() {
            anyhow::bail!("watch.extensions must list at least one extension");
        }

        if self.run.test_threads == 0 {
            anyhow::bail!("run.test_threads must be at least 1");
        }

        Ok(())
    }
}

/// Whether the hide-usage environment override is set
pub fn hide_usage_from_env() -> bool {
    std::env::var(HIDE_USAGE_ENV)
        .map(|value| !value.is_empty())
        .unwrap_or(false)
}

/// Configuration handed to a single run
///
/// A run receives it behind an `Arc`, so the coordinator can read but never
/// change the controller's copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub project_dir: PathBuf,
    pub cargo_args: Vec<String>,
    pub test_threads: usize,
    pub update_snapshots: bool,
    /// Only run tests whose name matches this case-insensitive regex
    pub test_name_pattern: Option<String>,
    pub watch_all: bool,
}

impl RunConfig {
    pub fn new(project_dir: impl Into<PathBuf>, settings: &RunSettings) -> Self {
        Self {
            project_dir: project_dir.into(),
            cargo_args: settings.cargo_args.clone(),
            test_threads: settings.test_threads,
            update_snapshots: false,
            test_name_pattern: None,
            watch_all: false,
        }
    }

    /// Shallow-merge `overrides` on top of this config and freeze the result
    pub fn merged(&self, overrides: &RunOverrides) -> Arc<RunConfig> {
        let mut merged = self.clone();
        if let Some(update_snapshots) = overrides.update_snapshots {
            merged.update_snapshots = update_snapshots;
        }
        if let Some(ref pattern) = overrides.test_name_pattern {
            merged.test_name_pattern = pattern.clone();
        }
        if let Some(watch_all) = overrides.watch_all {
            merged.watch_all = watch_all;
        }
        Arc::new(merged)
    }
}

/// Per-run replacements for `RunConfig` fields; `None` keeps the base value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub update_snapshots: Option<bool>,
    pub test_name_pattern: Option<Option<String>>,
    pub watch_all: Option<bool>,
}

impl RunOverrides {
    pub fn update_snapshots() -> Self {
        Self {
            update_snapshots: Some(true),
            ..Self::default()
        }
    }
}
