use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::mpsc;

use runx_watch::config::{hide_usage_from_env, Config};
use runx_watch::prompt::compile_pattern;
use runx_watch::reporter::{JsonReporter, SummaryReporter};
use runx_watch::{
    key_from_event, CargoRunCoordinator, CargoSearchSource, FileWatcher, Key, Mode, OutputSink,
    ReporterDispatcher, RunConfig, TerminalRenderer, WatchController, WatchOptions,
};

const CONFIG_FILE: &str = "runx-watch.toml";

#[derive(Parser)]
#[command(name = "runx-watch")]
#[command(about = "Re-run Rust tests as files change, with an interactive pattern filter")]
#[command(version)]
struct Cli {
    /// Path to config file (default: runx-watch.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run every test instead of only those related to changed files
    #[arg(long)]
    all: bool,

    /// Only run tests whose name matches this regex
    #[arg(short, long)]
    pattern: Option<String>,

    /// Write the result of every run as JSON to this file
    #[arg(long)]
    json: Option<PathBuf>,

    /// Extra arguments passed to `cargo test`
    #[arg(last = true)]
    cargo_args: Vec<String>,
}

/// Restores cooked mode when dropped
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw terminal mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .try_init();

    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    // The key reader thread is still blocked on read
    std::process::exit(0);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Could not load {}", config_path.display()))?;

    let project_dir = project_dir(&config_path)?;

    if let Some(ref pattern) = cli.pattern {
        if compile_pattern(pattern).is_none() {
            anyhow::bail!("Invalid test name pattern '{}'", pattern);
        }
    }

    let project_name = config
        .project
        .name
        .clone()
        .or_else(|| {
            project_dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "project".to_string());

    println!(
        "{} {} {}",
        "👀".cyan(),
        "Watching".bold(),
        project_name.cyan()
    );

    let interactive = io::stdin().is_terminal();
    let _raw_mode = if interactive {
        Some(RawModeGuard::enable()?)
    } else {
        None
    };

    let sink = if interactive {
        OutputSink::raw_stdout()
    } else {
        OutputSink::new(io::stdout())
    };

    let mut dispatcher = ReporterDispatcher::new();
    dispatcher.register(Box::new(SummaryReporter::new(sink.clone())));
    if let Some(json_path) = cli.json.or_else(|| config.run.json_output.clone()) {
        dispatcher.register(Box::new(JsonReporter::new(project_dir.join(json_path))));
    }

    let options = WatchOptions {
        mode: if cli.all { Mode::WatchAll } else { Mode::Watch },
        pattern: cli.pattern,
        hide_usage: hide_usage_from_env(),
        args: cli.cargo_args,
    };

    let mut controller = WatchController::new(
        TerminalRenderer::new(sink.clone()),
        CargoRunCoordinator::new(dispatcher),
        CargoSearchSource::new(&project_dir, config.run.cargo_args.clone()),
        RunConfig::new(&project_dir, &config.run),
        sink,
        options,
    );

    let (key_tx, key_rx) = mpsc::channel(64);
    let (change_tx, change_rx) = mpsc::channel(16);

    let _watcher = FileWatcher::spawn(&project_dir, &config.watch, change_tx)?;
    spawn_key_reader(key_tx);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(controller.watch(key_rx, change_rx))
}

/// Directory holding the config file, or the current directory
fn project_dir(config_path: &Path) -> Result<PathBuf> {
    let current_dir = std::env::current_dir().context("Could not read current directory")?;

    let dir = match config_path.parent() {
        Some(parent) if config_path.exists() && !parent.as_os_str().is_empty() => {
            std::fs::canonicalize(parent)
                .with_context(|| format!("Could not resolve {}", parent.display()))?
        }
        _ => current_dir,
    };

    Ok(dir)
}

/// Read terminal events on a helper thread and forward mapped keys
fn spawn_key_reader(tx: mpsc::Sender<Key>) {
    thread::spawn(move || loop {
        let event = match crossterm::event::read() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Failed to read terminal input: {}", e);
                return;
            }
        };

        if let Some(key) = key_from_event(&event) {
            if tx.blocking_send(key).is_err() {
                return;
            }
        }
    });
}
