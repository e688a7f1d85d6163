//! File watcher
//!
//! Watches the project directory with `notify`, drops paths that should
//! never trigger a run, and delivers debounced batches of changed paths to
//! the watch controller.

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc as async_mpsc;

use crate::config::WatchSettings;

/// Decides which changed paths are relevant
#[derive(Debug, Clone)]
pub struct FileFilter {
    root: PathBuf,
    extensions: Vec<String>,
    ignore: Vec<glob::Pattern>,
}

impl FileFilter {
    pub fn new(root: &Path, settings: &WatchSettings) -> Result<Self> {
        let ignore = settings
            .ignore
            .iter()
            .map(|pattern| {
                glob::Pattern::new(pattern)
                    .with_context(|| format!("Invalid ignore pattern '{}'", pattern))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            root: root.to_path_buf(),
            extensions: settings.extensions.clone(),
            ignore,
        })
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let relative = relative.to_string_lossy().replace('\\', "/");

        if self.ignore.iter().any(|pattern| pattern.matches(&relative)) {
            return false;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed == ext))
            .unwrap_or(false)
    }
}

/// Collects paths until no event has arrived for a full window
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: BTreeSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeSet::new(),
            last_event: None,
        }
    }

    pub fn push(&mut self, paths: impl IntoIterator<Item = PathBuf>, now: Instant) {
        let before = self.pending.len();
        self.pending.extend(paths);
        if self.pending.len() > before || self.last_event.is_some() {
            self.last_event = Some(now);
        }
    }

    /// Time left before the pending batch is due, if there is one
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.last_event
            .map(|last| self.window.saturating_sub(now.duration_since(last)))
    }

    /// Take the batch once the window has passed
    pub fn take_ready(&mut self, now: Instant) -> Option<Vec<PathBuf>> {
        match self.remaining(now) {
            Some(remaining) if remaining.is_zero() => {
                self.last_event = None;
                Some(std::mem::take(&mut self.pending).into_iter().collect())
            }
            _ => None,
        }
    }
}

/// Running `notify` watcher; dropping it stops the watch
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Watch `root` recursively and send debounced batches into `tx`
    pub fn spawn(
        root: &Path,
        settings: &WatchSettings,
        tx: async_mpsc::Sender<Vec<PathBuf>>,
    ) -> Result<Self> {
        let filter = FileFilter::new(root, settings)?;
        let window = Duration::from_millis(settings.debounce_ms);

        let (event_tx, event_rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => tracing::warn!("File watcher error: {}", e),
            },
            Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        thread::spawn(move || forward_events(event_rx, filter, window, tx));

        tracing::debug!("Watching {}", root.display());

        Ok(Self { _watcher: watcher })
    }
}

fn forward_events(
    events: Receiver<Event>,
    filter: FileFilter,
    window: Duration,
    tx: async_mpsc::Sender<Vec<PathBuf>>,
) {
    let mut debouncer = Debouncer::new(window);

    loop {
        let received = match debouncer.remaining(Instant::now()) {
            Some(remaining) => events.recv_timeout(remaining),
            None => events.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    continue;
                }
                let paths = event.paths.into_iter().filter(|p| filter.accepts(p));
                debouncer.push(paths, Instant::now());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }

        if let Some(batch) = debouncer.take_ready(Instant::now()) {
            tracing::debug!(files = batch.len(), "files changed");
            if tx.blocking_send(batch).is_err() {
                return;
            }
        }
    }
}
