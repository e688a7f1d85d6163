//! Runx Watch - interactive watch mode for Rust test suites
//!
//! A library for re-running Rust tests as you work, with:
//! - Key-driven watch controller with run cancellation
//! - Changed-file tracking and related-test selection
//! - Incremental test-name pattern prompt
//! - Pluggable reporters with sequential dispatch
//! - `cargo test` based test indexing and execution

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod keys;
pub mod prompt;
pub mod render;
pub mod reporter;
pub mod results;
pub mod search;
pub mod watch;
pub mod watcher;

pub use cancel::CancelToken;
pub use config::{Config, RunConfig, RunOverrides};
pub use coordinator::{CargoRunCoordinator, RunContext, RunCoordinator, RunRequest};
pub use keys::{key_from_event, Key};
pub use prompt::{CachedTestRecord, PatternPrompt};
pub use render::{HeadlessRenderer, LineRenderer, OutputSink, TerminalRenderer};
pub use reporter::{Reporter, ReporterDispatcher};
pub use results::{AggregatedResult, TestFile, TestFileResult, TestStatus};
pub use search::{CargoSearchSource, SearchResult, SearchSource};
pub use watch::{Mode, WatchController, WatchOptions};
pub use watcher::FileWatcher;
