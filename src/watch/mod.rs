//! Interactive watch mode
//!
//! Provides:
//! - `WatchState` and the pure `transition` function
//! - The usage banner
//! - `WatchController`, the event loop tying keys, file changes and runs
//!   together

mod controller;
mod state;
mod usage;

pub use controller::*;
pub use state::*;
pub use usage::*;
