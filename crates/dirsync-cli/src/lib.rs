//! dirsync-cli library: exposes the daemon-side modules for testing.

pub mod logging;
pub mod monitor;

pub use monitor::{Change, Monitor, RootEvent, Side};
