//! CLI subcommand implementations for termly.
//!
//! Commands are organized into submodules by domain:
//!
//! - [`start`] - Run a mirrored session in a directory
//! - [`sessions`] - Inspect and manage registered sessions (list, status, stop, cleanup)
//! - [`config`] - Show, change and reset configuration
//!
//! # Usage
//!
//! Commands are invoked from the main CLI dispatcher:
//!
//! ```ignore
//! use termly::commands;
//!
//! let registry = SessionRegistry::open_default()?;
//! commands::sessions::list(&registry)?;
//! commands::config::run(Some("server_url"), None, false)?;
//! ```

pub mod config;
pub mod sessions;
pub mod start;

/// Crate version shown by `--version` and `status`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used functions for convenience
#[doc(inline)]
pub use sessions::{cleanup, list, status, stop};
#[doc(inline)]
pub use start::{resolve_launch, StartArgs};
