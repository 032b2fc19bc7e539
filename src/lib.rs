//! # Media Dedup
//!
//! Finds byte-identical media files across volumes, parks the extra copies
//! in a per-volume duplicate folder and, when asked, purges them for good.
//!
//! ## Core Philosophy
//! - **Never move across volumes** - a duplicate stays on the drive it was found on
//! - **One destructive run at a time** - scan, dedupe and purge are serialised by leased locks
//! - **Dry runs are honest** - they plan exactly what a real run would do
//! - **Never hide inconsistencies** - a move that cannot be recorded is reported loudly
//!
//! ## Architecture
//! The library is split into a core engine and presentation layers:
//! - `core` - The deduplication and file-lifecycle engine
//! - `config` - Configuration loading and validation
//! - `events` - Event-driven progress reporting
//! - `error` - Error types and exit statuses
//! - `cli` - Command-line interface (binary only)

pub mod config;
pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{DedupError, ExitStatus, Result};

/// Initialize tracing for the library
///
/// Logs go to stderr so JSON output on stdout stays clean. `RUST_LOG`
/// overrides the default level. Calling this twice is harmless.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
