//! # media-dedup CLI
//!
//! Command-line interface for the media deduplicator.
//!
//! ## Usage
//! ```bash
//! media-dedup scan
//! media-dedup dedupe --dry-run --json
//! ```
//!
//! The process exit code reports the outcome: 0 success, 2 busy,
//! 3 configuration error, 4 cross-drive violation, 5 partial failure,
//! 6 store inconsistency, 130 cancelled, 1 anything else.

mod cli;

fn main() {
    std::process::exit(cli::run());
}
