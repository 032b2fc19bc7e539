//! # Core Module
//!
//! The GUI-agnostic deduplication and file-lifecycle engine.
//!
//! ## Modules
//! - `store` - Persists file records and named locks
//! - `lock` - Leased named locks, guards and the dry-run monitor
//! - `run` - Cancellation and the per-operation run guard
//! - `scanner` - Discovers media files in directories
//! - `fingerprint` - Content hashes and similarity hashes
//! - `fs` - The narrow filesystem capability the engine calls
//! - `volume` - Volume resolution and duplicate folders per volume
//! - `ingest` - The scan operation
//! - `dedupe` - Duplicate grouping, move planning and application
//! - `purge` - Purge planning and execution
//! - `similar` - Near-duplicate clustering
//! - `status` - Store overview

pub mod dedupe;
pub mod fingerprint;
pub mod fs;
pub mod ingest;
pub mod lock;
pub mod purge;
pub mod report;
pub mod run;
pub mod scanner;
pub mod similar;
pub mod status;
pub mod store;
pub mod volume;

// Re-export commonly used types
pub use dedupe::{DedupeReport, DedupeRun, MovePlan};
pub use fingerprint::Fingerprinter;
pub use fs::{FileSystem, LocalFileSystem};
pub use ingest::{ScanReport, ScanRun};
pub use lock::{LockManager, LockName, LockPolicy};
pub use purge::{PurgeConfirmation, PurgeFilters, PurgeReport, PurgeRun};
pub use report::{Issue, IssueKind};
pub use run::{CancellationToken, RunGuard};
pub use similar::{SimilarReport, SimilarRun};
pub use store::{FileRecord, FileStatus, RecordStore, SqliteStore};
pub use volume::{DuplicateFolders, VolumeRoot};
