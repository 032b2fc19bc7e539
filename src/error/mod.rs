//! # Error Module
//!
//! Error types for the deduplication engine.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - paths, record ids, lock holders
//! - **Distinct outcomes** - every failure class maps to its own exit status
//! - **Recovery hints** - suggest how to fix when possible

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Fingerprinting error: {0}")]
    Hash(#[from] HashError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Another process holds the lock this operation needs.
    #[error("Lock '{name}' is held by {holder} (acquired at {acquired_at}). Wait for it to finish and try again.")]
    Busy {
        name: String,
        holder: String,
        acquired_at: DateTime<Utc>,
    },

    /// A destructive operation started while a dry run was inspecting the same state.
    #[error("Lock '{name}' was acquired by {holder} during a dry run. Aborting so the preview does not go stale.")]
    DryRunInterrupted { name: String, holder: String },

    #[error("Purge not confirmed. Type DELETE exactly to permanently remove files.")]
    NotConfirmed,

    #[error("Operation was cancelled")]
    Cancelled,
}

impl DedupError {
    /// Map this error to the process exit status a CLI should report.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            DedupError::Busy { .. } | DedupError::DryRunInterrupted { .. } => ExitStatus::Busy,
            DedupError::Config(_) => ExitStatus::ConfigError,
            DedupError::Plan(PlanError::CrossDriveViolation { .. }) => {
                ExitStatus::CrossDriveViolation
            }
            DedupError::Plan(PlanError::Config(_)) => ExitStatus::ConfigError,
            DedupError::Store(StoreError::Inconsistency { .. }) => ExitStatus::StoreInconsistency,
            DedupError::Cancelled => ExitStatus::Cancelled,
            _ => ExitStatus::Failure,
        }
    }
}

/// Errors that occur during file discovery
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while fingerprinting a file
#[derive(Error, Debug)]
pub enum HashError {
    #[error("Failed to read file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {path}: {reason}")]
    DecodeError { path: PathBuf, reason: String },

    #[error("Unknown similarity algorithm: {name}")]
    UnknownAlgorithm { name: String },

    #[error("Hash computation failed: {0}")]
    ComputationFailed(String),
}

/// Errors raised by the record store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open record store at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Record store connection is poisoned by an earlier panic. Restart the process.")]
    Poisoned,

    #[error("No file record with id {id}")]
    NotFound { id: i64 },

    #[error("Path {path} already belongs to active record {existing_id}")]
    PathConflict { path: PathBuf, existing_id: i64 },

    #[error("Lineage violation: {0}")]
    LineageViolation(String),

    #[error("Unknown file status '{0}' in record store")]
    UnknownStatus(String),

    /// The filesystem and the record store disagree about a file.
    #[error("Store inconsistency for record {record_id} ({path}): {reason}. Reconcile manually.")]
    Inconsistency {
        record_id: i64,
        path: PathBuf,
        reason: String,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        StoreError::QueryFailed(error.to_string())
    }
}

/// Errors in configuration (always fatal, raised before any mutation)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration:\n  - {}", problems.join("\n  - "))]
    Invalid { problems: Vec<String> },

    #[error("Path {path} is not on any configured volume")]
    UnknownVolume { path: PathBuf },

    #[error("No duplicate folder configured for volume {volume}")]
    NoDuplicateFolder { volume: String },

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Errors produced while computing a move plan
#[derive(Error, Debug)]
pub enum PlanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cross-drive move refused: {path} is on {volume} but its duplicate folder {folder} is on {folder_volume}")]
    CrossDriveViolation {
        path: PathBuf,
        volume: String,
        folder: PathBuf,
        folder_volume: String,
    },
}

/// Outcome classes exposed to callers, each with a distinct process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Failure,
    Busy,
    ConfigError,
    CrossDriveViolation,
    PartialFailure,
    StoreInconsistency,
    Cancelled,
}

impl ExitStatus {
    /// Process exit code for this status
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::Busy => 2,
            ExitStatus::ConfigError => 3,
            ExitStatus::CrossDriveViolation => 4,
            ExitStatus::PartialFailure => 5,
            ExitStatus::StoreInconsistency => 6,
            ExitStatus::Cancelled => 130,
        }
    }

    /// Combine two statuses, keeping the more severe one.
    ///
    /// Store inconsistencies outrank everything because they cannot self-heal.
    pub fn worst(self, other: ExitStatus) -> ExitStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    fn severity(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::PartialFailure => 1,
            ExitStatus::CrossDriveViolation => 2,
            ExitStatus::Busy => 3,
            ExitStatus::ConfigError => 4,
            ExitStatus::Cancelled => 5,
            ExitStatus::Failure => 6,
            ExitStatus::StoreInconsistency => 7,
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, DedupError>;
