//! # Record Store Module
//!
//! Persists file records and named locks.
//!
//! ## Model
//! - `FileRecord` - one row per known file version, with lineage links
//!   (`duplicate_of_id`, `previous_version_id`, `related_id`)
//! - `LockRecord` - one row per held named lock
//!
//! Every mutation is a transaction scoped to one record, or to one
//! duplicate group where survivor and candidate must change together.
//! Lineage invariants are checked at write time.
//!
//! ## Backends
//! - `SqliteStore` - persistent storage using SQLite (WAL mode)

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{LockAttempt, RecordStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::StoreError;

/// Lifecycle state of a file record. The single source of truth for
/// whether a record is live, settled as a duplicate, or gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    New,
    Scanned,
    Duplicate,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Scanned => "scanned",
            FileStatus::Duplicate => "duplicate",
            FileStatus::Deleted => "deleted",
        }
    }

    /// Whether records in this state take part in grouping and planning
    pub fn is_active(&self) -> bool {
        !matches!(self, FileStatus::Deleted)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(FileStatus::New),
            "scanned" => Ok(FileStatus::Scanned),
            "duplicate" => Ok(FileStatus::Duplicate),
            "deleted" => Ok(FileStatus::Deleted),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted file version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Current location
    pub path: PathBuf,
    /// First-seen location, never changes
    pub original_path: PathBuf,
    pub name: String,
    /// First-seen name, never changes
    pub original_name: String,
    pub size: u64,
    /// File modification time when last fingerprinted
    pub modified: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub similarity_hash: Option<String>,
    pub duplicate_of_id: Option<i64>,
    pub previous_version_id: Option<i64>,
    pub related_id: Option<i64>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for inserting a newly discovered file
#[derive(Debug, Clone, PartialEq)]
pub struct NewFileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub similarity_hash: Option<String>,
}

impl NewFileRecord {
    /// File name component of the path
    pub fn name(&self) -> String {
        file_name_of(&self.path)
    }
}

/// Identity of a lock holder: a process on a host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub hostname: String,
}

impl LockHolder {
    pub fn new(pid: u32, hostname: impl Into<String>) -> Self {
        Self {
            pid,
            hostname: hostname.into(),
        }
    }

    /// Identity of the running process
    pub fn current() -> Self {
        Self::new(std::process::id(), hostname())
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID {} on {}", self.pid, self.hostname)
    }
}

/// A row in the lock table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub name: String,
    pub holder: LockHolder,
    /// Unique per acquisition, so a release never removes someone else's lock
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    /// A lock whose expiry has passed counts as not held
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Number of records in each lifecycle state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub new: usize,
    pub scanned: usize,
    pub duplicate: usize,
    pub deleted: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.new + self.scanned + self.duplicate + self.deleted
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
