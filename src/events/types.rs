//! Event type definitions for progress reporting.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by engine operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// File discovery events
    Scan(ScanEvent),
    /// Fingerprinting events
    Fingerprint(FingerprintEvent),
    /// Duplicate move events
    Dedupe(DedupeEvent),
    /// Purge events
    Purge(PurgeEvent),
    /// Named lock events
    Lock(LockEvent),
    /// Operation-level events
    Operation(OperationEvent),
}

/// Events during file discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Discovery has started
    Started { roots: Vec<PathBuf> },
    /// Progress update during discovery
    Progress(ScanProgress),
    /// A directory or file could not be read; discovery continues
    Error { path: PathBuf, message: String },
    /// Discovery completed
    Completed { total_files: usize },
}

/// Progress information during discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Number of directories visited so far
    pub directories_scanned: usize,
    /// Number of matching files found so far
    pub files_found: usize,
    /// Directory being visited
    pub current_path: PathBuf,
}

/// Events during fingerprinting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FingerprintEvent {
    /// Fingerprinting has started
    Started { total_files: usize },
    /// Progress update
    Progress(FingerprintProgress),
    /// A file could not be fingerprinted; the rest continue
    Error { path: PathBuf, message: String },
    /// Fingerprinting completed
    Completed {
        fingerprinted: usize,
        unchanged: usize,
    },
}

/// Progress information during fingerprinting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintProgress {
    /// Files fingerprinted so far
    pub completed: usize,
    /// Files that need fingerprinting
    pub total: usize,
    /// Most recently finished file
    pub current_path: PathBuf,
}

/// Events while applying a move plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DedupeEvent {
    /// Plan computed
    Planned {
        groups: usize,
        moves: usize,
        dry_run: bool,
    },
    /// A candidate was moved and recorded
    Moved {
        record_id: i64,
        survivor_id: i64,
        from: PathBuf,
        to: PathBuf,
    },
    /// A survivor was moved out of a duplicate folder to its original path
    Restored {
        record_id: i64,
        from: PathBuf,
        to: PathBuf,
    },
    /// A candidate could not be settled
    Failed {
        record_id: i64,
        path: PathBuf,
        message: String,
    },
    /// Application finished
    Completed { moved: usize, failed: usize },
}

/// Events while purging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PurgeEvent {
    /// Enumerated files were matched against the record store
    Classified {
        registered: usize,
        orphaned: usize,
        targets: usize,
    },
    /// A file was deleted and its record retired
    Purged { path: PathBuf, bytes: u64 },
    /// A file could not be purged; the rest continue
    Failed { path: PathBuf, message: String },
    /// Purge finished
    Completed { purged: usize, bytes_reclaimed: u64 },
}

/// Named lock lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LockEvent {
    Acquired { name: String },
    Released { name: String },
    /// A dry run is watching this lock instead of taking it
    Watching { name: String },
}

/// Operation-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationEvent {
    /// An operation has started
    Started { operation: String, dry_run: bool },
    /// Moving to a new phase
    PhaseChanged { phase: Phase },
    /// Operation finished, possibly with per-file errors
    Completed { summary: OperationSummary },
    /// Operation was cancelled between per-file steps
    Cancelled,
    /// Operation hit a fatal error
    Error { message: String },
}

/// Phases an operation moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Discovering,
    Fingerprinting,
    Recording,
    Grouping,
    Planning,
    Applying,
    Matching,
    Deleting,
    Clustering,
}

/// Summary of a finished operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation: String,
    /// Files or records the operation acted on
    pub processed: usize,
    /// Per-file errors accumulated along the way
    pub errors: usize,
    /// Bytes moved or reclaimed
    pub bytes: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Discovering => write!(f, "Discovering"),
            Phase::Fingerprinting => write!(f, "Fingerprinting"),
            Phase::Recording => write!(f, "Recording"),
            Phase::Grouping => write!(f, "Grouping"),
            Phase::Planning => write!(f, "Planning"),
            Phase::Applying => write!(f, "Applying"),
            Phase::Matching => write!(f, "Matching"),
            Phase::Deleting => write!(f, "Deleting"),
            Phase::Clustering => write!(f, "Clustering"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_serializable() {
        let event = Event::Dedupe(DedupeEvent::Moved {
            record_id: 11,
            survivor_id: 10,
            from: PathBuf::from("/vol/a/IMG_1.jpg"),
            to: PathBuf::from("/vol/dups/IMG_1.jpg"),
        });

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();

        match deserialized {
            Event::Dedupe(DedupeEvent::Moved { survivor_id, .. }) => {
                assert_eq!(survivor_id, 10);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn summary_is_serializable() {
        let summary = OperationSummary {
            operation: "purge".to_string(),
            processed: 150,
            errors: 1,
            bytes: 500_000_000,
            duration_ms: 5000,
        };

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("500000000"));
    }
}
