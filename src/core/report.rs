//! Per-file issues shared by operation reports.

use crate::error::ExitStatus;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What went wrong with a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Read, rename or delete failed; the file was skipped
    TransientIo,
    /// The filesystem and the record store now disagree
    StoreInconsistency,
    /// The file's volume has no usable duplicate folder
    Config,
    /// The only available duplicate folder is on another volume
    CrossDriveViolation,
    /// A record-store write was rejected; nothing on disk changed
    Store,
    /// Left alone because acting could lose the last copy; needs a person
    NeedsReview,
}

impl IssueKind {
    pub fn exit_status(self) -> ExitStatus {
        match self {
            IssueKind::TransientIo | IssueKind::Store | IssueKind::NeedsReview => {
                ExitStatus::PartialFailure
            }
            IssueKind::StoreInconsistency => ExitStatus::StoreInconsistency,
            IssueKind::Config => ExitStatus::ConfigError,
            IssueKind::CrossDriveViolation => ExitStatus::CrossDriveViolation,
        }
    }
}

/// A per-file problem, accumulated instead of aborting the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub path: PathBuf,
    pub record_id: Option<i64>,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            record_id: None,
            message: message.into(),
        }
    }

    pub fn for_record(mut self, id: i64) -> Self {
        self.record_id = Some(id);
        self
    }
}

/// Worst status across a set of issues, or `Success` when empty
pub fn worst_status<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> ExitStatus {
    issues
        .into_iter()
        .fold(ExitStatus::Success, |acc, issue| acc.worst(issue.kind.exit_status()))
}
