//! # Purge Module
//!
//! Permanently removes files parked in the duplicate folders.
//!
//! ## Steps
//! 1. **Enumerate** every file under the duplicate folders (recursive)
//! 2. **Match** them against the record store in bounded batches:
//!    - registered: an active record owns the path
//!    - orphaned: no record; always skipped, needs manual handling
//! 3. **Filter** the registered set (pattern, age, volume; all must match)
//! 4. **Protect** anything that may be the last copy of its content: a
//!    record other duplicates point at, a record that is not a duplicate,
//!    or a duplicate whose survivor is gone. These are kept and reported.
//! 5. **Delete** the file, then flip its record to `deleted`
//!
//! The plan is computed in full before the first deletion. Deletion needs a
//! [`PurgeConfirmation`], which can only be built from the exact word `DELETE`.

mod executor;
mod filter;
mod planner;

pub use executor::{PurgeExecutor, PurgeOutcome};
pub use filter::PurgeFilters;
pub use planner::PurgePlanner;

/// Largest lookup batch. Each record in a batch binds one SQLite parameter
/// and SQLite refuses statements with more than 32766.
pub const MAX_BATCH_SIZE: usize = 32_000;

use crate::core::fs::FileSystem;
use crate::core::report::{worst_status, Issue};
use crate::core::run::RunGuard;
use crate::core::store::{FileStatus, RecordStore};
use crate::core::volume::DuplicateFolders;
use crate::error::{ConfigError, DedupError, ExitStatus};
use crate::events::{EventSender, OperationSummary, Phase};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Word the user must type before anything is deleted
pub const CONFIRMATION_WORD: &str = "DELETE";

/// Proof that the user confirmed a purge
#[derive(Debug, Clone, Copy)]
pub struct PurgeConfirmation(());

impl PurgeConfirmation {
    /// Accepts only the exact, unabbreviated confirmation word
    /// (surrounding whitespace from a terminal line is ignored).
    pub fn parse(input: &str) -> Result<Self, DedupError> {
        if input.trim() == CONFIRMATION_WORD {
            Ok(Self(()))
        } else {
            Err(DedupError::NotConfirmed)
        }
    }
}

/// A registered file selected for deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurgeTarget {
    pub record_id: i64,
    pub path: PathBuf,
    pub size: u64,
    pub status: FileStatus,
}

/// A file in a duplicate folder that no active record knows about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// A registered file kept back because deleting it could lose the content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedFile {
    pub record_id: i64,
    pub path: PathBuf,
    pub size: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgePlan {
    pub folders: Vec<PathBuf>,
    pub targets: Vec<PurgeTarget>,
    pub orphaned: Vec<OrphanedFile>,
    /// Registered files that passed the filters but anchor their content
    pub protected: Vec<ProtectedFile>,
    /// Registered files excluded by the filters
    pub filtered_out: usize,
    /// Enumeration problems and protected files
    pub issues: Vec<Issue>,
}

impl PurgePlan {
    pub fn bytes(&self) -> u64 {
        self.targets.iter().map(|t| t.size).sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeReport {
    pub dry_run: bool,
    pub plan: PurgePlan,
    pub purged: usize,
    pub orphaned_skipped: usize,
    pub protected_skipped: usize,
    pub bytes_reclaimed: u64,
    /// Enumeration and per-file deletion problems
    pub issues: Vec<Issue>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl PurgeReport {
    pub fn exit_status(&self) -> ExitStatus {
        let status = worst_status(&self.issues);
        if self.cancelled {
            status.worst(ExitStatus::Cancelled)
        } else {
            status
        }
    }
}

/// One purge run
pub struct PurgeRun<'a> {
    store: &'a dyn RecordStore,
    fs: &'a dyn FileSystem,
    folders: &'a DuplicateFolders,
    filters: PurgeFilters,
    batch_size: usize,
    events: EventSender,
    started: Instant,
}

impl<'a> PurgeRun<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        fs: &'a dyn FileSystem,
        folders: &'a DuplicateFolders,
        filters: PurgeFilters,
    ) -> Self {
        Self {
            store,
            fs,
            folders,
            filters,
            batch_size: 500,
            events: crate::events::null_sender(),
            started: Instant::now(),
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// The duplicate folders in scope. A volume filter naming a volume
    /// without a duplicate folder is a configuration error.
    pub fn folders(&self) -> Result<Vec<PathBuf>, ConfigError> {
        match self.filters.volume() {
            None => Ok(self.folders.folders()),
            Some(volume) => {
                let selected: Vec<PathBuf> = self
                    .folders
                    .iter()
                    .filter(|(v, _)| *v == volume)
                    .map(|(_, f)| f.to_path_buf())
                    .collect();
                if selected.is_empty() {
                    Err(ConfigError::NoDuplicateFolder {
                        volume: volume.to_string(),
                    })
                } else {
                    Ok(selected)
                }
            }
        }
    }

    /// Enumerate and classify. Nothing is deleted.
    pub fn plan(&self, guard: &mut RunGuard<'_>) -> Result<PurgePlan, DedupError> {
        info!(dry_run = guard.is_dry_run(), filtered = !self.filters.is_empty(), "purge started");
        self.events.started("purge", guard.is_dry_run());
        let folders = self.folders()?;

        self.events.phase(Phase::Matching);
        let plan = PurgePlanner::new(self.store, self.fs, self.batch_size)
            .with_events(self.events.clone())
            .plan(&folders, &self.filters, guard)?;

        if guard.is_dry_run() {
            guard.verify()?;
        }
        Ok(plan)
    }

    /// Apply a plan. A dry-run guard only reports it.
    pub fn apply(
        &self,
        plan: PurgePlan,
        confirmation: Option<PurgeConfirmation>,
        guard: &mut RunGuard<'_>,
    ) -> Result<PurgeReport, DedupError> {
        let mut report = PurgeReport {
            dry_run: guard.is_dry_run(),
            orphaned_skipped: plan.orphaned.len(),
            protected_skipped: plan.protected.len(),
            issues: plan.issues.clone(),
            ..Default::default()
        };

        if !report.dry_run && !plan.targets.is_empty() {
            let confirmation = confirmation.ok_or(DedupError::NotConfirmed)?;
            // Confirmation may have waited on a person for longer than the lease
            guard.renew()?;
            self.events.phase(Phase::Deleting);
            let outcome = PurgeExecutor::new(self.store, self.fs, self.events.clone())
                .execute(&plan, confirmation, guard)?;
            report.purged = outcome.purged;
            report.bytes_reclaimed = outcome.bytes_reclaimed;
            report.cancelled = outcome.cancelled;
            report.issues.extend(outcome.issues);
        }

        report.plan = plan;
        report.duration_ms = self.started.elapsed().as_millis() as u64;
        self.finish(&report);
        Ok(report)
    }

    /// Plan and apply in one go
    pub fn execute(
        &self,
        confirmation: Option<PurgeConfirmation>,
        guard: &mut RunGuard<'_>,
    ) -> Result<PurgeReport, DedupError> {
        let plan = self.plan(guard)?;
        self.apply(plan, confirmation, guard)
    }

    fn finish(&self, report: &PurgeReport) {
        info!(
            purged = report.purged,
            orphaned_skipped = report.orphaned_skipped,
            protected_skipped = report.protected_skipped,
            bytes_reclaimed = report.bytes_reclaimed,
            issues = report.issues.len(),
            cancelled = report.cancelled,
            "purge finished"
        );
        self.events.finished(
            OperationSummary {
                operation: "purge".to_string(),
                processed: report.purged,
                errors: report.issues.len(),
                bytes: report.bytes_reclaimed,
                duration_ms: report.duration_ms,
            },
            report.cancelled,
        );
    }
}
