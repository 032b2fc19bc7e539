//! # Dedupe Module
//!
//! Groups byte-identical records, keeps the earliest one in place and
//! moves the rest into the duplicate folder of their own volume.
//!
//! ## Steps
//! 1. **Group** - active records by content hash; survivor = lowest id
//! 2. **Plan** - a survivor sitting in a duplicate folder goes back to its
//!    original path first, or the group is left for manual review. Then per
//!    candidate: resolve the volume, check the duplicate folder is on it,
//!    pick a collision-free destination name
//! 3. **Apply** - per candidate: move the file, then record the move.
//!    A move that lands but cannot be recorded is a store inconsistency
//!    and is reported, never rolled back.
//!
//! Dry runs stop after step 2 and report the plan a real run would apply.

mod executor;
mod grouper;
mod planner;

pub use executor::{ApplyOutcome, MoveExecutor};
pub use grouper::group_duplicates;
pub use planner::MovePlanner;

use crate::core::fs::FileSystem;
use crate::core::report::{worst_status, Issue, IssueKind};
use crate::core::run::RunGuard;
use crate::core::store::{FileRecord, RecordStore};
use crate::core::volume::DuplicateFolders;
use crate::error::{ConfigError, DedupError, ExitStatus};
use crate::events::{DedupeEvent, Event, EventSender, OperationSummary, Phase};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

/// Records sharing one content hash
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub content_hash: String,
    pub survivor: FileRecord,
    /// Ascending id
    pub candidates: Vec<FileRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveAction {
    /// Rename the file into the duplicate folder, then record it
    Move,
    /// Already inside its duplicate folder; only the record changes
    Relink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub record_id: i64,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size: u64,
    pub action: MoveAction,
}

/// A candidate already recorded as a duplicate of the current survivor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledCandidate {
    pub record_id: i64,
    pub path: PathBuf,
}

/// The plan for one duplicate group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPlan {
    pub content_hash: String,
    pub survivor_id: i64,
    pub survivor_path: PathBuf,
    /// The survivor is made a non-duplicate before any candidate moves
    pub promote_survivor: bool,
    /// Survivor parked in a duplicate folder, moved back to its original path
    pub restore_survivor: Option<PlannedMove>,
    pub moves: Vec<PlannedMove>,
    pub settled: Vec<SettledCandidate>,
    /// Candidates left out (cross-drive, missing on disk); the group still applies
    pub rejected: Vec<Issue>,
    /// Set when the whole group cannot be planned
    pub failure: Option<Issue>,
}

/// Plans for every duplicate group, in ascending survivor id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovePlan {
    pub groups: Vec<GroupPlan>,
}

impl MovePlan {
    pub fn move_count(&self) -> usize {
        self.groups.iter().map(|g| g.moves.len()).sum()
    }

    pub fn bytes_to_move(&self) -> u64 {
        self.groups
            .iter()
            .flat_map(|g| &g.moves)
            .filter(|m| m.action == MoveAction::Move)
            .map(|m| m.size)
            .sum()
    }

    /// Every planning problem: group failures and rejected candidates
    pub fn issues(&self) -> Vec<Issue> {
        self.groups
            .iter()
            .flat_map(|g| g.failure.iter().chain(g.rejected.iter()))
            .cloned()
            .collect()
    }

    /// Group-level configuration failures. Any of these blocks the apply step.
    pub fn config_failures(&self) -> Vec<&Issue> {
        self.groups
            .iter()
            .filter_map(|g| g.failure.as_ref())
            .filter(|i| i.kind == IssueKind::Config)
            .collect()
    }
}

/// Outcome of a dedupe run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupeReport {
    pub dry_run: bool,
    pub plan: MovePlan,
    /// `None` in a dry run
    pub applied: Option<ApplyOutcome>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl DedupeReport {
    pub fn issues(&self) -> Vec<Issue> {
        let mut issues = self.plan.issues();
        if let Some(applied) = &self.applied {
            issues.extend(applied.issues.iter().cloned());
        }
        issues
    }

    pub fn exit_status(&self) -> ExitStatus {
        let status = worst_status(&self.issues());
        if self.cancelled {
            status.worst(ExitStatus::Cancelled)
        } else {
            status
        }
    }
}

/// One dedupe run
pub struct DedupeRun<'a> {
    store: &'a dyn RecordStore,
    fs: &'a dyn FileSystem,
    folders: &'a DuplicateFolders,
    scope: Vec<PathBuf>,
    events: EventSender,
}

impl<'a> DedupeRun<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        fs: &'a dyn FileSystem,
        folders: &'a DuplicateFolders,
    ) -> Self {
        Self {
            store,
            fs,
            folders,
            scope: Vec::new(),
            events: crate::events::null_sender(),
        }
    }

    /// Only group records under these folders
    pub fn scope(mut self, folders: Vec<PathBuf>) -> Self {
        self.scope = folders;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Group, plan and (unless `guard` is a dry run) apply
    pub fn execute(&self, guard: &mut RunGuard<'_>) -> Result<DedupeReport, DedupError> {
        let started = Instant::now();
        let dry_run = guard.is_dry_run();
        info!(dry_run, scope = self.scope.len(), "dedupe started");
        self.events.started("dedupe", dry_run);

        self.events.phase(Phase::Grouping);
        let groups = group_duplicates(self.store.list_active_files()?, &self.scope);

        self.events.phase(Phase::Planning);
        let mut planner = MovePlanner::new(self.folders, self.fs);
        let mut plan = MovePlan::default();
        for group in &groups {
            guard.checkpoint()?;
            plan.groups.push(planner.plan_group(group));
        }
        info!(
            groups = plan.groups.len(),
            moves = plan.move_count(),
            bytes = plan.bytes_to_move(),
            "move plan ready"
        );
        self.events.send(Event::Dedupe(DedupeEvent::Planned {
            groups: plan.groups.len(),
            moves: plan.move_count(),
            dry_run,
        }));

        let mut report = DedupeReport {
            dry_run,
            ..Default::default()
        };

        if dry_run {
            guard.verify()?;
        } else {
            let failures = plan.config_failures();
            if !failures.is_empty() {
                let problems: Vec<String> = failures
                    .iter()
                    .map(|i| format!("{}: {}", i.path.display(), i.message))
                    .collect();
                error!(groups = problems.len(), "move plan has unmapped volumes, nothing applied");
                return Err(ConfigError::Invalid { problems }.into());
            }

            self.events.phase(Phase::Applying);
            let applied =
                MoveExecutor::new(self.store, self.fs, self.events.clone()).apply(&plan, guard)?;
            report.cancelled = applied.cancelled;
            report.applied = Some(applied);
        }

        report.plan = plan;
        report.duration_ms = started.elapsed().as_millis() as u64;
        self.finish(&report);
        Ok(report)
    }

    fn finish(&self, report: &DedupeReport) {
        let (processed, bytes) = match &report.applied {
            Some(a) => (a.moved + a.relinked, a.bytes_moved),
            None => (report.plan.move_count(), report.plan.bytes_to_move()),
        };
        let issues = report.issues();
        info!(
            processed,
            bytes,
            issues = issues.len(),
            cancelled = report.cancelled,
            "dedupe finished"
        );
        self.events.finished(
            OperationSummary {
                operation: "dedupe".to_string(),
                processed,
                errors: issues.len(),
                bytes,
                duration_ms: report.duration_ms,
            },
            report.cancelled,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fs::LocalFileSystem;
    use crate::core::lock::{LockName, LockPolicy};
    use crate::core::run::CancellationToken;
    use crate::core::store::{FileStatus, LockHolder, NewFileRecord, SqliteStore};
    use crate::core::volume::VolumeRoot;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn policy() -> LockPolicy {
        LockPolicy::default()
            .with_holder(LockHolder::new(7, "test"))
            .with_poll_interval(Duration::ZERO)
    }

    fn add(store: &SqliteStore, path: &Path, bytes: &[u8]) -> i64 {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
        store
            .insert_file(&NewFileRecord {
                path: path.to_path_buf(),
                size: bytes.len() as u64,
                modified: None,
                content_hash: crate::core::fingerprint::content_hash(bytes),
                similarity_hash: None,
            })
            .unwrap()
            .id
    }

    fn run(store: &SqliteStore, folders: &DuplicateFolders, dry_run: bool) -> DedupeReport {
        let mut guard = RunGuard::begin(
            store,
            LockName::Deduplicate,
            dry_run,
            &policy(),
            CancellationToken::new(),
        )
        .unwrap();
        let report = DedupeRun::new(store, &LocalFileSystem, folders)
            .execute(&mut guard)
            .unwrap();
        guard.finish().unwrap();
        report
    }

    fn setup() -> (TempDir, SqliteStore, DuplicateFolders) {
        let dir = TempDir::new().unwrap();
        let mut folders = DuplicateFolders::new();
        folders.insert(VolumeRoot::new(dir.path()), dir.path().join("duplicates"));
        (dir, SqliteStore::open_in_memory().unwrap(), folders)
    }

    #[test]
    fn candidates_move_and_point_at_survivor() {
        let (dir, store, folders) = setup();
        let survivor = add(&store, &dir.path().join("a/pic.jpg"), b"same");
        let candidate = add(&store, &dir.path().join("b/pic.jpg"), b"same");

        let report = run(&store, &folders, false);

        assert_eq!(report.exit_status(), ExitStatus::Success);
        let record = store.get_file(candidate).unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Duplicate);
        assert_eq!(record.duplicate_of_id, Some(survivor));
        assert_eq!(record.path, dir.path().join("duplicates/pic.jpg"));
        assert_eq!(record.original_path, dir.path().join("b/pic.jpg"));
        assert!(record.path.exists());
        assert!(!dir.path().join("b/pic.jpg").exists());
        assert!(dir.path().join("a/pic.jpg").exists());
    }

    #[test]
    fn dry_run_plans_but_touches_nothing() {
        let (dir, store, folders) = setup();
        add(&store, &dir.path().join("a/pic.jpg"), b"same");
        let candidate = add(&store, &dir.path().join("b/pic.jpg"), b"same");

        let report = run(&store, &folders, true);

        assert_eq!(report.plan.move_count(), 1);
        assert!(report.applied.is_none());
        assert_eq!(
            store.get_file(candidate).unwrap().unwrap().status,
            FileStatus::Scanned
        );
        assert!(dir.path().join("b/pic.jpg").exists());
    }

    #[test]
    fn second_run_finds_nothing_to_move() {
        let (dir, store, folders) = setup();
        add(&store, &dir.path().join("a/pic.jpg"), b"same");
        add(&store, &dir.path().join("b/pic.jpg"), b"same");

        run(&store, &folders, false);
        let again = run(&store, &folders, false);

        assert_eq!(again.plan.move_count(), 0);
        assert_eq!(again.plan.groups[0].settled.len(), 1);
    }

    #[test]
    fn unmapped_volume_blocks_the_whole_run() {
        let (dir, store, folders) = setup();
        let elsewhere = TempDir::new().unwrap();
        add(&store, &dir.path().join("a/pic.jpg"), b"same");
        add(&store, &elsewhere.path().join("pic.jpg"), b"same");
        add(&store, &dir.path().join("c/one.jpg"), b"other");
        let movable = add(&store, &dir.path().join("c/two.jpg"), b"other");

        let mut guard = RunGuard::begin(
            &store,
            LockName::Deduplicate,
            false,
            &policy(),
            CancellationToken::new(),
        )
        .unwrap();
        let err = DedupeRun::new(&store, &LocalFileSystem, &folders)
            .execute(&mut guard)
            .unwrap_err();

        assert_eq!(err.exit_status(), ExitStatus::ConfigError);
        assert_eq!(
            store.get_file(movable).unwrap().unwrap().status,
            FileStatus::Scanned
        );
    }
}
