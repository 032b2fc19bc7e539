//! Applies a move plan, one candidate at a time.

use super::{GroupPlan, MoveAction, MovePlan, PlannedMove};
use crate::core::fs::FileSystem;
use crate::core::report::{Issue, IssueKind};
use crate::core::run::RunGuard;
use crate::core::store::RecordStore;
use crate::error::DedupError;
use crate::events::{DedupeEvent, Event, EventSender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// What applying a plan did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub moved: usize,
    pub relinked: usize,
    pub promoted: usize,
    /// Survivors moved back out of a duplicate folder
    pub restored: usize,
    pub bytes_moved: u64,
    pub issues: Vec<Issue>,
    pub cancelled: bool,
}

/// Executes move plans against the filesystem and the record store
pub struct MoveExecutor<'a> {
    store: &'a dyn RecordStore,
    fs: &'a dyn FileSystem,
    events: EventSender,
}

impl<'a> MoveExecutor<'a> {
    pub fn new(store: &'a dyn RecordStore, fs: &'a dyn FileSystem, events: EventSender) -> Self {
        Self { store, fs, events }
    }

    /// Apply every group. Per-file failures are collected and the rest of
    /// the plan continues; cancellation stops between candidates.
    pub fn apply(
        &self,
        plan: &MovePlan,
        guard: &mut RunGuard<'_>,
    ) -> Result<ApplyOutcome, DedupError> {
        let mut outcome = ApplyOutcome::default();

        'groups: for group in &plan.groups {
            if group.failure.is_some() {
                continue;
            }
            if let Some(restore) = &group.restore_survivor {
                match guard.checkpoint() {
                    Err(DedupError::Cancelled) => {
                        outcome.cancelled = true;
                        break 'groups;
                    }
                    other => other?,
                }
                if !self.restore(group, restore, &mut outcome) {
                    continue;
                }
            } else if group.promote_survivor && !self.promote(group, &mut outcome) {
                continue;
            }

            for planned in &group.moves {
                match guard.checkpoint() {
                    Err(DedupError::Cancelled) => {
                        outcome.cancelled = true;
                        break 'groups;
                    }
                    other => other?,
                }

                match self.apply_one(group.survivor_id, planned) {
                    Ok(()) => {
                        match planned.action {
                            MoveAction::Move => {
                                outcome.moved += 1;
                                outcome.bytes_moved += planned.size;
                            }
                            MoveAction::Relink => outcome.relinked += 1,
                        }
                        self.events.send(Event::Dedupe(DedupeEvent::Moved {
                            record_id: planned.record_id,
                            survivor_id: group.survivor_id,
                            from: planned.source.clone(),
                            to: planned.destination.clone(),
                        }));
                    }
                    Err(issue) => {
                        self.events.send(Event::Dedupe(DedupeEvent::Failed {
                            record_id: planned.record_id,
                            path: planned.source.clone(),
                            message: issue.message.clone(),
                        }));
                        outcome.issues.push(issue);
                    }
                }
            }
        }

        self.events.send(Event::Dedupe(DedupeEvent::Completed {
            moved: outcome.moved + outcome.relinked,
            failed: outcome.issues.len(),
        }));
        Ok(outcome)
    }

    /// Move a parked survivor back to its original path and promote it there.
    /// The group's candidates only move if this succeeds.
    fn restore(&self, group: &GroupPlan, restore: &PlannedMove, outcome: &mut ApplyOutcome) -> bool {
        let id = group.survivor_id;
        let moved = restore
            .destination
            .parent()
            .map_or(Ok(()), |parent| self.fs.create_dir_all(parent))
            .and_then(|_| self.fs.move_file(&restore.source, &restore.destination));
        if let Err(e) = moved {
            warn!(id, from = %restore.source.display(), error = %e, "could not restore survivor, skipping group");
            outcome.issues.push(
                Issue::new(IssueKind::TransientIo, &restore.source, e.to_string()).for_record(id),
            );
            return false;
        }

        match self.store.promote_survivor(id, &restore.destination) {
            Ok(_) => {
                debug!(id, to = %restore.destination.display(), "survivor restored");
                outcome.restored += 1;
                outcome.promoted += 1;
                self.events.send(Event::Dedupe(DedupeEvent::Restored {
                    record_id: id,
                    from: restore.source.clone(),
                    to: restore.destination.clone(),
                }));
                true
            }
            Err(e) => {
                error!(
                    id,
                    from = %restore.source.display(),
                    to = %restore.destination.display(),
                    error = %e,
                    "survivor moved but its record was not updated"
                );
                outcome.issues.push(
                    Issue::new(
                        IssueKind::StoreInconsistency,
                        &restore.destination,
                        format!(
                            "survivor moved from {} but the record update failed: {}. Reconcile manually.",
                            restore.source.display(),
                            e
                        ),
                    )
                    .for_record(id),
                );
                false
            }
        }
    }

    fn promote(&self, group: &GroupPlan, outcome: &mut ApplyOutcome) -> bool {
        match self.store.promote_survivor(group.survivor_id, &group.survivor_path) {
            Ok(_) => {
                debug!(id = group.survivor_id, "survivor restored to scanned");
                outcome.promoted += 1;
                true
            }
            Err(e) => {
                warn!(id = group.survivor_id, error = %e, "could not promote survivor, skipping group");
                outcome.issues.push(
                    Issue::new(IssueKind::Store, &group.survivor_path, e.to_string())
                        .for_record(group.survivor_id),
                );
                false
            }
        }
    }

    fn apply_one(&self, survivor_id: i64, planned: &PlannedMove) -> Result<(), Issue> {
        let id = planned.record_id;

        if planned.action == MoveAction::Relink {
            return self
                .store
                .mark_duplicate(id, survivor_id, &planned.destination)
                .map(|_| ())
                .map_err(|e| Issue::new(IssueKind::Store, &planned.source, e.to_string()).for_record(id));
        }

        if let Some(parent) = planned.destination.parent() {
            self.fs.create_dir_all(parent).map_err(|e| {
                warn!(path = %parent.display(), error = %e, "cannot create duplicate folder");
                Issue::new(IssueKind::TransientIo, &planned.source, e.to_string()).for_record(id)
            })?;
        }

        self.fs
            .move_file(&planned.source, &planned.destination)
            .map_err(|e| {
                warn!(from = %planned.source.display(), to = %planned.destination.display(), error = %e, "move failed");
                Issue::new(IssueKind::TransientIo, &planned.source, e.to_string()).for_record(id)
            })?;

        self.store
            .mark_duplicate(id, survivor_id, &planned.destination)
            .map(|_| ())
            .map_err(|e| {
                error!(
                    id,
                    from = %planned.source.display(),
                    to = %planned.destination.display(),
                    error = %e,
                    "file moved but its record was not updated"
                );
                Issue::new(
                    IssueKind::StoreInconsistency,
                    &planned.destination,
                    format!(
                        "moved from {} but the record update failed: {}. Reconcile manually.",
                        planned.source.display(),
                        e
                    ),
                )
                .for_record(id)
            })
    }
}
