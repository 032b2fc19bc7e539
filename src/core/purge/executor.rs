//! Irreversible deletion of planned targets.

use super::{PurgeConfirmation, PurgePlan, PurgeTarget};
use crate::core::fs::FileSystem;
use crate::core::report::{Issue, IssueKind};
use crate::core::run::RunGuard;
use crate::core::store::RecordStore;
use crate::error::DedupError;
use crate::events::{Event, EventSender, PurgeEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeOutcome {
    pub purged: usize,
    pub bytes_reclaimed: u64,
    pub issues: Vec<Issue>,
    pub cancelled: bool,
}

pub struct PurgeExecutor<'a> {
    store: &'a dyn RecordStore,
    fs: &'a dyn FileSystem,
    events: EventSender,
}

impl<'a> PurgeExecutor<'a> {
    pub fn new(store: &'a dyn RecordStore, fs: &'a dyn FileSystem, events: EventSender) -> Self {
        Self { store, fs, events }
    }

    /// Delete every target, then retire its record. Failures are collected
    /// and the remaining targets still run.
    pub fn execute(
        &self,
        plan: &PurgePlan,
        _confirmation: PurgeConfirmation,
        guard: &mut RunGuard<'_>,
    ) -> Result<PurgeOutcome, DedupError> {
        let mut outcome = PurgeOutcome::default();

        for target in &plan.targets {
            match guard.checkpoint() {
                Err(DedupError::Cancelled) => {
                    outcome.cancelled = true;
                    break;
                }
                other => other?,
            }

            match self.purge_one(target) {
                Ok(()) => {
                    outcome.purged += 1;
                    outcome.bytes_reclaimed += target.size;
                    self.events.send(Event::Purge(PurgeEvent::Purged {
                        path: target.path.clone(),
                        bytes: target.size,
                    }));
                }
                Err(issue) => {
                    self.events.send(Event::Purge(PurgeEvent::Failed {
                        path: target.path.clone(),
                        message: issue.message.clone(),
                    }));
                    outcome.issues.push(issue);
                }
            }
        }

        self.events.send(Event::Purge(PurgeEvent::Completed {
            purged: outcome.purged,
            bytes_reclaimed: outcome.bytes_reclaimed,
        }));
        Ok(outcome)
    }

    fn purge_one(&self, target: &PurgeTarget) -> Result<(), Issue> {
        let id = target.record_id;

        self.fs.remove_file(&target.path).map_err(|e| {
            warn!(path = %target.path.display(), error = %e, "delete failed, skipping");
            Issue::new(IssueKind::TransientIo, &target.path, e.to_string()).for_record(id)
        })?;

        self.store.mark_deleted(id).map_err(|e| {
            error!(id, path = %target.path.display(), error = %e, "file deleted but its record is still active");
            Issue::new(
                IssueKind::StoreInconsistency,
                &target.path,
                format!("file was deleted but the record update failed: {}. Reconcile manually.", e),
            )
            .for_record(id)
        })?;

        debug!(id, path = %target.path.display(), bytes = target.size, "purged");
        Ok(())
    }
}
