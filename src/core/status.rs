//! Read-only overview of the record store.

use crate::core::dedupe::group_duplicates;
use crate::core::lock::LockManager;
use crate::core::store::{FileStatus, LockRecord, RecordStore, StatusCounts};
use crate::error::StoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub counts: StatusCounts,
    pub live_locks: Vec<LockRecord>,
    pub stale_locks: Vec<LockRecord>,
    /// Groups with at least one candidate not yet settled
    pub pending_groups: usize,
    pub pending_candidates: usize,
}

/// Gather counts, locks and pending duplicate groups. Takes no lock.
pub fn status(store: &dyn RecordStore) -> Result<StatusReport, StoreError> {
    let manager = LockManager::new(store);
    let groups = group_duplicates(store.list_active_files()?, &[]);

    let mut pending_groups = 0;
    let mut pending_candidates = 0;
    for group in &groups {
        let pending = group
            .candidates
            .iter()
            .filter(|c| {
                c.status != FileStatus::Duplicate || c.duplicate_of_id != Some(group.survivor.id)
            })
            .count();
        if pending > 0 {
            pending_groups += 1;
            pending_candidates += pending;
        }
    }

    Ok(StatusReport {
        counts: store.status_counts()?,
        live_locks: manager.list()?,
        stale_locks: manager.stale()?,
        pending_groups,
        pending_candidates,
    })
}
