//! # Similar Photos Module
//!
//! Clusters records whose similarity hashes are close but whose bytes
//! differ: burst shots, re-encodes, resized copies.
//!
//! ## Difference from Duplicates
//! - Duplicates: identical content hash, moved by `dedupe`
//! - Similar: Hamming distance of similarity hashes within a threshold,
//!   only ever labelled through `related_id`, never moved
//!
//! Finding clusters is read-only and needs no lock. Writing `related_id`
//! runs under the `deduplicate` lock; `find_and_assign` reads the records
//! only once that lock is held, so what gets written matches the store.

mod clusterer;
mod types;

pub use clusterer::cluster_records;
pub use types::{SimilarCluster, SimilarMember, SimilarReport};

use crate::core::run::RunGuard;
use crate::core::store::RecordStore;
use crate::error::DedupError;
use crate::events::{EventSender, OperationSummary, Phase};
use std::time::Instant;
use tracing::info;

pub struct SimilarRun<'a> {
    store: &'a dyn RecordStore,
    threshold: u32,
    events: EventSender,
}

impl<'a> SimilarRun<'a> {
    pub fn new(store: &'a dyn RecordStore, threshold: u32) -> Self {
        Self {
            store,
            threshold,
            events: crate::events::null_sender(),
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Cluster the current records
    pub fn find(&self) -> Result<SimilarReport, DedupError> {
        let started = Instant::now();
        self.events.started("similar", true);
        self.events.phase(Phase::Clustering);

        let records = self.store.list_active_files()?;
        let considered = records
            .iter()
            .filter(|r| r.similarity_hash.is_some())
            .count();
        let clusters = cluster_records(&records, self.threshold);

        let report = SimilarReport {
            threshold: self.threshold,
            records_considered: considered,
            clusters,
            assigned: None,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            considered,
            clusters = report.clusters.len(),
            threshold = self.threshold,
            "similarity clustering finished"
        );
        self.events.finished(
            OperationSummary {
                operation: "similar".to_string(),
                processed: considered,
                errors: 0,
                bytes: 0,
                duration_ms: report.duration_ms,
            },
            false,
        );
        Ok(report)
    }

    /// Write `related_id` (the lowest id of each cluster) for every member.
    /// A dry-run guard writes nothing.
    pub fn assign(
        &self,
        report: &mut SimilarReport,
        guard: &mut RunGuard<'_>,
    ) -> Result<usize, DedupError> {
        if guard.is_dry_run() {
            guard.verify()?;
            return Ok(0);
        }

        let mut updated = 0;
        for cluster in &report.clusters {
            guard.checkpoint()?;
            updated += self
                .store
                .set_related(&cluster.record_ids(), cluster.related_id)?;
        }
        info!(updated, clusters = report.clusters.len(), "related ids assigned");
        report.assigned = Some(updated);
        Ok(updated)
    }

    /// Cluster and assign inside one guarded run.
    pub fn find_and_assign(&self, guard: &mut RunGuard<'_>) -> Result<SimilarReport, DedupError> {
        guard.checkpoint()?;
        let mut report = self.find()?;
        self.assign(&mut report, guard)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lock::{LockName, LockPolicy};
    use crate::core::run::CancellationToken;
    use crate::core::store::{LockHolder, NewFileRecord, SqliteStore};
    use std::path::PathBuf;
    use std::time::Duration;

    fn add(store: &SqliteStore, name: &str, similarity: &str) -> i64 {
        store
            .insert_file(&NewFileRecord {
                path: PathBuf::from("/photos").join(name),
                size: 100,
                modified: None,
                content_hash: name.to_string(),
                similarity_hash: Some(similarity.to_string()),
            })
            .unwrap()
            .id
    }

    fn locked(store: &SqliteStore) -> RunGuard<'_> {
        let policy = LockPolicy::default()
            .with_holder(LockHolder::new(1, "test"))
            .with_poll_interval(Duration::ZERO);
        RunGuard::begin(
            store,
            LockName::Deduplicate,
            false,
            &policy,
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn assign_writes_lowest_id_to_members() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = add(&store, "a.jpg", "ff00ff00ff00ff00");
        let b = add(&store, "b.jpg", "ff00ff00ff00ff01");
        let c = add(&store, "c.jpg", "00ff00ff00ff00ff");

        let run = SimilarRun::new(&store, 4);
        let mut report = run.find().unwrap();
        let mut guard = locked(&store);

        let updated = run.assign(&mut report, &mut guard).unwrap();

        assert_eq!(updated, 2);
        assert_eq!(store.get_file(b).unwrap().unwrap().related_id, Some(a));
        assert_eq!(store.get_file(c).unwrap().unwrap().related_id, None);
    }

    #[test]
    fn records_are_read_once_the_lock_is_held() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = add(&store, "a.jpg", "ff00ff00ff00ff00");
        let mut guard = locked(&store);
        let late = add(&store, "late.jpg", "ff00ff00ff00ff01");

        let report = SimilarRun::new(&store, 4)
            .find_and_assign(&mut guard)
            .unwrap();
        guard.finish().unwrap();

        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.assigned, Some(2));
        assert_eq!(store.get_file(late).unwrap().unwrap().related_id, Some(a));
    }

    #[test]
    fn cancelled_run_clusters_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = add(&store, "a.jpg", "ff00ff00ff00ff00");
        add(&store, "b.jpg", "ff00ff00ff00ff01");
        let cancel = CancellationToken::new();
        let policy = LockPolicy::default()
            .with_holder(LockHolder::new(1, "test"))
            .with_poll_interval(Duration::ZERO);
        let mut guard =
            RunGuard::begin(&store, LockName::Deduplicate, false, &policy, cancel.clone()).unwrap();
        cancel.cancel();

        let result = SimilarRun::new(&store, 4).find_and_assign(&mut guard);

        assert!(matches!(result, Err(DedupError::Cancelled)));
        assert_eq!(store.get_file(a).unwrap().unwrap().related_id, None);
    }
}
