//! Enumerates duplicate folders and classifies what is found there.

use super::{OrphanedFile, ProtectedFile, PurgeFilters, PurgePlan, PurgeTarget, MAX_BATCH_SIZE};
use crate::core::fs::FileSystem;
use crate::core::report::{Issue, IssueKind};
use crate::core::run::RunGuard;
use crate::core::scanner::MediaFile;
use crate::core::store::{FileRecord, RecordStore};
use crate::error::{DedupError, StoreError};
use crate::events::{Event, EventSender, PurgeEvent};
use chrono::Utc;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub struct PurgePlanner<'a> {
    store: &'a dyn RecordStore,
    fs: &'a dyn FileSystem,
    batch_size: usize,
    events: EventSender,
}

impl<'a> PurgePlanner<'a> {
    pub fn new(store: &'a dyn RecordStore, fs: &'a dyn FileSystem, batch_size: usize) -> Self {
        Self {
            store,
            fs,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            events: crate::events::null_sender(),
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Build the plan from one snapshot of the folders and the store.
    ///
    /// Orphans (no active record) are never targets, whatever the filters.
    pub fn plan(
        &self,
        folders: &[PathBuf],
        filters: &PurgeFilters,
        guard: &mut RunGuard<'_>,
    ) -> Result<PurgePlan, DedupError> {
        let mut plan = PurgePlan {
            folders: folders.to_vec(),
            ..Default::default()
        };

        let mut files: Vec<MediaFile> = Vec::new();
        for folder in folders {
            if !self.fs.exists(folder) {
                warn!(folder = %folder.display(), "duplicate folder does not exist, skipping");
                continue;
            }
            let listed = self.fs.list_files(folder, true)?;
            for error in listed.errors {
                plan.issues
                    .push(Issue::new(IssueKind::TransientIo, folder, error.to_string()));
            }
            files.extend(listed.files);
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        debug!(files = files.len(), "duplicate folders enumerated");

        let now = Utc::now();
        for batch in files.chunks(self.batch_size) {
            guard.checkpoint()?;
            let paths: Vec<PathBuf> = batch.iter().map(|f| f.path.clone()).collect();
            let records = self.store.find_active_by_paths(&paths)?;

            let mut selected: Vec<(&MediaFile, &FileRecord)> = Vec::new();
            for file in batch {
                match records.get(&file.path) {
                    None => plan.orphaned.push(OrphanedFile {
                        path: file.path.clone(),
                        size: file.size,
                    }),
                    Some(record) if filters.matches(&file.path, file.modified, now) => {
                        selected.push((file, record))
                    }
                    Some(_) => plan.filtered_out += 1,
                }
            }

            let ids: Vec<i64> = selected.iter().map(|(_, record)| record.id).collect();
            let dependents = self.store.count_duplicates_of(&ids)?;
            for (file, record) in selected {
                let anchored = dependents.get(&record.id).copied().unwrap_or(0);
                match self.protection(record, anchored)? {
                    Some(reason) => {
                        warn!(id = record.id, path = %file.path.display(), %reason, "kept out of purge");
                        plan.issues.push(
                            Issue::new(IssueKind::NeedsReview, &file.path, reason.clone())
                                .for_record(record.id),
                        );
                        plan.protected.push(ProtectedFile {
                            record_id: record.id,
                            path: file.path.clone(),
                            size: file.size,
                            reason,
                        });
                    }
                    None => plan.targets.push(PurgeTarget {
                        record_id: record.id,
                        path: file.path.clone(),
                        size: file.size,
                        status: record.status,
                    }),
                }
            }
        }

        info!(
            targets = plan.targets.len(),
            protected = plan.protected.len(),
            orphaned = plan.orphaned.len(),
            filtered_out = plan.filtered_out,
            "purge plan ready"
        );
        self.events.send(Event::Purge(PurgeEvent::Classified {
            registered: plan.targets.len() + plan.protected.len() + plan.filtered_out,
            orphaned: plan.orphaned.len(),
            targets: plan.targets.len(),
        }));
        Ok(plan)
    }

    /// Why a registered file must not be deleted, if anything.
    ///
    /// Only a duplicate whose lineage ends at another active record is
    /// safe: that record still holds the content.
    fn protection(&self, record: &FileRecord, dependents: usize) -> Result<Option<String>, DedupError> {
        if dependents > 0 {
            return Ok(Some(format!(
                "{} duplicate records still point at this file",
                dependents
            )));
        }
        match self.store.resolve_canonical(record.id) {
            Ok(canonical) if canonical.id == record.id => Ok(Some(format!(
                "record has status {} and is the kept copy of its content",
                record.status
            ))),
            Ok(canonical) if !canonical.status.is_active() => Ok(Some(format!(
                "its survivor #{} is deleted, so this may be the last copy",
                canonical.id
            ))),
            Ok(_) => Ok(None),
            Err(e @ (StoreError::NotFound { .. } | StoreError::LineageViolation(_))) => {
                Ok(Some(format!("duplicate lineage is broken: {}", e)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fs::LocalFileSystem;
    use crate::core::lock::{LockName, LockPolicy};
    use crate::core::run::CancellationToken;
    use crate::core::store::{LockHolder, NewFileRecord, SqliteStore};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn add(store: &SqliteStore, path: &Path) -> FileRecord {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"same").unwrap();
        store
            .insert_file(&NewFileRecord {
                path: path.to_path_buf(),
                size: 4,
                modified: None,
                content_hash: "h".to_string(),
                similarity_hash: None,
            })
            .unwrap()
    }

    fn plan(store: &SqliteStore, folder: &Path) -> PurgePlan {
        let policy = LockPolicy::default()
            .with_holder(LockHolder::new(5, "test"))
            .with_poll_interval(Duration::ZERO);
        let mut guard =
            RunGuard::begin(store, LockName::Purge, true, &policy, CancellationToken::new()).unwrap();
        PurgePlanner::new(store, &LocalFileSystem, 10)
            .plan(&[folder.to_path_buf()], &PurgeFilters::new(), &mut guard)
            .unwrap()
    }

    #[test]
    fn anchor_of_duplicates_is_protected() {
        let dir = TempDir::new().unwrap();
        let dups = dir.path().join("duplicates");
        let store = SqliteStore::open_in_memory().unwrap();
        let anchor = add(&store, &dups.join("a.jpg"));
        let dependent = add(&store, &dir.path().join("b.jpg"));
        std::fs::rename(&dependent.path, dups.join("b.jpg")).unwrap();
        store
            .mark_duplicate(dependent.id, anchor.id, &dups.join("b.jpg"))
            .unwrap();

        let plan = plan(&store, &dups);

        assert_eq!(plan.protected.len(), 1);
        assert_eq!(plan.protected[0].record_id, anchor.id);
        assert_eq!(plan.issues[0].kind, IssueKind::NeedsReview);
        // The anchor stays, so its duplicate may go
        assert_eq!(plan.targets.len(), 1);
        assert_eq!(plan.targets[0].record_id, dependent.id);
    }

    #[test]
    fn duplicate_of_deleted_survivor_is_protected() {
        let dir = TempDir::new().unwrap();
        let dups = dir.path().join("duplicates");
        let store = SqliteStore::open_in_memory().unwrap();
        let survivor = add(&store, &dir.path().join("a.jpg"));
        let parked = add(&store, &dups.join("b.jpg"));
        store.mark_duplicate(parked.id, survivor.id, &parked.path).unwrap();
        store.mark_deleted(survivor.id).unwrap();

        let plan = plan(&store, &dups);

        assert!(plan.targets.is_empty());
        assert_eq!(plan.protected.len(), 1);
        assert!(plan.protected[0].reason.contains("deleted"));
    }

    #[test]
    fn duplicate_of_live_survivor_is_a_target() {
        let dir = TempDir::new().unwrap();
        let dups = dir.path().join("duplicates");
        let store = SqliteStore::open_in_memory().unwrap();
        let survivor = add(&store, &dir.path().join("a.jpg"));
        let parked = add(&store, &dups.join("b.jpg"));
        store.mark_duplicate(parked.id, survivor.id, &parked.path).unwrap();

        let plan = plan(&store, &dups);

        assert!(plan.protected.is_empty());
        assert_eq!(plan.targets.len(), 1);
        assert_eq!(plan.targets[0].record_id, parked.id);
    }
}
