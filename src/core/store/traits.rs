//! Record store trait definition.

use super::{FileRecord, LockHolder, LockRecord, NewFileRecord, StatusCounts};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Result of an atomic lock acquisition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LockAttempt {
    /// The lock row was written for the caller
    Acquired(LockRecord),
    /// A live lock with that name already exists
    Held(LockRecord),
}

/// Trait for record store backends
///
/// Passed explicitly into every component; nothing reaches the store
/// through global state.
pub trait RecordStore: Send + Sync {
    /// Insert a newly discovered file with status `scanned`.
    ///
    /// Fails with `PathConflict` if an active record already owns the path.
    fn insert_file(&self, record: &NewFileRecord) -> Result<FileRecord, StoreError>;

    /// Record a new version of an existing file in one transaction: the
    /// previous record is flipped to `deleted` and the new record points
    /// back at it through `previous_version_id`.
    fn insert_version(
        &self,
        previous_id: i64,
        record: &NewFileRecord,
    ) -> Result<FileRecord, StoreError>;

    /// Refresh size/mtime of an unchanged file and move `new` to `scanned`
    fn touch_scanned(
        &self,
        id: i64,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Result<FileRecord, StoreError>;

    /// Fetch any record by id, including deleted ones
    fn get_file(&self, id: i64) -> Result<Option<FileRecord>, StoreError>;

    /// Fetch the active record at a path
    fn find_active_by_path(&self, path: &Path) -> Result<Option<FileRecord>, StoreError>;

    /// Batch lookup of active records by path.
    ///
    /// Callers bound the slice size; the store issues one query per call.
    fn find_active_by_paths(
        &self,
        paths: &[PathBuf],
    ) -> Result<HashMap<PathBuf, FileRecord>, StoreError>;

    /// All records (any status) sharing a content hash, ordered by id
    fn files_by_content_hash(&self, content_hash: &str) -> Result<Vec<FileRecord>, StoreError>;

    /// All non-deleted records, ordered by id
    fn list_active_files(&self) -> Result<Vec<FileRecord>, StoreError>;

    /// For each id, how many active `duplicate` records point at it.
    /// Ids with no dependents are absent from the map.
    ///
    /// Callers bound the slice size; the store issues one query per call.
    fn count_duplicates_of(&self, ids: &[i64]) -> Result<HashMap<i64, usize>, StoreError>;

    /// Settle a candidate as a duplicate of `survivor_id` after its file was
    /// moved to `new_path`. `original_path`/`original_name` are untouched.
    ///
    /// Rejects lineage that would not terminate at a non-duplicate record.
    /// Records that pointed at `id` are re-pointed at the survivor in the
    /// same transaction.
    fn mark_duplicate(
        &self,
        id: i64,
        survivor_id: i64,
        new_path: &Path,
    ) -> Result<FileRecord, StoreError>;

    /// Make `id` a group survivor again: status `scanned`, no
    /// `duplicate_of_id`, and `path`/`name` set to where its file now lives.
    ///
    /// Fails with `PathConflict` if another active record owns `path`.
    fn promote_survivor(&self, id: i64, path: &Path) -> Result<FileRecord, StoreError>;

    /// Flip a record to `deleted`. The row is never removed.
    fn mark_deleted(&self, id: i64) -> Result<FileRecord, StoreError>;

    /// Assign a cluster identifier to a set of records
    fn set_related(&self, ids: &[i64], related_id: i64) -> Result<usize, StoreError>;

    /// Count records by status
    fn status_counts(&self) -> Result<StatusCounts, StoreError>;

    /// Atomically acquire the named lock unless a live one exists.
    ///
    /// An expired row is replaced inside the same transaction.
    fn try_acquire_lock(
        &self,
        name: &str,
        holder: &LockHolder,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<LockAttempt, StoreError>;

    /// Extend the expiry of a lock still owned by `token`.
    ///
    /// Returns false when the lock is no longer ours.
    fn refresh_lock(
        &self,
        name: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Delete the lock row if it is still owned by `token`
    fn release_lock(&self, name: &str, token: &str) -> Result<bool, StoreError>;

    /// The raw lock row, expired or not
    fn get_lock(&self, name: &str) -> Result<Option<LockRecord>, StoreError>;

    /// All lock rows, expired or not
    fn list_locks(&self) -> Result<Vec<LockRecord>, StoreError>;

    /// Remove lock rows whose expiry is at or before `now`
    fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Follow `duplicate_of_id` links to the terminal record
    fn resolve_canonical(&self, id: i64) -> Result<FileRecord, StoreError> {
        let mut current = self.get_file(id)?.ok_or(StoreError::NotFound { id })?;
        let mut hops = 0usize;
        while let Some(next) = current.duplicate_of_id {
            hops += 1;
            if hops > 64 {
                return Err(StoreError::LineageViolation(format!(
                    "duplicate_of chain from record {} does not terminate",
                    id
                )));
            }
            current = self
                .get_file(next)?
                .ok_or(StoreError::NotFound { id: next })?;
        }
        Ok(current)
    }

    /// Follow `previous_version_id` links, newest first
    fn version_chain(&self, id: i64) -> Result<Vec<FileRecord>, StoreError> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current_id) = next {
            if chain.iter().any(|r: &FileRecord| r.id == current_id) {
                return Err(StoreError::LineageViolation(format!(
                    "previous_version chain from record {} loops at {}",
                    id, current_id
                )));
            }
            let record = self
                .get_file(current_id)?
                .ok_or(StoreError::NotFound { id: current_id })?;
            next = record.previous_version_id;
            chain.push(record);
        }
        Ok(chain)
    }
}
