//! Shared fixtures for integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use media_dedup::core::fingerprint::content_hash;
use media_dedup::core::fs::{FileMeta, FileSystem, LocalFileSystem};
use media_dedup::core::lock::LockPolicy;
use media_dedup::core::scanner::ScanResult;
use media_dedup::core::store::{
    FileRecord, LockAttempt, LockHolder, LockRecord, NewFileRecord, RecordStore, SqliteStore,
    StatusCounts,
};
use media_dedup::core::{CancellationToken, LockName, RunGuard};
use media_dedup::error::{DedupError, ScanError, StoreError};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Lock policy for holder `pid` that re-checks locks at every checkpoint
pub fn policy(pid: u32) -> LockPolicy {
    LockPolicy::default()
        .with_holder(LockHolder::new(pid, "test-host"))
        .with_poll_interval(Duration::ZERO)
}

pub fn begin<'a>(
    store: &'a dyn RecordStore,
    name: LockName,
    dry_run: bool,
    pid: u32,
) -> Result<RunGuard<'a>, DedupError> {
    RunGuard::begin(store, name, dry_run, &policy(pid), CancellationToken::new())
}

/// Write `bytes` to `path` (creating parents) and register it in `store`
pub fn add_file(store: &dyn RecordStore, path: &Path, bytes: &[u8]) -> FileRecord {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
    store
        .insert_file(&NewFileRecord {
            path: path.to_path_buf(),
            size: bytes.len() as u64,
            modified: None,
            content_hash: content_hash(bytes),
            similarity_hash: None,
        })
        .unwrap()
}

/// Register `bytes` at `original` and a copy parked at `parked`, recorded
/// as its duplicate. Returns the parked record.
pub fn add_parked_duplicate(
    store: &dyn RecordStore,
    original: &Path,
    parked: &Path,
    bytes: &[u8],
) -> FileRecord {
    let survivor = add_file(store, original, bytes);
    let copy = add_file(store, parked, bytes);
    store.mark_duplicate(copy.id, survivor.id, parked).unwrap()
}

/// Register a record with a unique hash and no file on disk, to advance ids
pub fn add_filler(store: &dyn RecordStore, n: usize) {
    for i in 0..n {
        store
            .insert_file(&NewFileRecord {
                path: PathBuf::from(format!("/filler/{}.bin", i)),
                size: 1,
                modified: None,
                content_hash: format!("filler-{}", i),
                similarity_hash: None,
            })
            .unwrap();
    }
}

/// A record store that fails selected writes, delegating everything else
pub struct FailingStore {
    inner: SqliteStore,
    fail_mark_duplicate: HashSet<i64>,
    fail_mark_deleted: HashSet<i64>,
    fail_promote: HashSet<i64>,
}

impl FailingStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_mark_duplicate: HashSet::new(),
            fail_mark_deleted: HashSet::new(),
            fail_promote: HashSet::new(),
        }
    }

    pub fn fail_mark_duplicate(mut self, id: i64) -> Self {
        self.fail_mark_duplicate.insert(id);
        self
    }

    pub fn fail_mark_deleted(mut self, id: i64) -> Self {
        self.fail_mark_deleted.insert(id);
        self
    }

    pub fn fail_promote(mut self, id: i64) -> Self {
        self.fail_promote.insert(id);
        self
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }
}

fn injected() -> StoreError {
    StoreError::QueryFailed("injected failure".to_string())
}

impl RecordStore for FailingStore {
    fn insert_file(&self, record: &NewFileRecord) -> Result<FileRecord, StoreError> {
        self.inner.insert_file(record)
    }

    fn insert_version(&self, previous_id: i64, record: &NewFileRecord) -> Result<FileRecord, StoreError> {
        self.inner.insert_version(previous_id, record)
    }

    fn touch_scanned(
        &self,
        id: i64,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Result<FileRecord, StoreError> {
        self.inner.touch_scanned(id, size, modified)
    }

    fn get_file(&self, id: i64) -> Result<Option<FileRecord>, StoreError> {
        self.inner.get_file(id)
    }

    fn find_active_by_path(&self, path: &Path) -> Result<Option<FileRecord>, StoreError> {
        self.inner.find_active_by_path(path)
    }

    fn find_active_by_paths(&self, paths: &[PathBuf]) -> Result<HashMap<PathBuf, FileRecord>, StoreError> {
        self.inner.find_active_by_paths(paths)
    }

    fn files_by_content_hash(&self, content_hash: &str) -> Result<Vec<FileRecord>, StoreError> {
        self.inner.files_by_content_hash(content_hash)
    }

    fn list_active_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        self.inner.list_active_files()
    }

    fn count_duplicates_of(&self, ids: &[i64]) -> Result<HashMap<i64, usize>, StoreError> {
        self.inner.count_duplicates_of(ids)
    }

    fn mark_duplicate(&self, id: i64, survivor_id: i64, new_path: &Path) -> Result<FileRecord, StoreError> {
        if self.fail_mark_duplicate.contains(&id) {
            return Err(injected());
        }
        self.inner.mark_duplicate(id, survivor_id, new_path)
    }

    fn promote_survivor(&self, id: i64, path: &Path) -> Result<FileRecord, StoreError> {
        if self.fail_promote.contains(&id) {
            return Err(injected());
        }
        self.inner.promote_survivor(id, path)
    }

    fn mark_deleted(&self, id: i64) -> Result<FileRecord, StoreError> {
        if self.fail_mark_deleted.contains(&id) {
            return Err(injected());
        }
        self.inner.mark_deleted(id)
    }

    fn set_related(&self, ids: &[i64], related_id: i64) -> Result<usize, StoreError> {
        self.inner.set_related(ids, related_id)
    }

    fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        self.inner.status_counts()
    }

    fn try_acquire_lock(
        &self,
        name: &str,
        holder: &LockHolder,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<LockAttempt, StoreError> {
        self.inner.try_acquire_lock(name, holder, now, expires_at)
    }

    fn refresh_lock(&self, name: &str, token: &str, expires_at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.refresh_lock(name, token, expires_at)
    }

    fn release_lock(&self, name: &str, token: &str) -> Result<bool, StoreError> {
        self.inner.release_lock(name, token)
    }

    fn get_lock(&self, name: &str) -> Result<Option<LockRecord>, StoreError> {
        self.inner.get_lock(name)
    }

    fn list_locks(&self) -> Result<Vec<LockRecord>, StoreError> {
        self.inner.list_locks()
    }

    fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.delete_expired_locks(now)
    }
}

/// A filesystem that fails moves or deletes of selected source paths
#[derive(Default)]
pub struct FailingFs {
    fail_moves: HashSet<PathBuf>,
    fail_removes: HashSet<PathBuf>,
    /// Every completed move, in order
    pub moves: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl FailingFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_move(mut self, from: &Path) -> Self {
        self.fail_moves.insert(from.to_path_buf());
        self
    }

    pub fn fail_remove(mut self, path: &Path) -> Self {
        self.fail_removes.insert(path.to_path_buf());
        self
    }
}

impl FileSystem for FailingFs {
    fn exists(&self, path: &Path) -> bool {
        LocalFileSystem.exists(path)
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        LocalFileSystem.metadata(path)
    }

    fn list_files(&self, root: &Path, recursive: bool) -> Result<ScanResult, ScanError> {
        LocalFileSystem.list_files(root, recursive)
    }

    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.fail_moves.contains(from) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected move failure"));
        }
        LocalFileSystem.move_file(from, to)?;
        self.moves
            .lock()
            .unwrap()
            .push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        if self.fail_removes.contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected delete failure"));
        }
        LocalFileSystem.remove_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        LocalFileSystem.create_dir_all(path)
    }
}
