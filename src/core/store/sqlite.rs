//! SQLite record store backend.

use super::{
    file_name_of, FileRecord, FileStatus, LockAttempt, LockHolder, LockRecord, NewFileRecord,
    RecordStore, StatusCounts,
};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    original_path TEXT NOT NULL,
    name TEXT NOT NULL,
    original_name TEXT NOT NULL,
    size INTEGER NOT NULL,
    file_modified INTEGER,
    content_hash TEXT NOT NULL,
    similarity_hash TEXT,
    duplicate_of_id INTEGER REFERENCES files(id),
    previous_version_id INTEGER REFERENCES files(id),
    related_id INTEGER,
    status TEXT NOT NULL CHECK (status IN ('new', 'scanned', 'duplicate', 'deleted')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (status != 'duplicate' OR duplicate_of_id IS NOT NULL),
    CHECK (duplicate_of_id IS NULL OR duplicate_of_id != id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_files_active_path ON files(path) WHERE status != 'deleted';
CREATE INDEX IF NOT EXISTS idx_files_content_hash ON files(content_hash);
CREATE INDEX IF NOT EXISTS idx_files_similarity_hash ON files(similarity_hash);
CREATE INDEX IF NOT EXISTS idx_files_duplicate_of ON files(duplicate_of_id);
CREATE INDEX IF NOT EXISTS idx_files_previous_version ON files(previous_version_id);

CREATE TABLE IF NOT EXISTS locks (
    name TEXT PRIMARY KEY,
    holder_pid INTEGER NOT NULL,
    holder_host TEXT NOT NULL,
    token TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
";

const FILE_COLUMNS: &str = "id, path, original_path, name, original_name, size, file_modified, \
     content_hash, similarity_hash, duplicate_of_id, previous_version_id, related_id, \
     status, created_at, updated_at";

const LOCK_COLUMNS: &str = "name, holder_pid, holder_host, token, acquired_at, expires_at";

/// SQLite-backed record store
///
/// Uses WAL mode so read-only inspection proceeds while another process
/// writes, and `BEGIN IMMEDIATE` transactions so check-then-write sequences
/// are atomic across processes sharing the database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create a record store at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::OpenFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| StoreError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::initialize(conn, path.to_path_buf())
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;

        Self::initialize(conn, PathBuf::from(":memory:"))
    }

    fn initialize(conn: Connection, db_path: PathBuf) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::OpenFailed {
                path: db_path,
                reason: format!(
                    "schema version {} is newer than supported version {}",
                    version, SCHEMA_VERSION
                ),
            });
        }

        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
        debug!(path = %db_path.display(), "record store schema ready");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn fetch(conn: &Connection, id: i64) -> Result<Option<FileRecord>, StoreError> {
        let sql = format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS);
        Ok(conn.query_row(&sql, [id], map_file).optional()?)
    }

    fn fetch_required(conn: &Connection, id: i64) -> Result<FileRecord, StoreError> {
        Self::fetch(conn, id)?.ok_or(StoreError::NotFound { id })
    }

    fn fetch_active_by_path(
        conn: &Connection,
        path: &Path,
    ) -> Result<Option<FileRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM files WHERE path = ?1 AND status != 'deleted'",
            FILE_COLUMNS
        );
        Ok(conn
            .query_row(&sql, [path_text(path)], map_file)
            .optional()?)
    }

    fn ensure_path_free(
        conn: &Connection,
        path: &Path,
        owner: Option<i64>,
    ) -> Result<(), StoreError> {
        if let Some(existing) = Self::fetch_active_by_path(conn, path)? {
            if Some(existing.id) != owner {
                return Err(StoreError::PathConflict {
                    path: path.to_path_buf(),
                    existing_id: existing.id,
                });
            }
        }
        Ok(())
    }

    fn insert_row(
        conn: &Connection,
        record: &NewFileRecord,
        previous_version_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<FileRecord, StoreError> {
        let path = path_text(&record.path);
        let name = record.name();
        let now_ms = to_millis(now);

        conn.execute(
            "INSERT INTO files
             (path, original_path, name, original_name, size, file_modified, content_hash,
              similarity_hash, previous_version_id, status, created_at, updated_at)
             VALUES (?1, ?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, 'scanned', ?8, ?8)",
            params![
                path,
                name,
                record.size as i64,
                record.modified.map(to_millis),
                record.content_hash,
                record.similarity_hash,
                previous_version_id,
                now_ms,
            ],
        )?;
        // Rows are only written once fingerprinted, so they skip `new`.
        Self::fetch_required(conn, conn.last_insert_rowid())
    }

    fn fetch_lock(conn: &Connection, name: &str) -> Result<Option<LockRecord>, StoreError> {
        let sql = format!("SELECT {} FROM locks WHERE name = ?1", LOCK_COLUMNS);
        Ok(conn.query_row(&sql, [name], map_lock).optional()?)
    }
}

impl RecordStore for SqliteStore {
    fn insert_file(&self, record: &NewFileRecord) -> Result<FileRecord, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        Self::ensure_path_free(&tx, &record.path, None)?;
        let inserted = Self::insert_row(&tx, record, None, Utc::now())?;

        tx.commit()?;
        Ok(inserted)
    }

    fn insert_version(
        &self,
        previous_id: i64,
        record: &NewFileRecord,
    ) -> Result<FileRecord, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous = Self::fetch_required(&tx, previous_id)?;
        if !previous.status.is_active() {
            return Err(StoreError::LineageViolation(format!(
                "record {} is already deleted and cannot gain a newer version",
                previous_id
            )));
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE files SET status = 'deleted', updated_at = ?1 WHERE id = ?2",
            params![to_millis(now), previous_id],
        )?;

        Self::ensure_path_free(&tx, &record.path, None)?;
        let inserted = Self::insert_row(&tx, record, Some(previous_id), now)?;

        tx.commit()?;
        Ok(inserted)
    }

    fn touch_scanned(
        &self,
        id: i64,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Result<FileRecord, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = Self::fetch_required(&tx, id)?;
        let status = match record.status {
            FileStatus::New => FileStatus::Scanned,
            other => other,
        };

        tx.execute(
            "UPDATE files SET size = ?1, file_modified = ?2, status = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                size as i64,
                modified.map(to_millis),
                status.as_str(),
                to_millis(Utc::now()),
                id
            ],
        )?;

        let updated = Self::fetch_required(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    fn get_file(&self, id: i64) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn find_active_by_path(&self, path: &Path) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.conn()?;
        Self::fetch_active_by_path(&conn, path)
    }

    fn find_active_by_paths(
        &self,
        paths: &[PathBuf],
    ) -> Result<HashMap<PathBuf, FileRecord>, StoreError> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn()?;
        let placeholders = vec!["?"; paths.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM files WHERE status != 'deleted' AND path IN ({})",
            FILE_COLUMNS, placeholders
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(paths.iter().map(|p| path_text(p))), map_file)?;

        let mut found = HashMap::new();
        for row in rows {
            let record = row?;
            found.insert(record.path.clone(), record);
        }
        Ok(found)
    }

    fn files_by_content_hash(&self, content_hash: &str) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM files WHERE content_hash = ?1 ORDER BY id",
            FILE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([content_hash], map_file)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn list_active_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM files WHERE status != 'deleted' ORDER BY id",
            FILE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], map_file)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count_duplicates_of(&self, ids: &[i64]) -> Result<HashMap<i64, usize>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT duplicate_of_id, COUNT(*) FROM files
             WHERE status = 'duplicate' AND duplicate_of_id IN ({})
             GROUP BY duplicate_of_id",
            placeholders
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (id, count) = row?;
            counts.insert(id, count);
        }
        Ok(counts)
    }

    fn mark_duplicate(
        &self,
        id: i64,
        survivor_id: i64,
        new_path: &Path,
    ) -> Result<FileRecord, StoreError> {
        if id == survivor_id {
            return Err(StoreError::LineageViolation(format!(
                "record {} cannot be a duplicate of itself",
                id
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = Self::fetch_required(&tx, id)?;
        let survivor = Self::fetch_required(&tx, survivor_id)?;

        if !record.status.is_active() {
            return Err(StoreError::LineageViolation(format!(
                "record {} is deleted",
                id
            )));
        }
        if record.content_hash != survivor.content_hash {
            return Err(StoreError::LineageViolation(format!(
                "record {} and survivor {} have different content hashes",
                id, survivor_id
            )));
        }
        if matches!(survivor.status, FileStatus::Duplicate | FileStatus::Deleted) {
            return Err(StoreError::LineageViolation(format!(
                "survivor {} has status {} and cannot anchor duplicates",
                survivor_id, survivor.status
            )));
        }

        Self::ensure_path_free(&tx, new_path, Some(id))?;

        let now_ms = to_millis(Utc::now());

        // Anything that pointed at this record now points at the survivor,
        // so chains never grow past one hop.
        let repointed = tx.execute(
            "UPDATE files SET duplicate_of_id = ?1, updated_at = ?2
             WHERE duplicate_of_id = ?3 AND id != ?1",
            params![survivor_id, now_ms, id],
        )?;
        if repointed > 0 {
            debug!(id, survivor_id, repointed, "re-pointed dependent duplicates");
        }

        tx.execute(
            "UPDATE files SET path = ?1, name = ?2, status = 'duplicate', duplicate_of_id = ?3,
                 updated_at = ?4
             WHERE id = ?5",
            params![
                path_text(new_path),
                file_name_of(new_path),
                survivor_id,
                now_ms,
                id
            ],
        )?;

        let updated = Self::fetch_required(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    fn promote_survivor(&self, id: i64, path: &Path) -> Result<FileRecord, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = Self::fetch_required(&tx, id)?;
        if !record.status.is_active() {
            return Err(StoreError::LineageViolation(format!(
                "record {} is deleted and cannot become a survivor",
                id
            )));
        }
        Self::ensure_path_free(&tx, path, Some(id))?;

        tx.execute(
            "UPDATE files SET path = ?1, name = ?2, status = 'scanned', duplicate_of_id = NULL,
                 updated_at = ?3
             WHERE id = ?4",
            params![path_text(path), file_name_of(path), to_millis(Utc::now()), id],
        )?;

        let updated = Self::fetch_required(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    fn mark_deleted(&self, id: i64) -> Result<FileRecord, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        Self::fetch_required(&tx, id)?;
        tx.execute(
            "UPDATE files SET status = 'deleted', updated_at = ?1 WHERE id = ?2",
            params![to_millis(Utc::now()), id],
        )?;

        let updated = Self::fetch_required(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    fn set_related(&self, ids: &[i64], related_id: i64) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now_ms = to_millis(Utc::now());
        let mut updated = 0;
        for id in ids {
            updated += tx.execute(
                "UPDATE files SET related_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![related_id, now_ms, id],
            )?;
        }

        tx.commit()?;
        Ok(updated)
    }

    fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM files GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            match status.parse::<FileStatus>()? {
                FileStatus::New => counts.new = count,
                FileStatus::Scanned => counts.scanned = count,
                FileStatus::Duplicate => counts.duplicate = count,
                FileStatus::Deleted => counts.deleted = count,
            }
        }
        Ok(counts)
    }

    fn try_acquire_lock(
        &self,
        name: &str,
        holder: &LockHolder,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<LockAttempt, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = Self::fetch_lock(&tx, name)? {
            if existing.is_live_at(now) {
                return Ok(LockAttempt::Held(existing));
            }
            debug!(
                lock = name,
                holder = %existing.holder,
                expired_at = %existing.expires_at,
                "reclaiming stale lock"
            );
            tx.execute("DELETE FROM locks WHERE name = ?1", [name])?;
        }

        let record = LockRecord {
            name: name.to_string(),
            holder: holder.clone(),
            token: Uuid::new_v4().to_string(),
            acquired_at: truncate_millis(now),
            expires_at: truncate_millis(expires_at),
        };

        tx.execute(
            "INSERT INTO locks (name, holder_pid, holder_host, token, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.name,
                record.holder.pid as i64,
                record.holder.hostname,
                record.token,
                to_millis(record.acquired_at),
                to_millis(record.expires_at),
            ],
        )?;

        tx.commit()?;
        Ok(LockAttempt::Acquired(record))
    }

    fn refresh_lock(
        &self,
        name: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE locks SET expires_at = ?1 WHERE name = ?2 AND token = ?3",
            params![to_millis(expires_at), name, token],
        )?;
        Ok(updated == 1)
    }

    fn release_lock(&self, name: &str, token: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM locks WHERE name = ?1 AND token = ?2",
            params![name, token],
        )?;
        Ok(deleted == 1)
    }

    fn get_lock(&self, name: &str) -> Result<Option<LockRecord>, StoreError> {
        let conn = self.conn()?;
        Self::fetch_lock(&conn, name)
    }

    fn list_locks(&self) -> Result<Vec<LockRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM locks ORDER BY name", LOCK_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let locks = stmt
            .query_map([], map_lock)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locks)
    }

    fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM locks WHERE expires_at <= ?1",
            [to_millis(now)],
        )?;
        Ok(deleted)
    }
}

fn map_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let status: String = row.get(12)?;
    let status = status.parse::<FileStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(FileRecord {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        original_path: PathBuf::from(row.get::<_, String>(2)?),
        name: row.get(3)?,
        original_name: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        modified: row.get::<_, Option<i64>>(6)?.map(from_millis),
        content_hash: row.get(7)?,
        similarity_hash: row.get(8)?,
        duplicate_of_id: row.get(9)?,
        previous_version_id: row.get(10)?,
        related_id: row.get(11)?,
        status,
        created_at: from_millis(row.get(13)?),
        updated_at: from_millis(row.get(14)?),
    })
}

fn map_lock(row: &Row<'_>) -> rusqlite::Result<LockRecord> {
    Ok(LockRecord {
        name: row.get(0)?,
        holder: LockHolder::new(row.get::<_, i64>(1)? as u32, row.get::<_, String>(2)?),
        token: row.get(3)?,
        acquired_at: from_millis(row.get(4)?),
        expires_at: from_millis(row.get(5)?),
    })
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn truncate_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(to_millis(time))
}
