//! # Lock Module
//!
//! Named, leased locks that serialize destructive operations across
//! processes sharing one record store.
//!
//! ## Locks
//! - `scan` - ingesting files (long timeout)
//! - `deduplicate` - moving duplicates and writing clusters
//! - `purge` - deleting files from duplicate folders
//!
//! Each lock carries an expiry. A lock past its expiry counts as not held,
//! so a crashed holder never blocks the next run forever. Live holders
//! extend their lease with heartbeats.
//!
//! Dry runs never acquire; they watch with [`DryRunMonitor`] and abort
//! if a destructive run starts underneath them.

mod guard;
mod monitor;

pub use guard::LockGuard;
pub use monitor::DryRunMonitor;

use crate::core::store::{LockAttempt, LockHolder, LockRecord, RecordStore};
use crate::error::{DedupError, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// The three destructive operation classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockName {
    Scan,
    Deduplicate,
    Purge,
}

impl LockName {
    pub const ALL: [LockName; 3] = [LockName::Scan, LockName::Deduplicate, LockName::Purge];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockName::Scan => "scan",
            LockName::Deduplicate => "deduplicate",
            LockName::Purge => "purge",
        }
    }

    /// Lease length sized to outlast a normal run of this class
    pub fn default_timeout(&self) -> Duration {
        match self {
            LockName::Scan => Duration::from_secs(6 * 60 * 60),
            LockName::Deduplicate | LockName::Purge => Duration::from_secs(2 * 60 * 60),
        }
    }

    /// Locks that must not be live while this one is held.
    ///
    /// All three classes mutate `path`/`status` on overlapping records.
    pub fn conflicts(&self) -> Vec<LockName> {
        LockName::ALL
            .into_iter()
            .filter(|other| other != self)
            .collect()
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan" => Ok(LockName::Scan),
            "deduplicate" | "dedupe" => Ok(LockName::Deduplicate),
            "purge" => Ok(LockName::Purge),
            other => Err(format!("unknown lock '{}'", other)),
        }
    }
}

/// Lease and polling settings for the lock classes
#[derive(Debug, Clone, PartialEq)]
pub struct LockPolicy {
    pub holder: LockHolder,
    pub scan_timeout: Duration,
    pub deduplicate_timeout: Duration,
    pub purge_timeout: Duration,
    /// How often dry runs poll, and how often holders heartbeat
    pub poll_interval: Duration,
}

impl LockPolicy {
    pub fn timeout_for(&self, name: LockName) -> Duration {
        match name {
            LockName::Scan => self.scan_timeout,
            LockName::Deduplicate => self.deduplicate_timeout,
            LockName::Purge => self.purge_timeout,
        }
    }

    pub fn with_holder(mut self, holder: LockHolder) -> Self {
        self.holder = holder;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            holder: LockHolder::current(),
            scan_timeout: LockName::Scan.default_timeout(),
            deduplicate_timeout: LockName::Deduplicate.default_timeout(),
            purge_timeout: LockName::Purge.default_timeout(),
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Proof of a successful acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct LockToken {
    pub name: LockName,
    pub holder: LockHolder,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub(crate) token: String,
}

/// Result of an acquisition attempt. `Busy` is a normal outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    Acquired(LockToken),
    Busy(LockRecord),
}

impl LockOutcome {
    /// Turn `Busy` into the error an operation propagates upward
    pub fn into_result(self) -> Result<LockToken, DedupError> {
        match self {
            LockOutcome::Acquired(token) => Ok(token),
            LockOutcome::Busy(held) => Err(busy_error(&held)),
        }
    }
}

pub(crate) fn busy_error(held: &LockRecord) -> DedupError {
    DedupError::Busy {
        name: held.name.clone(),
        holder: held.holder.to_string(),
        acquired_at: held.acquired_at,
    }
}

/// Acquires, refreshes and releases named locks in a record store
#[derive(Clone, Copy)]
pub struct LockManager<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> LockManager<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Atomically take `name` for `holder` unless a live lock exists
    pub fn acquire(
        &self,
        name: LockName,
        holder: &LockHolder,
        timeout: Duration,
    ) -> Result<LockOutcome, StoreError> {
        let now = Utc::now();
        let attempt =
            self.store
                .try_acquire_lock(name.as_str(), holder, now, expiry_after(now, timeout))?;

        Ok(match attempt {
            LockAttempt::Acquired(record) => {
                info!(lock = %name, holder = %record.holder, expires_at = %record.expires_at, "lock acquired");
                LockOutcome::Acquired(LockToken {
                    name,
                    holder: record.holder,
                    acquired_at: record.acquired_at,
                    expires_at: record.expires_at,
                    token: record.token,
                })
            }
            LockAttempt::Held(record) => {
                info!(lock = %name, holder = %record.holder, acquired_at = %record.acquired_at, "lock busy");
                LockOutcome::Busy(record)
            }
        })
    }

    /// Release a lock. Returns false if it was no longer ours
    /// (expired and reclaimed by someone else).
    pub fn release(&self, token: &LockToken) -> Result<bool, StoreError> {
        let released = self.store.release_lock(token.name.as_str(), &token.token)?;
        if released {
            info!(lock = %token.name, "lock released");
        } else {
            debug!(lock = %token.name, "lock was already gone at release");
        }
        Ok(released)
    }

    /// The live holder of `name`, if any
    pub fn is_held(&self, name: LockName) -> Result<Option<LockRecord>, StoreError> {
        let now = Utc::now();
        Ok(self
            .store
            .get_lock(name.as_str())?
            .filter(|lock| lock.is_live_at(now)))
    }

    /// Extend the lease. Returns false if the lock is no longer ours.
    pub fn heartbeat(&self, token: &mut LockToken, timeout: Duration) -> Result<bool, StoreError> {
        let expires_at = expiry_after(Utc::now(), timeout);
        let refreshed = self
            .store
            .refresh_lock(token.name.as_str(), &token.token, expires_at)?;
        if refreshed {
            token.expires_at = expires_at;
            debug!(lock = %token.name, expires_at = %expires_at, "lock heartbeat");
        }
        Ok(refreshed)
    }

    /// Delete every expired lock row
    pub fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let removed = self.store.delete_expired_locks(Utc::now())?;
        if removed > 0 {
            info!(removed, "removed stale locks");
        }
        Ok(removed)
    }

    /// Live locks
    pub fn list(&self) -> Result<Vec<LockRecord>, StoreError> {
        let now = Utc::now();
        Ok(self
            .store
            .list_locks()?
            .into_iter()
            .filter(|lock| lock.is_live_at(now))
            .collect())
    }

    /// Expired lock rows not yet cleaned up
    pub fn stale(&self) -> Result<Vec<LockRecord>, StoreError> {
        let now = Utc::now();
        Ok(self
            .store
            .list_locks()?
            .into_iter()
            .filter(|lock| !lock.is_live_at(now))
            .collect())
    }

    /// First live lock among `names`
    pub fn first_held(&self, names: &[LockName]) -> Result<Option<LockRecord>, StoreError> {
        for name in names {
            if let Some(held) = self.is_held(*name)? {
                return Ok(Some(held));
            }
        }
        Ok(None)
    }
}

fn expiry_after(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
