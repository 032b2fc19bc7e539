//! RAII guard for an acquired lock.

use super::{busy_error, LockManager, LockName, LockOutcome, LockToken};
use crate::core::store::LockHolder;
use crate::error::DedupError;
use crate::events::{Event, EventSender, LockEvent};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Holds a named lock until dropped or explicitly released.
///
/// Call [`LockGuard::keep_alive`] between per-file steps; it heartbeats
/// at most once per `heartbeat_interval`.
pub struct LockGuard<'a> {
    manager: LockManager<'a>,
    token: Option<LockToken>,
    timeout: Duration,
    heartbeat_interval: Duration,
    last_heartbeat: Instant,
    events: Option<EventSender>,
}

impl<'a> LockGuard<'a> {
    /// Acquire `name`, then make sure none of `conflicts` is live.
    ///
    /// If a conflicting lock is held, the fresh lock is released again and
    /// the conflict is reported as `Busy`.
    pub fn acquire(
        manager: LockManager<'a>,
        name: LockName,
        conflicts: &[LockName],
        holder: &LockHolder,
        timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Result<Self, DedupError> {
        let token = manager.acquire(name, holder, timeout)?.into_result()?;

        let mut guard = Self {
            manager,
            token: Some(token),
            timeout,
            heartbeat_interval,
            last_heartbeat: Instant::now(),
            events: None,
        };

        if let Some(held) = manager.first_held(conflicts)? {
            guard.release()?;
            return Err(busy_error(&held));
        }

        Ok(guard)
    }

    /// Wrap an already-acquired outcome
    pub fn from_outcome(
        manager: LockManager<'a>,
        outcome: LockOutcome,
        timeout: Duration,
    ) -> Result<Self, DedupError> {
        Ok(Self {
            manager,
            token: Some(outcome.into_result()?),
            timeout,
            heartbeat_interval: Duration::from_secs(60),
            last_heartbeat: Instant::now(),
            events: None,
        })
    }

    /// Report acquire/release through an event channel
    pub fn with_events(mut self, events: EventSender) -> Self {
        if let Some(token) = &self.token {
            events.send(Event::Lock(LockEvent::Acquired {
                name: token.name.to_string(),
            }));
        }
        self.events = Some(events);
        self
    }

    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    /// Heartbeat if the interval has elapsed.
    ///
    /// Fails with `Busy` if the lease was lost to another holder.
    pub fn keep_alive(&mut self) -> Result<(), DedupError> {
        if self.last_heartbeat.elapsed() < self.heartbeat_interval {
            return Ok(());
        }
        self.renew()
    }

    /// Heartbeat now, whatever the interval.
    ///
    /// Fails with `Busy` if the lease was lost to another holder.
    pub fn renew(&mut self) -> Result<(), DedupError> {
        let Some(token) = self.token.as_mut() else {
            return Ok(());
        };

        let name = token.name;
        if !self.manager.heartbeat(token, self.timeout)? {
            self.token = None;
            warn!(lock = %name, "lock lease lost");
            return Err(match self.manager.is_held(name)? {
                Some(held) => busy_error(&held),
                None => DedupError::Busy {
                    name: name.to_string(),
                    holder: "another process".to_string(),
                    acquired_at: chrono::Utc::now(),
                },
            });
        }
        self.last_heartbeat = Instant::now();
        Ok(())
    }

    /// Release now instead of on drop
    pub fn release(&mut self) -> Result<bool, DedupError> {
        let Some(token) = self.token.take() else {
            return Ok(false);
        };
        let released = self.manager.release(&token)?;
        if let Some(events) = &self.events {
            events.send(Event::Lock(LockEvent::Released {
                name: token.name.to_string(),
            }));
        }
        Ok(released)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!(error = %e, "failed to release lock; it will expire on its own");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::SqliteStore;

    fn holder(pid: u32) -> LockHolder {
        LockHolder::new(pid, "test-host")
    }

    #[test]
    fn drop_releases_lock() {
        let store = SqliteStore::open_in_memory().unwrap();
        let manager = LockManager::new(&store);

        {
            let _guard = LockGuard::acquire(
                manager,
                LockName::Deduplicate,
                &[],
                &holder(1),
                Duration::from_secs(60),
                Duration::from_secs(60),
            )
            .unwrap();
            assert!(manager.is_held(LockName::Deduplicate).unwrap().is_some());
        }

        assert!(manager.is_held(LockName::Deduplicate).unwrap().is_none());
    }

    #[test]
    fn conflicting_lock_blocks_and_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let manager = LockManager::new(&store);
        let _scan = LockGuard::acquire(
            manager,
            LockName::Scan,
            &[],
            &holder(1),
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
        .unwrap();

        let result = LockGuard::acquire(
            manager,
            LockName::Purge,
            &LockName::Purge.conflicts(),
            &holder(2),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        assert!(matches!(result, Err(DedupError::Busy { ref name, .. }) if name == "scan"));
        assert!(manager.is_held(LockName::Purge).unwrap().is_none());
    }

    #[test]
    fn keep_alive_refreshes_when_interval_elapsed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let manager = LockManager::new(&store);
        let mut guard = LockGuard::acquire(
            manager,
            LockName::Purge,
            &[],
            &holder(1),
            Duration::from_secs(5),
            Duration::ZERO,
        )
        .unwrap();
        let before = guard.token().unwrap().expires_at;
        guard.timeout = Duration::from_secs(3600);

        guard.keep_alive().unwrap();

        assert!(guard.token().unwrap().expires_at > before);
    }

    #[test]
    fn renew_ignores_the_interval() {
        let store = SqliteStore::open_in_memory().unwrap();
        let manager = LockManager::new(&store);
        let mut guard = LockGuard::acquire(
            manager,
            LockName::Purge,
            &[],
            &holder(1),
            Duration::from_secs(5),
            Duration::from_secs(3600),
        )
        .unwrap();
        let before = guard.token().unwrap().expires_at;
        guard.timeout = Duration::from_secs(3600);

        guard.keep_alive().unwrap();
        assert_eq!(guard.token().unwrap().expires_at, before);

        guard.renew().unwrap();
        assert!(guard.token().unwrap().expires_at > before);
    }

    #[test]
    fn keep_alive_reports_lost_lease() {
        let store = SqliteStore::open_in_memory().unwrap();
        let manager = LockManager::new(&store);
        let mut guard = LockGuard::acquire(
            manager,
            LockName::Purge,
            &[],
            &holder(1),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap();
        manager
            .acquire(LockName::Purge, &holder(2), Duration::from_secs(60))
            .unwrap();

        let err = guard.keep_alive().unwrap_err();

        assert!(matches!(err, DedupError::Busy { ref holder, .. } if holder.contains("PID 2")));
        assert!(guard.token().is_none());
    }
}
