//! Lock watching for dry runs.

use super::{LockManager, LockName};
use crate::error::DedupError;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Watches named locks on behalf of a dry run.
///
/// A dry run may not start while any watched lock is live, and aborts
/// at the first poll that finds one taken.
pub struct DryRunMonitor<'a> {
    manager: LockManager<'a>,
    names: Vec<LockName>,
    interval: Duration,
    last_poll: Option<Instant>,
}

impl<'a> DryRunMonitor<'a> {
    pub fn new(manager: LockManager<'a>, names: Vec<LockName>, interval: Duration) -> Self {
        Self {
            manager,
            names,
            interval,
            last_poll: None,
        }
    }

    pub fn watched(&self) -> &[LockName] {
        &self.names
    }

    /// Refuse to start while a destructive run is active
    pub fn check_at_start(&mut self) -> Result<(), DedupError> {
        self.last_poll = Some(Instant::now());
        if let Some(held) = self.manager.first_held(&self.names)? {
            warn!(lock = %held.name, holder = %held.holder, "dry run blocked by live lock");
            return Err(super::busy_error(&held));
        }
        debug!(locks = ?self.names, "dry run watching locks");
        Ok(())
    }

    /// Check again if the poll interval has elapsed
    pub fn poll(&mut self) -> Result<(), DedupError> {
        if let Some(last) = self.last_poll {
            if last.elapsed() < self.interval {
                return Ok(());
            }
        }
        self.check_now()
    }

    /// Check immediately, regardless of the interval
    pub fn check_now(&mut self) -> Result<(), DedupError> {
        self.last_poll = Some(Instant::now());
        if let Some(held) = self.manager.first_held(&self.names)? {
            warn!(lock = %held.name, holder = %held.holder, "lock acquired during dry run, aborting");
            return Err(DedupError::DryRunInterrupted {
                name: held.name,
                holder: held.holder.to_string(),
            });
        }
        Ok(())
    }
}
