//! Run guards and cancellation.
//!
//! Every long operation runs inside a [`RunGuard`]: a held lock for real
//! runs, a [`DryRunMonitor`] for dry runs. Operations call
//! [`RunGuard::checkpoint`] between per-file steps, never in the middle
//! of a move or delete.

use crate::core::lock::{DryRunMonitor, LockGuard, LockManager, LockName, LockPolicy};
use crate::core::store::RecordStore;
use crate::error::DedupError;
use crate::events::{Event, EventSender, LockEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag set by a signal handler and polled by operations
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

enum Mode<'a> {
    Locked(LockGuard<'a>),
    Watching(DryRunMonitor<'a>),
}

/// Exclusive (or watched, for dry runs) context for one operation
pub struct RunGuard<'a> {
    name: LockName,
    mode: Mode<'a>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RunGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGuard")
            .field("name", &self.name)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl<'a> RunGuard<'a> {
    /// Take `name` for a real run, or start watching it for a dry run.
    ///
    /// Either way the conflicting lock classes must not be live.
    pub fn begin(
        store: &'a dyn RecordStore,
        name: LockName,
        dry_run: bool,
        policy: &LockPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, DedupError> {
        let manager = LockManager::new(store);

        let mode = if dry_run {
            let mut watched = vec![name];
            watched.extend(name.conflicts());
            let mut monitor = DryRunMonitor::new(manager, watched, policy.poll_interval);
            monitor.check_at_start()?;
            Mode::Watching(monitor)
        } else {
            Mode::Locked(LockGuard::acquire(
                manager,
                name,
                &name.conflicts(),
                &policy.holder,
                policy.timeout_for(name),
                policy.poll_interval,
            )?)
        };

        Ok(Self { name, mode, cancel })
    }

    /// Report lock activity on the given channel
    pub fn with_events(mut self, events: &EventSender) -> Self {
        self.mode = match self.mode {
            Mode::Locked(guard) => Mode::Locked(guard.with_events(events.clone())),
            Mode::Watching(monitor) => {
                events.send(Event::Lock(LockEvent::Watching {
                    name: self.name.to_string(),
                }));
                Mode::Watching(monitor)
            }
        };
        self
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self.mode, Mode::Watching(_))
    }

    pub fn lock_name(&self) -> LockName {
        self.name
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Between per-file steps: honour cancellation, keep the lease alive,
    /// or re-check watched locks.
    pub fn checkpoint(&mut self) -> Result<(), DedupError> {
        if self.cancel.is_cancelled() {
            return Err(DedupError::Cancelled);
        }
        match &mut self.mode {
            Mode::Locked(guard) => guard.keep_alive(),
            Mode::Watching(monitor) => monitor.poll(),
        }
    }

    /// After a wait the operation does not control (a prompt): heartbeat
    /// now, or re-check watched locks now. Fails if the lease was lost.
    pub fn renew(&mut self) -> Result<(), DedupError> {
        if self.cancel.is_cancelled() {
            return Err(DedupError::Cancelled);
        }
        match &mut self.mode {
            Mode::Locked(guard) => guard.renew(),
            Mode::Watching(monitor) => monitor.check_now(),
        }
    }

    /// Final check before a dry run reports its plan
    pub fn verify(&mut self) -> Result<(), DedupError> {
        match &mut self.mode {
            Mode::Locked(_) => Ok(()),
            Mode::Watching(monitor) => monitor.check_now(),
        }
    }

    /// Release the lock now
    pub fn finish(mut self) -> Result<(), DedupError> {
        if let Mode::Locked(guard) = &mut self.mode {
            guard.release()?;
        }
        Ok(())
    }
}
