//! Contention policies and the coordinator that applies them.

use super::guard::LockGuard;
use super::operations::{AcquireMode, LockAttempt, acquire};
use super::registry::HeldLocks;
use crate::error::{Result, SpeakError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval used by bounded waits unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to do when the lock is held by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentionPolicy {
    /// Never wait: one non-blocking attempt.
    FailFast,
    /// Poll until the lock is free or the timeout elapses.
    BoundedWait(Duration),
    /// Block until the lock is free.
    ///
    /// Waiters are released in whatever order the OS wakes them. This is
    /// best-effort queueing, not FIFO.
    UnboundedWait,
}

impl ContentionPolicy {
    /// Build a policy from the legacy flag pair.
    ///
    /// Setting both flags is rejected rather than resolved by priority.
    pub fn from_flags(skip_if_locked: bool, lock_timeout_secs: Option<f64>) -> Result<Self> {
        match (skip_if_locked, lock_timeout_secs) {
            (true, Some(_)) => Err(SpeakError::Config(
                "--skip-if-locked and --lock-timeout cannot be used together".to_string(),
            )),
            (true, None) => Ok(Self::FailFast),
            (false, Some(secs)) => Ok(Self::BoundedWait(timeout_from_secs(secs)?)),
            (false, None) => Ok(Self::UnboundedWait),
        }
    }
}

impl fmt::Display for ContentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail-fast"),
            Self::BoundedWait(timeout) => write!(f, "bounded-wait({:.1}s)", timeout.as_secs_f64()),
            Self::UnboundedWait => write!(f, "unbounded-wait"),
        }
    }
}

/// Convert a user-supplied timeout in seconds, rejecting negative or non-finite values.
pub fn timeout_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        SpeakError::Config(format!(
            "lock timeout must be a non-negative number of seconds, got {}",
            secs
        ))
    })
}

/// Result of applying a policy.
#[derive(Debug)]
pub enum Acquisition {
    Acquired(LockGuard),
    SkippedBusy,
    TimedOut,
}

/// Applies contention policies to one well-known lock path.
#[derive(Debug, Clone)]
pub struct Coordinator {
    lock_path: PathBuf,
    poll_interval: Duration,
    held: HeldLocks,
}

impl Coordinator {
    pub fn new(lock_path: impl Into<PathBuf>, held: HeldLocks) -> Self {
        Self {
            lock_path: lock_path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            held,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Try to obtain the lock according to `policy`.
    ///
    /// Contention is reported as `SkippedBusy` / `TimedOut`; only a failure to
    /// open or lock the file at all is an error.
    pub fn obtain(&self, policy: ContentionPolicy) -> Result<Acquisition> {
        match policy {
            ContentionPolicy::FailFast => Ok(match self.attempt(AcquireMode::NonBlocking)? {
                LockAttempt::Held(guard) => Acquisition::Acquired(guard),
                LockAttempt::Busy => Acquisition::SkippedBusy,
            }),
            ContentionPolicy::BoundedWait(timeout) => self.poll_until(timeout),
            ContentionPolicy::UnboundedWait => {
                if let LockAttempt::Held(guard) = self.attempt(AcquireMode::NonBlocking)? {
                    return Ok(Acquisition::Acquired(guard));
                }
                tracing::info!(path = %self.lock_path.display(), "lock busy, queued");
                loop {
                    if let LockAttempt::Held(guard) = self.attempt(AcquireMode::Blocking)? {
                        return Ok(Acquisition::Acquired(guard));
                    }
                }
            }
        }
    }

    fn attempt(&self, mode: AcquireMode) -> Result<LockAttempt> {
        acquire(&self.lock_path, mode, &self.held)
    }

    fn poll_until(&self, timeout: Duration) -> Result<Acquisition> {
        let started = Instant::now();
        let mut announced = false;

        loop {
            if let LockAttempt::Held(guard) = self.attempt(AcquireMode::NonBlocking)? {
                return Ok(Acquisition::Acquired(guard));
            }

            let elapsed = started.elapsed();
            if elapsed > timeout {
                return Ok(Acquisition::TimedOut);
            }

            if !announced {
                tracing::info!(
                    path = %self.lock_path.display(),
                    timeout_secs = timeout.as_secs_f64(),
                    "lock busy, waiting"
                );
                announced = true;
            }

            thread::sleep(self.poll_interval);
        }
    }
}
