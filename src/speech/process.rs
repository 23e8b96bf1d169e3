//! Child process supervision with a hard ceiling.

use crate::error::{Result, SpeakError};
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The child exited on its own.
    Exited(ExitStatus),
    /// The ceiling elapsed and the child was killed.
    TimedOut,
    /// The cancel flag was raised and the child was killed.
    Cancelled,
}

/// Wait for a child process, killing it after `timeout` or once `cancel` is set.
pub fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    cancel: Option<&Arc<AtomicBool>>,
) -> Result<WaitOutcome> {
    let outcome = watch(child, timeout, cancel)?;
    if !matches!(outcome, WaitOutcome::Exited(_)) {
        kill_process(child)?;
    }
    Ok(outcome)
}

/// Poll a child until it exits, `timeout` elapses or `cancel` is set.
///
/// Unlike [`wait_with_timeout`] this never kills: on `TimedOut` or
/// `Cancelled` the child is still running and the caller must stop it.
pub fn watch(
    child: &mut Child,
    timeout: Duration,
    cancel: Option<&Arc<AtomicBool>>,
) -> Result<WaitOutcome> {
    let start = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(WaitOutcome::Exited(status)),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    return Ok(WaitOutcome::TimedOut);
                }
                if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                    return Ok(WaitOutcome::Cancelled);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return Err(SpeakError::Io(format!(
                    "failed to check process status: {}",
                    e
                )));
            }
        }
    }
}

/// Kill a process and reap it.
fn kill_process(child: &mut Child) -> Result<()> {
    // The child may have exited between the poll and the kill.
    if let Err(e) = child.kill()
        && e.kind() != std::io::ErrorKind::InvalidInput
    {
        return Err(SpeakError::Io(format!("failed to kill process: {}", e)));
    }
    child
        .wait()
        .map_err(|e| SpeakError::Io(format!("failed to wait for killed process: {}", e)))?;
    Ok(())
}

/// Tracks the children a backend starts so they can be stopped on request.
///
/// Once [`Supervisor::cancel_and_wait`] has run, every tracked child has been
/// killed and reaped, and no new child can be started.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    inner: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    cancel: Arc<AtomicBool>,
    active: Mutex<usize>,
    idle: Condvar,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.load(Ordering::SeqCst)
    }

    /// Start `cmd` as a tracked child.
    ///
    /// `describe` turns a spawn failure into the caller's error.
    pub fn spawn(
        &self,
        cmd: &mut Command,
        describe: impl FnOnce(std::io::Error) -> SpeakError,
    ) -> Result<Tracked> {
        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            return Err(SpeakError::Capability("cancelled".to_string()));
        }
        let child = cmd.spawn().map_err(describe)?;
        *active += 1;
        Ok(Tracked {
            child,
            reaped: false,
            supervisor: self.clone(),
        })
    }

    /// Refuse new children, then block until every tracked child is reaped.
    pub fn cancel_and_wait(&self) {
        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.cancel.store(true, Ordering::SeqCst);
        while *active > 0 {
            active = self
                .inner
                .idle
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finished(&self) {
        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        self.inner.idle.notify_all();
    }
}

/// A child started through a [`Supervisor`]. It is always reaped before the
/// supervisor stops counting it.
#[derive(Debug)]
pub struct Tracked {
    child: Child,
    reaped: bool,
    supervisor: Supervisor,
}

impl Tracked {
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Wait like [`wait_with_timeout`], also stopping when the supervisor is cancelled.
    pub fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        let cancel = Arc::clone(&self.supervisor.inner.cancel);
        let outcome = wait_with_timeout(&mut self.child, timeout, Some(&cancel))?;
        self.reaped = true;
        Ok(outcome)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        if !self.reaped
            && let Err(e) = kill_process(&mut self.child)
        {
            tracing::warn!(error = %e, "failed to reap child process");
        }
        self.supervisor.finished();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn reports_normal_exit() {
        let mut child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let outcome = wait_with_timeout(&mut child, Duration::from_secs(5), None).unwrap();
        match outcome {
            WaitOutcome::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn kills_child_after_timeout() {
        let mut child = Command::new("sleep").arg("10").spawn().unwrap();
        let started = Instant::now();
        let outcome = wait_with_timeout(&mut child, Duration::from_millis(300), None).unwrap();

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn kills_child_when_cancelled() {
        let mut child = Command::new("sleep").arg("10").spawn().unwrap();
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome =
            wait_with_timeout(&mut child, Duration::from_secs(30), Some(&cancel)).unwrap();

        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[test]
    fn watch_leaves_the_child_running() {
        let mut child = Command::new("sleep").arg("10").spawn().unwrap();
        let outcome = watch(&mut child, Duration::from_millis(200), None).unwrap();

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(child.try_wait().unwrap().is_none());
        kill_process(&mut child).unwrap();
    }

    #[test]
    fn cancel_with_no_children_returns_at_once() {
        let supervisor = Supervisor::new();
        supervisor.cancel_and_wait();
        assert!(supervisor.is_cancelled());
    }

    #[test]
    fn cancel_kills_and_reaps_the_running_child() {
        let supervisor = Supervisor::new();
        let mut tracked = supervisor
            .spawn(Command::new("sleep").arg("30"), |e| {
                SpeakError::Capability(e.to_string())
            })
            .unwrap();
        let pid = tracked.child_mut().id();

        let waiter = thread::spawn(move || tracked.wait(Duration::from_secs(60)).unwrap());
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        supervisor.cancel_and_wait();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
        // Reaped: the pid no longer names a live process.
        let alive = Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .unwrap();
        assert!(!alive.success());
    }

    #[test]
    fn no_child_starts_after_cancel() {
        let supervisor = Supervisor::new();
        supervisor.cancel_and_wait();

        let err = supervisor
            .spawn(&mut Command::new("true"), |e| {
                SpeakError::Capability(e.to_string())
            })
            .unwrap_err();
        assert_eq!(err.to_string(), SpeakError::Capability("cancelled".to_string()).to_string());
    }

    #[test]
    fn dropping_an_unwaited_child_reaps_it() {
        let supervisor = Supervisor::new();
        let tracked = supervisor
            .spawn(Command::new("sleep").arg("30"), |e| {
                SpeakError::Capability(e.to_string())
            })
            .unwrap();
        drop(tracked);

        let started = Instant::now();
        supervisor.cancel_and_wait();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
