//! Subprocess dispatch.
//!
//! Each invocation runs as `<speak> say ...` in its own OS process, so the
//! bridge never holds the coordination lock itself and a hung render can be
//! killed at the invocation ceiling.
//!
//! The child leads its own process group. Stopping it sends SIGTERM to the
//! group, so `say` can stop its piper or player and release the lock, then
//! SIGKILLs whatever is left after a grace period.

use super::Dispatch;
use crate::error::{Result, SpeakError};
use crate::locks::ContentionPolicy;
use crate::runner::{Invocation, OperationOutcome, Output};
use crate::speech::{WaitOutcome, watch};
use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How long a stopped child gets to exit after SIGTERM.
#[cfg(unix)]
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Runs invocations through a child `speak say` process.
#[derive(Debug, Clone)]
pub struct SubprocessDispatch {
    program: PathBuf,
    config: Option<PathBuf>,
    timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl SubprocessDispatch {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            config: None,
            timeout,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Dispatch to the currently running executable.
    pub fn current_exe(timeout: Duration) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| SpeakError::Io(format!("failed to locate own executable: {}", e)))?;
        Ok(Self::new(program, timeout))
    }

    /// Forward `--config <path>` to every child.
    pub fn with_config(mut self, config: Option<PathBuf>) -> Self {
        self.config = config;
        self
    }

    /// Flag that kills the in-flight child once set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn args(&self, invocation: &Invocation) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".into());
            args.push(config.into());
        }
        args.push("say".into());
        args.push("--text".into());
        args.push(invocation.text.clone().into());

        match invocation.policy {
            None => args.push("--no-lock".into()),
            Some(ContentionPolicy::FailFast) => {
                args.extend(["--strategy", "skip"].map(OsString::from));
            }
            Some(ContentionPolicy::BoundedWait(timeout)) => {
                args.extend(["--strategy", "timeout", "--lock-timeout"].map(OsString::from));
                args.push(timeout.as_secs_f64().to_string().into());
            }
            Some(ContentionPolicy::UnboundedWait) => {
                args.extend(["--strategy", "queue"].map(OsString::from));
            }
        }

        match &invocation.output {
            Output::Play => args.push("--play".into()),
            Output::Save(path) => {
                args.push("--output".into());
                args.push(path.into());
            }
            Output::SaveAndPlay(path) => {
                args.push("--output".into());
                args.push(path.into());
                args.push("--play".into());
            }
        }

        if invocation.accelerate {
            args.push("--gpu".into());
        }
        args
    }

    fn run_child(&self, invocation: &Invocation) -> Result<OperationOutcome> {
        if self.cancel.load(Ordering::SeqCst) {
            return Ok(OperationOutcome::Failed("cancelled".to_string()));
        }

        let mut stderr_log = tempfile::tempfile()
            .map_err(|e| SpeakError::Io(format!("failed to create stderr log: {}", e)))?;
        let stderr_sink = stderr_log
            .try_clone()
            .map_err(|e| SpeakError::Io(format!("failed to create stderr log: {}", e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_sink));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(|e| {
            SpeakError::Io(format!(
                "failed to start '{}': {}",
                self.program.display(),
                e
            ))
        })?;
        tracing::debug!(pid = child.id(), "invocation started");

        let outcome = watch(&mut child, self.timeout, Some(&self.cancel))?;
        if !matches!(outcome, WaitOutcome::Exited(_)) {
            stop(&mut child)?;
        }
        Ok(match outcome {
            WaitOutcome::Exited(status) => {
                OperationOutcome::from_exit_code(status.code(), &last_line(&mut stderr_log))
            }
            WaitOutcome::TimedOut => OperationOutcome::Failed("timeout".to_string()),
            WaitOutcome::Cancelled => OperationOutcome::Failed("cancelled".to_string()),
        })
    }
}

/// Stop a child and everything in its process group, then reap it.
#[cfg(unix)]
fn stop(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    use std::thread;
    use std::time::Instant;

    let group = Pid::from_raw(
        i32::try_from(child.id())
            .map_err(|_| SpeakError::Io(format!("pid {} out of range", child.id())))?,
    );
    if let Err(e) = killpg(group, Signal::SIGTERM) {
        tracing::debug!(error = %e, "failed to signal invocation group");
    }

    let deadline = Instant::now() + STOP_GRACE;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => thread::sleep(Duration::from_millis(50)),
            Err(e) => return Err(SpeakError::Io(format!("failed to check process status: {}", e))),
        }
    }

    // Anything still in the group ignored SIGTERM or outlived its parent.
    if let Err(e) = killpg(group, Signal::SIGKILL)
        && e != nix::errno::Errno::ESRCH
    {
        tracing::warn!(error = %e, "failed to kill invocation group");
    }
    child
        .wait()
        .map_err(|e| SpeakError::Io(format!("failed to wait for stopped process: {}", e)))?;
    Ok(())
}

#[cfg(not(unix))]
fn stop(child: &mut Child) -> Result<()> {
    if let Err(e) = child.kill()
        && e.kind() != std::io::ErrorKind::InvalidInput
    {
        return Err(SpeakError::Io(format!("failed to kill process: {}", e)));
    }
    child
        .wait()
        .map_err(|e| SpeakError::Io(format!("failed to wait for stopped process: {}", e)))?;
    Ok(())
}

impl Dispatch for SubprocessDispatch {
    fn dispatch(&self, invocation: &Invocation) -> OperationOutcome {
        self.run_child(invocation)
            .unwrap_or_else(|e| OperationOutcome::Failed(e.to_string()))
    }
}

/// Last non-empty line the child wrote to stderr (its `Error: ...` line).
fn last_line(log: &mut File) -> String {
    let mut content = String::new();
    if log.seek(SeekFrom::Start(0)).is_err() || log.read_to_string(&mut content).is_err() {
        return String::new();
    }
    content
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}
