//! Termination signal handling.
//!
//! SIGINT and SIGTERM are watched from a dedicated thread running a
//! current-thread tokio runtime, so the blocking code paths (lock waits,
//! subprocess waits) stay synchronous. The handler runs once, on that thread.

use crate::error::{Result, SpeakError};
use crate::exit_codes;
use std::fmt;
use std::sync::mpsc;
use std::thread;

/// A termination request from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    /// Conventional `128 + signo` exit code.
    pub fn exit_code(self) -> i32 {
        match self {
            Signal::Interrupt => exit_codes::INTERRUPTED,
            Signal::Terminate => exit_codes::TERMINATED,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Install the handler and return once signals are being watched.
///
/// From this point the default SIGINT/SIGTERM disposition is replaced; the
/// process keeps running unless `on_signal` exits it.
pub fn install<F>(on_signal: F) -> Result<()>
where
    F: FnOnce(Signal) + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

    thread::Builder::new()
        .name("speak-signals".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(SpeakError::Io(format!(
                        "failed to start signal runtime: {}",
                        e
                    ))));
                    return;
                }
            };

            runtime.block_on(async move {
                match wait_for_signal(ready_tx).await {
                    Some(signal) => {
                        tracing::info!(%signal, "received termination signal");
                        on_signal(signal);
                    }
                    None => tracing::debug!("signal watcher stopped"),
                }
            });
        })
        .map_err(|e| SpeakError::Io(format!("failed to spawn signal thread: {}", e)))?;

    ready_rx
        .recv()
        .map_err(|_| SpeakError::Io("signal thread exited during setup".to_string()))?
}

#[cfg(unix)]
async fn wait_for_signal(ready: mpsc::SyncSender<Result<()>>) -> Option<Signal> {
    use tokio::signal::unix::{SignalKind, signal};

    let streams = signal(SignalKind::interrupt())
        .and_then(|int| signal(SignalKind::terminate()).map(|term| (int, term)));
    let (mut sigint, mut sigterm) = match streams {
        Ok(streams) => streams,
        Err(e) => {
            let _ = ready.send(Err(SpeakError::Io(format!(
                "failed to register signal handlers: {}",
                e
            ))));
            return None;
        }
    };
    let _ = ready.send(Ok(()));

    tokio::select! {
        received = sigint.recv() => received.map(|_| Signal::Interrupt),
        received = sigterm.recv() => received.map(|_| Signal::Terminate),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(ready: mpsc::SyncSender<Result<()>>) -> Option<Signal> {
    let _ = ready.send(Ok(()));
    tokio::signal::ctrl_c().await.ok().map(|_| Signal::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_shell_convention() {
        assert_eq!(Signal::Interrupt.exit_code(), 130);
        assert_eq!(Signal::Terminate.exit_code(), 143);
    }

    #[test]
    fn display_names_the_signal() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
    }

    #[cfg(unix)]
    #[test]
    fn handler_runs_on_sigterm() {
        use std::process::Command;
        use std::time::Duration;

        let (tx, rx) = mpsc::channel();
        install(move |signal| {
            let _ = tx.send(signal);
        })
        .unwrap();

        let status = Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());

        let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received, Signal::Terminate);
    }
}
