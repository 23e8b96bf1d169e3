//! Implementation of the `speak say` command.
//!
//! Resolves the invocation from flags and config, installs the signal
//! handler, and runs the invocation under the coordination lock.

use crate::cli::SayArgs;
use crate::config::Config;
use crate::error::{Result, SpeakError};
use crate::exit_codes;
use crate::locks::{Coordinator, HeldLocks};
use crate::runner::{Invocation, OperationOutcome, Output, Runner};
use crate::signals::{self, Signal};
use crate::speech::{PiperBackend, Supervisor};
use crate::strategy::DEFAULT_LOCK_TIMEOUT_SECS;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Execute the `speak say` command.
pub fn cmd_say(config: &Config, args: SayArgs) -> Result<i32> {
    // Everything that can be rejected is checked before touching the lock.
    let text = read_text(&args)?;
    let policy = args.contention_flags().resolve(DEFAULT_LOCK_TIMEOUT_SECS)?;
    let model = args.model.clone().unwrap_or_else(|| config.model.clone());
    if !model.exists() {
        return Err(SpeakError::Config(format!(
            "voice model not found: {}\n\
             Fix: pass --model or set `model` / SPEAK_MODEL.",
            model.display()
        )));
    }
    let output = resolve_output(&args, config);

    let held = HeldLocks::new();
    let supervisor = Supervisor::new();
    let received = Arc::new(OnceLock::new());
    install_cleanup(held.clone(), supervisor.clone(), Arc::clone(&received))?;

    let coordinator = Coordinator::new(&config.lock_path, held)
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms));
    let backend =
        PiperBackend::from_config(config, Some(model.as_path())).with_supervisor(supervisor);

    let invocation = Invocation {
        text,
        output,
        policy,
        accelerate: args.gpu,
    };

    let outcome = Runner::new(&coordinator, &backend).run(&invocation)?;
    if let Some(signal) = received.get() {
        // The signal handler is exiting with this code.
        return Ok(signal.exit_code());
    }

    match outcome {
        OperationOutcome::Completed => {
            if let Output::Save(path) | Output::SaveAndPlay(path) = &invocation.output {
                println!("Audio saved to: {}", path.display());
            }
            Ok(exit_codes::SUCCESS)
        }
        OperationOutcome::SkippedBusy => Ok(exit_codes::SKIPPED_BUSY),
        OperationOutcome::TimedOut => Ok(exit_codes::LOCK_TIMEOUT),
        OperationOutcome::Failed(reason) => Err(SpeakError::Capability(reason)),
    }
}

fn read_text(args: &SayArgs) -> Result<String> {
    let text = match (&args.text, &args.file) {
        (Some(text), _) => text.trim().to_string(),
        (None, Some(path)) => fs::read_to_string(path)
            .map_err(|e| {
                SpeakError::Config(format!(
                    "failed to read text file '{}': {}",
                    path.display(),
                    e
                ))
            })?
            .trim()
            .to_string(),
        (None, None) => {
            return Err(SpeakError::Config(
                "no text given; use --text or --file".to_string(),
            ));
        }
    };

    if text.is_empty() {
        return Err(SpeakError::Config("no text to speak".to_string()));
    }
    Ok(text)
}

fn resolve_output(args: &SayArgs, config: &Config) -> Output {
    match (&args.output, args.play) {
        (Some(path), true) => Output::SaveAndPlay(path.clone()),
        (Some(path), false) => Output::Save(path.clone()),
        (None, true) => Output::Play,
        (None, false) => Output::Save(PathBuf::from(&config.output)),
    }
}

/// On SIGINT/SIGTERM, stop and reap any piper or player child, remove held
/// lock files, and exit with `128 + signo`.
///
/// The child is gone before the lock is given up, so the next holder never
/// overlaps a render or playback from this process.
fn install_cleanup(
    held: HeldLocks,
    supervisor: Supervisor,
    received: Arc<OnceLock<Signal>>,
) -> Result<()> {
    signals::install(move |signal| {
        let _ = received.set(signal);
        supervisor.cancel_and_wait();
        let eviction = held.evict();
        if eviction.removed > 0 {
            tracing::info!(removed = eviction.removed, "removed lock file before exit");
        }
        // The eviction keeps the registry frozen until the process is gone.
        std::process::exit(signal.exit_code());
    })
}
