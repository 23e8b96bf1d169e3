//! Exclusive operation runner.
//!
//! Pairs lock acquisition with the protected speech call. The lock guard lives
//! in the scope of [`Runner::run`], so it is released on normal return, on
//! error and while unwinding from a panic. Signals are handled by the caller
//! (see `signals`), which stops the backend's children and then frees held
//! locks through the shared registry before exiting.

use crate::error::Result;
use crate::exit_codes;
use crate::locks::{Acquisition, ContentionPolicy, Coordinator};
use crate::speech::SpeechBackend;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

/// Where rendered audio goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Play on the audio device.
    Play,
    /// Write a WAV file.
    Save(PathBuf),
    /// Write a WAV file, then play it.
    SaveAndPlay(PathBuf),
}

/// One unit of work from a trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub text: String,
    pub output: Output,
    /// `None` runs without coordination.
    pub policy: Option<ContentionPolicy>,
    pub accelerate: bool,
}

/// What happened to one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    SkippedBusy,
    TimedOut,
    Failed(String),
}

impl OperationOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            OperationOutcome::Completed => exit_codes::SUCCESS,
            OperationOutcome::SkippedBusy => exit_codes::SKIPPED_BUSY,
            OperationOutcome::TimedOut => exit_codes::LOCK_TIMEOUT,
            OperationOutcome::Failed(_) => exit_codes::FAILURE,
        }
    }

    /// Inverse of [`exit_code`](Self::exit_code) for a child process.
    pub fn from_exit_code(code: Option<i32>, stderr: &str) -> Self {
        match code {
            Some(exit_codes::SUCCESS) => OperationOutcome::Completed,
            Some(exit_codes::SKIPPED_BUSY) => OperationOutcome::SkippedBusy,
            Some(exit_codes::LOCK_TIMEOUT) => OperationOutcome::TimedOut,
            Some(code) if stderr.trim().is_empty() => {
                OperationOutcome::Failed(format!("exited with code {}", code))
            }
            Some(_) => OperationOutcome::Failed(stderr.trim().to_string()),
            None => OperationOutcome::Failed("terminated by signal".to_string()),
        }
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutcome::Completed => write!(f, "completed"),
            OperationOutcome::SkippedBusy => write!(f, "skipped (busy)"),
            OperationOutcome::TimedOut => write!(f, "timed out waiting for lock"),
            OperationOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Runs invocations one at a time per host.
pub struct Runner<'a, B: SpeechBackend> {
    coordinator: &'a Coordinator,
    backend: &'a B,
}

impl<'a, B: SpeechBackend> Runner<'a, B> {
    pub fn new(coordinator: &'a Coordinator, backend: &'a B) -> Self {
        Self {
            coordinator,
            backend,
        }
    }

    /// Run one invocation.
    ///
    /// Busy and timed-out outcomes never touch the backend. An `Err` means the
    /// lock itself could not be used (e.g. permission denied).
    pub fn run(&self, invocation: &Invocation) -> Result<OperationOutcome> {
        let started = Instant::now();

        let guard = match invocation.policy {
            None => {
                tracing::debug!("locking disabled for this invocation");
                None
            }
            Some(policy) => match self.coordinator.obtain(policy)? {
                Acquisition::Acquired(guard) => {
                    tracing::debug!(
                        %policy,
                        path = %guard.path().display(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "lock acquired"
                    );
                    Some(guard)
                }
                Acquisition::SkippedBusy => {
                    tracing::warn!(
                        path = %self.coordinator.lock_path().display(),
                        "another instance is speaking, skipping"
                    );
                    return Ok(OperationOutcome::SkippedBusy);
                }
                Acquisition::TimedOut => {
                    tracing::warn!(
                        %policy,
                        path = %self.coordinator.lock_path().display(),
                        "timed out waiting for lock"
                    );
                    return Ok(OperationOutcome::TimedOut);
                }
            },
        };

        let outcome = match self.perform(invocation) {
            Ok(()) => OperationOutcome::Completed,
            Err(e) => OperationOutcome::Failed(e.to_string()),
        };

        // An unwinding `perform` releases through the guard's drop instead.
        if let Some(guard) = guard
            && let Err(e) = guard.release()
        {
            tracing::warn!(error = %e, "lock release failed");
        }

        tracing::info!(
            %outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "invocation finished"
        );
        Ok(outcome)
    }

    fn perform(&self, invocation: &Invocation) -> Result<()> {
        let audio = self
            .backend
            .render(&invocation.text, invocation.accelerate)?;
        tracing::debug!(
            seconds = audio.duration_secs(),
            sample_rate = audio.sample_rate,
            "rendered"
        );

        match &invocation.output {
            Output::Play => self.backend.play(&audio),
            Output::Save(path) => self.backend.save(&audio, path),
            Output::SaveAndPlay(path) => {
                self.backend.save(&audio, path)?;
                self.backend.play(&audio)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpeakError;
    use crate::locks::HeldLocks;
    use crate::speech::Audio;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records every call and the interval the protected section was active.
    #[derive(Default, Clone)]
    struct RecordingBackend {
        calls: Arc<Mutex<Vec<String>>>,
        intervals: Arc<Mutex<Vec<(Instant, Instant)>>>,
        render_for: Duration,
        fail_render: bool,
        panic_in_play: bool,
    }

    impl RecordingBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SpeechBackend for RecordingBackend {
        fn render(&self, text: &str, accelerate: bool) -> Result<Audio> {
            let start = Instant::now();
            self.calls
                .lock()
                .unwrap()
                .push(format!("render:{}:{}", text, accelerate));
            thread::sleep(self.render_for);
            self.intervals.lock().unwrap().push((start, Instant::now()));
            if self.fail_render {
                return Err(SpeakError::Capability("model not loaded".to_string()));
            }
            Ok(Audio {
                samples: vec![0; 32],
                sample_rate: 16_000,
                channels: 1,
            })
        }

        fn play(&self, _audio: &Audio) -> Result<()> {
            if self.panic_in_play {
                panic!("audio device vanished");
            }
            self.calls.lock().unwrap().push("play".to_string());
            Ok(())
        }

        fn save(&self, _audio: &Audio, path: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("save:{}", path.display()));
            Ok(())
        }
    }

    fn invocation(policy: Option<ContentionPolicy>, output: Output) -> Invocation {
        Invocation {
            text: "hello".to_string(),
            output,
            policy,
            accelerate: false,
        }
    }

    #[test]
    fn completed_run_renders_once_and_frees_the_lock() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::new(dir.path().join("speak.lock"), HeldLocks::new());
        let backend = RecordingBackend::default();

        let outcome = Runner::new(&coordinator, &backend)
            .run(&invocation(Some(ContentionPolicy::FailFast), Output::Play))
            .unwrap();

        assert_eq!(outcome, OperationOutcome::Completed);
        assert_eq!(backend.calls(), vec!["render:hello:false", "play"]);
        assert!(crate::locks::is_free(coordinator.lock_path()).unwrap());
    }

    #[test]
    fn save_and_play_is_one_protected_call() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::new(dir.path().join("speak.lock"), HeldLocks::new());
        let backend = RecordingBackend::default();

        let outcome = Runner::new(&coordinator, &backend)
            .run(&invocation(
                Some(ContentionPolicy::UnboundedWait),
                Output::SaveAndPlay(PathBuf::from("out.wav")),
            ))
            .unwrap();

        assert_eq!(outcome, OperationOutcome::Completed);
        assert_eq!(
            backend.calls(),
            vec!["render:hello:false", "save:out.wav", "play"]
        );
    }

    #[test]
    fn busy_lock_skips_without_calling_backend() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::new(dir.path().join("speak.lock"), HeldLocks::new());
        let _holder = coordinator.obtain(ContentionPolicy::FailFast).unwrap();

        let other = Coordinator::new(dir.path().join("speak.lock"), HeldLocks::new());
        let backend = RecordingBackend::default();
        let outcome = Runner::new(&other, &backend)
            .run(&invocation(Some(ContentionPolicy::FailFast), Output::Play))
            .unwrap();

        assert_eq!(outcome, OperationOutcome::SkippedBusy);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn timed_out_wait_skips_without_calling_backend() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::new(dir.path().join("speak.lock"), HeldLocks::new());
        let _holder = coordinator.obtain(ContentionPolicy::FailFast).unwrap();

        let other = Coordinator::new(dir.path().join("speak.lock"), HeldLocks::new());
        let backend = RecordingBackend::default();
        let outcome = Runner::new(&other, &backend)
            .run(&invocation(
                Some(ContentionPolicy::BoundedWait(Duration::from_millis(250))),
                Output::Play,
            ))
            .unwrap();

        assert_eq!(outcome, OperationOutcome::TimedOut);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn failed_render_is_reported_and_lock_released() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::new(dir.path().join("speak.lock"), HeldLocks::new());
        let backend = RecordingBackend {
            fail_render: true,
            ..Default::default()
        };

        let outcome = Runner::new(&coordinator, &backend)
            .run(&invocation(Some(ContentionPolicy::FailFast), Output::Play))
            .unwrap();

        assert_eq!(
            outcome,
            OperationOutcome::Failed("model not loaded".to_string())
        );
        assert!(crate::locks::is_free(coordinator.lock_path()).unwrap());
    }

    #[test]
    fn panic_in_protected_call_still_releases_lock() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("speak.lock");
        let held = HeldLocks::new();

        let worker_path = lock_path.clone();
        let worker_held = held.clone();
        let result = thread::spawn(move || {
            let coordinator = Coordinator::new(worker_path, worker_held);
            let backend = RecordingBackend {
                panic_in_play: true,
                ..Default::default()
            };
            Runner::new(&coordinator, &backend)
                .run(&invocation(Some(ContentionPolicy::FailFast), Output::Play))
        })
        .join();

        assert!(result.is_err());
        assert!(!held.is_held(&lock_path));
        assert!(crate::locks::is_free(&lock_path).unwrap());
    }

    #[test]
    fn unlocked_invocation_ignores_a_held_lock() {
        let dir = TempDir::new().unwrap();
        let coordinator = Coordinator::new(dir.path().join("speak.lock"), HeldLocks::new());
        let _holder = coordinator.obtain(ContentionPolicy::FailFast).unwrap();

        let backend = RecordingBackend::default();
        let outcome = Runner::new(&coordinator, &backend)
            .run(&invocation(None, Output::Play))
            .unwrap();

        assert_eq!(outcome, OperationOutcome::Completed);
    }

    #[test]
    fn concurrent_waiters_never_overlap() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("speak.lock");
        let backend = RecordingBackend {
            render_for: Duration::from_millis(80),
            ..Default::default()
        };

        let policies = [
            ContentionPolicy::UnboundedWait,
            ContentionPolicy::BoundedWait(Duration::from_secs(10)),
            ContentionPolicy::UnboundedWait,
            ContentionPolicy::BoundedWait(Duration::from_secs(10)),
            ContentionPolicy::UnboundedWait,
        ];

        let workers: Vec<_> = policies
            .into_iter()
            .map(|policy| {
                let path = lock_path.clone();
                let backend = backend.clone();
                thread::spawn(move || {
                    let coordinator = Coordinator::new(path, HeldLocks::new())
                        .with_poll_interval(Duration::from_millis(10));
                    Runner::new(&coordinator, &backend)
                        .run(&invocation(Some(policy), Output::Play))
                        .unwrap()
                })
            })
            .collect();

        for worker in workers {
            assert_eq!(worker.join().unwrap(), OperationOutcome::Completed);
        }

        let mut intervals = backend.intervals.lock().unwrap().clone();
        assert_eq!(intervals.len(), 5);
        intervals.sort_by_key(|(start, _)| *start);
        for pair in intervals.windows(2) {
            assert!(
                pair[0].1 <= pair[1].0,
                "protected calls overlapped: {:?}",
                pair
            );
        }
    }

    #[test]
    fn outcomes_map_to_exit_codes_and_back() {
        let outcomes = [
            OperationOutcome::Completed,
            OperationOutcome::SkippedBusy,
            OperationOutcome::TimedOut,
        ];
        for outcome in outcomes {
            assert_eq!(
                OperationOutcome::from_exit_code(Some(outcome.exit_code()), ""),
                outcome
            );
        }

        assert_eq!(OperationOutcome::Failed("x".into()).exit_code(), 1);
        assert_eq!(
            OperationOutcome::from_exit_code(Some(1), "Error: piper failed\n"),
            OperationOutcome::Failed("Error: piper failed".to_string())
        );
        assert_eq!(
            OperationOutcome::from_exit_code(Some(130), ""),
            OperationOutcome::Failed("exited with code 130".to_string())
        );
        assert_eq!(
            OperationOutcome::from_exit_code(None, ""),
            OperationOutcome::Failed("terminated by signal".to_string())
        );
    }
}
