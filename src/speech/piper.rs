//! Piper-backed speech capability.

use super::player::Player;
use super::process::{Supervisor, WaitOutcome};
use super::{Audio, SpeechBackend, wav};
use crate::config::Config;
use crate::error::{Result, SpeakError};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Bytes of piper's stderr kept in failure messages.
const STDERR_TAIL: usize = 400;

/// Renders with the `piper` CLI and plays through a system player.
#[derive(Debug, Clone)]
pub struct PiperBackend {
    piper_bin: PathBuf,
    model: PathBuf,
    render_timeout: Duration,
    playback_timeout: Duration,
    player: Option<String>,
    supervisor: Supervisor,
}

impl PiperBackend {
    pub fn new(piper_bin: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            piper_bin: piper_bin.into(),
            model: model.into(),
            render_timeout: Duration::from_secs(120),
            playback_timeout: Duration::from_secs(300),
            player: None,
            supervisor: Supervisor::new(),
        }
    }

    /// Build a backend from config, with `model` overriding the configured voice.
    pub fn from_config(config: &Config, model: Option<&Path>) -> Self {
        let mut backend = Self::new(
            &config.piper_bin,
            model.map_or_else(|| config.model.clone(), Path::to_path_buf),
        );
        backend.render_timeout = Duration::from_secs(config.render_timeout_secs);
        backend.playback_timeout = Duration::from_secs(config.playback_timeout_secs);
        backend.player = config.player.clone();
        backend
    }

    /// Track piper and player children through `supervisor`.
    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    #[cfg(test)]
    pub fn model(&self) -> &Path {
        &self.model
    }

    fn command(&self, output: &Path, accelerate: bool) -> Command {
        let mut cmd = Command::new(&self.piper_bin);
        cmd.arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(output);
        if accelerate {
            cmd.arg("--cuda");
        }
        cmd
    }
}

impl SpeechBackend for PiperBackend {
    fn render(&self, text: &str, accelerate: bool) -> Result<Audio> {
        let scratch = tempfile::Builder::new()
            .prefix("speak-render-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| SpeakError::Capability(format!("failed to create scratch WAV: {}", e)))?;
        let mut stderr_log = tempfile::tempfile()
            .map_err(|e| SpeakError::Capability(format!("failed to create stderr log: {}", e)))?;
        let stderr_sink = stderr_log
            .try_clone()
            .map_err(|e| SpeakError::Capability(format!("failed to create stderr log: {}", e)))?;

        if accelerate {
            tracing::info!("requesting CUDA acceleration from piper");
        }

        let mut cmd = self.command(scratch.path(), accelerate);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_sink));

        tracing::debug!(command = ?cmd, "running piper");
        let mut child = self.supervisor.spawn(&mut cmd, |e| {
            SpeakError::Capability(format!(
                "failed to start piper '{}': {}\n\
                 Fix: install piper or set `piper_bin` / PIPER_BIN.",
                self.piper_bin.display(),
                e
            ))
        })?;

        if let Some(mut stdin) = child.child_mut().stdin.take() {
            // Piper reads one utterance per line.
            let line = single_line(text);
            if let Err(e) = stdin.write_all(line.as_bytes()) {
                tracing::debug!(error = %e, "piper closed stdin early");
            }
        }

        match child.wait(self.render_timeout)? {
            WaitOutcome::Exited(status) if status.success() => {}
            WaitOutcome::Exited(status) => {
                return Err(SpeakError::Capability(format!(
                    "piper failed with {}: {}",
                    status,
                    stderr_tail(&mut stderr_log)
                )));
            }
            WaitOutcome::TimedOut => {
                return Err(SpeakError::Capability(format!(
                    "render timed out after {}s",
                    self.render_timeout.as_secs()
                )));
            }
            WaitOutcome::Cancelled => {
                return Err(SpeakError::Capability("render cancelled".to_string()));
            }
        }

        let audio = wav::read_wav(scratch.path())?;
        if audio.samples.is_empty() {
            return Err(SpeakError::Capability("no audio generated".to_string()));
        }
        Ok(audio)
    }

    fn play(&self, audio: &Audio) -> Result<()> {
        let player = Player::resolve(self.player.as_deref())?;
        player.play(audio, self.playback_timeout, &self.supervisor)
    }

    fn save(&self, audio: &Audio, path: &Path) -> Result<()> {
        wav::write_wav(audio, path)
    }
}

fn single_line(text: &str) -> String {
    let mut line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    line.push('\n');
    line
}

fn stderr_tail(log: &mut File) -> String {
    let mut content = String::new();
    if log.seek(SeekFrom::Start(0)).is_err() || log.read_to_string(&mut content).is_err() {
        return "(stderr unavailable)".to_string();
    }
    let trimmed = content.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map_or(0, |(i, _)| i);
    trimmed[start..].to_string()
}
