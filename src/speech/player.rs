//! Playback through a system audio player.

use super::process::{Supervisor, WaitOutcome};
use super::{Audio, wav};
use crate::error::{Result, SpeakError};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Players tried in order when none is configured.
const AUTO_PLAYERS: &[&[&str]] = &[
    &["aplay", "-q"],
    &["paplay"],
    &["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet"],
];

/// A resolved player command; the WAV path is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    program: PathBuf,
    args: Vec<String>,
}

impl Player {
    /// Resolve the player from a configured command line, or auto-detect one.
    pub fn resolve(configured: Option<&str>) -> Result<Self> {
        match configured {
            Some(command) => Self::from_command_line(command),
            None => Self::detect().ok_or_else(|| {
                SpeakError::Capability(
                    "no audio player found (tried aplay, paplay, ffplay); \
                     set `player` in the config"
                        .to_string(),
                )
            }),
        }
    }

    fn from_command_line(command: &str) -> Result<Self> {
        let parts = shell_words::split(command).map_err(|e| {
            SpeakError::Config(format!("failed to parse player command '{}': {}", command, e))
        })?;
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| SpeakError::Config("player command is empty".to_string()))?;
        Ok(Self {
            program: PathBuf::from(program),
            args: args.to_vec(),
        })
    }

    fn detect() -> Option<Self> {
        AUTO_PLAYERS.iter().find_map(|candidate| {
            let (name, args) = candidate.split_first()?;
            find_on_path(name).map(|program| Self {
                program,
                args: args.iter().map(|a| (*a).to_string()).collect(),
            })
        })
    }

    /// Play `audio` and wait for the player to finish, at most `timeout`.
    pub fn play(&self, audio: &Audio, timeout: Duration, supervisor: &Supervisor) -> Result<()> {
        let scratch = tempfile::Builder::new()
            .prefix("speak-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| SpeakError::Capability(format!("failed to create scratch WAV: {}", e)))?;
        wav::write_wav(audio, scratch.path())?;
        self.play_file(scratch.path(), timeout, supervisor)
    }

    fn play_file(&self, path: &Path, timeout: Duration, supervisor: &Supervisor) -> Result<()> {
        tracing::debug!(player = %self.program.display(), path = %path.display(), "starting playback");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = supervisor.spawn(&mut cmd, |e| {
            SpeakError::Capability(format!(
                "failed to start player '{}': {}",
                self.program.display(),
                e
            ))
        })?;

        match child.wait(timeout)? {
            WaitOutcome::Exited(status) if status.success() => Ok(()),
            WaitOutcome::Exited(status) => Err(SpeakError::Capability(format!(
                "player '{}' failed with {}",
                self.program.display(),
                status
            ))),
            WaitOutcome::TimedOut => Err(SpeakError::Capability(format!(
                "playback timed out after {}s",
                timeout.as_secs()
            ))),
            WaitOutcome::Cancelled => Err(SpeakError::Capability("playback cancelled".to_string())),
        }
    }
}

/// Search PATH for an executable name; path-like names are checked directly.
pub(crate) fn find_on_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return p.exists().then_some(p);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}
