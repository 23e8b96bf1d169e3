//! Render, playback and save capabilities.
//!
//! The coordinator treats speech as an opaque, long-running, fallible call.
//! [`SpeechBackend`] is that seam; [`PiperBackend`] is the production
//! implementation that drives the external `piper` executable and a system
//! audio player.

mod piper;
mod player;
mod process;
mod wav;

pub use piper::PiperBackend;
pub use process::{Supervisor, WaitOutcome, watch};

use crate::error::Result;
use std::path::Path;

/// Rendered speech: interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Audio {
    /// Playback length.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (f64::from(self.sample_rate) * f64::from(self.channels))
    }
}

/// The external capability wrapped by the exclusive runner.
///
/// All three calls may block for a long time and touch exclusive resources
/// (inference context, audio device). Callers go through
/// `runner::Runner` so only one process uses them at a time.
pub trait SpeechBackend {
    /// Synthesize `text`, optionally with hardware acceleration.
    fn render(&self, text: &str, accelerate: bool) -> Result<Audio>;

    /// Play audio on the default output device until it finishes.
    fn play(&self, audio: &Audio) -> Result<()>;

    /// Write audio to a WAV file at `path`.
    fn save(&self, audio: &Audio, path: &Path) -> Result<()>;
}
