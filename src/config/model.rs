//! Config struct definition and default implementation.

use crate::strategy::{DEFAULT_LOCK_TIMEOUT_SECS, Strategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Well-known lock location shared by every cooperating process on the host.
pub fn default_lock_path() -> PathBuf {
    std::env::temp_dir().join("speak-tts.lock")
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_piper_bin() -> PathBuf {
    PathBuf::from("piper")
}

fn default_model() -> PathBuf {
    PathBuf::from("models/en_US-lessac-medium.onnx")
}

fn default_output() -> PathBuf {
    PathBuf::from("output/speech.wav")
}

fn default_render_timeout_secs() -> u64 {
    120
}

fn default_playback_timeout_secs() -> u64 {
    300
}

/// Configuration for speak.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Coordination
    // =========================================================================
    /// Lock file shared by all cooperating processes.
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    /// Poll interval for the `timeout` strategy.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    // =========================================================================
    // Speech
    // =========================================================================
    /// Piper executable (name on PATH or a path).
    #[serde(default = "default_piper_bin")]
    pub piper_bin: PathBuf,

    /// Voice model (.onnx).
    #[serde(default = "default_model")]
    pub model: PathBuf,

    /// Default WAV destination when neither `--output` nor `--play` is given.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Ceiling for one render before piper is killed.
    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,

    /// Ceiling for one playback before the player is killed.
    #[serde(default = "default_playback_timeout_secs")]
    pub playback_timeout_secs: u64,

    /// Player command line; auto-detected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,

    // =========================================================================
    // MQTT bridge
    // =========================================================================
    #[serde(default)]
    pub mqtt: MqttConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_path: default_lock_path(),
            poll_interval_ms: default_poll_interval_ms(),
            piper_bin: default_piper_bin(),
            model: default_model(),
            output: default_output(),
            render_timeout_secs: default_render_timeout_secs(),
            playback_timeout_secs: default_playback_timeout_secs(),
            player: None,
            mqtt: MqttConfig::default(),
        }
    }
}

/// Settings for `speak listen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub keep_alive_secs: u64,

    /// Strategy applied to every message.
    pub strategy: Strategy,

    /// Budget for the `timeout` strategy.
    pub lock_timeout_secs: f64,

    /// Log running counters every N messages.
    pub stats_every: u64,

    /// Ceiling for one `speak say` child, lock wait included.
    pub invocation_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            topic: "tts/speak".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            strategy: Strategy::Skip,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            stats_every: 10,
            invocation_timeout_secs: 120,
        }
    }
}
