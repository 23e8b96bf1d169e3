//! Config loading, environment overrides, and validation.

use super::model::Config;
use crate::error::{Result, SpeakError};
use std::path::{Path, PathBuf};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "SPEAK_CONFIG";

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            SpeakError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| SpeakError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    #[cfg(test)]
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| SpeakError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Resolve the effective config for this process.
    ///
    /// Order: `--config` path, then `$SPEAK_CONFIG`, then defaults; environment
    /// overrides are applied on top and the result is validated.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `SPEAK_LOCK_PATH`, `PIPER_BIN` and `SPEAK_MODEL` overrides.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty("SPEAK_LOCK_PATH") {
            self.lock_path = PathBuf::from(path);
        }
        if let Some(bin) = non_empty("PIPER_BIN") {
            self.piper_bin = PathBuf::from(bin);
        }
        if let Some(model) = non_empty("SPEAK_MODEL") {
            self.model = PathBuf::from(model);
        }
    }

    /// Validate config values and return error on invalid values.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("render_timeout_secs", self.render_timeout_secs),
            ("playback_timeout_secs", self.playback_timeout_secs),
            ("mqtt.keep_alive_secs", self.mqtt.keep_alive_secs),
            ("mqtt.stats_every", self.mqtt.stats_every),
            ("mqtt.invocation_timeout_secs", self.mqtt.invocation_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(SpeakError::Config(format!(
                    "config validation failed: {} must be greater than 0",
                    name
                )));
            }
        }

        if self.mqtt.port == 0 {
            return Err(SpeakError::Config(
                "config validation failed: mqtt.port must be greater than 0".to_string(),
            ));
        }

        if self.lock_path.as_os_str().is_empty() {
            return Err(SpeakError::Config(
                "config validation failed: lock_path must not be empty".to_string(),
            ));
        }

        if !self.mqtt.lock_timeout_secs.is_finite() || self.mqtt.lock_timeout_secs < 0.0 {
            return Err(SpeakError::Config(
                "config validation failed: mqtt.lock_timeout_secs must be a non-negative number"
                    .to_string(),
            ));
        }

        if self.mqtt.topic.trim().is_empty() {
            return Err(SpeakError::Config(
                "config validation failed: mqtt.topic must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
