//! Configuration model for speak.
//!
//! This module defines the Config struct that represents the optional
//! `config.yaml`. It supports forward-compatible YAML parsing (unknown fields
//! are ignored), sensible defaults for every field, environment overrides, and
//! validation of config values.

mod model;
mod operations;

#[cfg(test)]
mod tests;

// Re-export public API
pub use model::{Config, MqttConfig, default_lock_path};
