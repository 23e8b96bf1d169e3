//! Tests for config functionality.

use super::operations::CONFIG_ENV;
use crate::config::{Config, default_lock_path};
use crate::error::SpeakError;
use crate::strategy::Strategy;
use serial_test::serial;
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.lock_path, default_lock_path());
    assert!(config.lock_path.starts_with(std::env::temp_dir()));
    assert_eq!(config.poll_interval_ms, 100);
    assert_eq!(config.piper_bin, PathBuf::from("piper"));
    assert_eq!(config.model, PathBuf::from("models/en_US-lessac-medium.onnx"));
    assert_eq!(config.output, PathBuf::from("output/speech.wav"));
    assert_eq!(config.render_timeout_secs, 120);
    assert_eq!(config.playback_timeout_secs, 300);
    assert!(config.player.is_none());

    assert_eq!(config.mqtt.broker, "localhost");
    assert_eq!(config.mqtt.port, 1883);
    assert_eq!(config.mqtt.topic, "tts/speak");
    assert_eq!(config.mqtt.strategy, Strategy::Skip);
    assert_eq!(config.mqtt.lock_timeout_secs, 30.0);
    assert_eq!(config.mqtt.stats_every, 10);
    assert_eq!(config.mqtt.invocation_timeout_secs, 120);
}

#[test]
fn test_parse_empty_yaml() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config.poll_interval_ms, 100);
    assert_eq!(config.mqtt.topic, "tts/speak");
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
lock_path: /run/speak/speak.lock
player: "paplay --volume 40000"
mqtt:
  broker: mqtt.local
  strategy: timeout
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.lock_path, PathBuf::from("/run/speak/speak.lock"));
    assert_eq!(config.player.as_deref(), Some("paplay --volume 40000"));
    assert_eq!(config.mqtt.broker, "mqtt.local");
    assert_eq!(config.mqtt.strategy, Strategy::Timeout);

    // Unspecified values should use defaults
    assert_eq!(config.mqtt.port, 1883);
    assert_eq!(config.render_timeout_secs, 120);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let yaml = r#"
future_option: true
mqtt:
  qos: 2
"#;
    assert!(Config::from_yaml(yaml).is_ok());
}

#[test]
fn test_invalid_values_are_rejected() {
    for yaml in [
        "poll_interval_ms: 0",
        "render_timeout_secs: 0",
        "mqtt:\n  stats_every: 0",
        "mqtt:\n  port: 0",
        "mqtt:\n  lock_timeout_secs: -1",
        "mqtt:\n  topic: ''",
        "lock_path: ''",
    ] {
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(
            matches!(err, SpeakError::Config(_)),
            "{} should be rejected",
            yaml
        );
    }
}

#[test]
fn test_bad_strategy_name_is_a_parse_error() {
    let err = Config::from_yaml("mqtt:\n  strategy: eventually").unwrap_err();
    assert!(err.to_string().contains("failed to parse config YAML"));
}

#[test]
fn test_yaml_roundtrip_preserves_values() {
    let mut config = Config::default();
    config.mqtt.username = Some("speaker".to_string());
    config.mqtt.strategy = Strategy::Queue;

    let parsed = Config::from_yaml(&config.to_yaml().unwrap()).unwrap();
    assert_eq!(parsed.mqtt.username.as_deref(), Some("speaker"));
    assert_eq!(parsed.mqtt.strategy, Strategy::Queue);
    assert!(parsed.mqtt.password.is_none());
}

#[test]
fn test_env_overrides() {
    let env: HashMap<&str, &str> = [
        ("SPEAK_LOCK_PATH", "/tmp/other.lock"),
        ("PIPER_BIN", "/opt/piper/piper"),
        ("SPEAK_MODEL", ""),
    ]
    .into_iter()
    .collect();

    let mut config = Config::default();
    config.apply_env(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.lock_path, PathBuf::from("/tmp/other.lock"));
    assert_eq!(config.piper_bin, PathBuf::from("/opt/piper/piper"));
    // Empty values do not override.
    assert_eq!(config.model, Config::default().model);
}

#[test]
fn test_load_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let err = Config::load(dir.path().join("missing.yaml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
#[serial]
fn test_resolve_prefers_explicit_path_over_env() {
    let dir = TempDir::new().unwrap();
    let explicit = dir.path().join("explicit.yaml");
    let from_env = dir.path().join("env.yaml");
    std::fs::write(&explicit, "mqtt:\n  topic: explicit/topic\n").unwrap();
    std::fs::write(&from_env, "mqtt:\n  topic: env/topic\n").unwrap();

    // SAFETY: serialized with every other test touching the environment.
    unsafe { std::env::set_var(CONFIG_ENV, &from_env) };

    let config = Config::resolve(Some(&explicit)).unwrap();
    assert_eq!(config.mqtt.topic, "explicit/topic");

    let config = Config::resolve(None).unwrap();
    assert_eq!(config.mqtt.topic, "env/topic");

    unsafe { std::env::remove_var(CONFIG_ENV) };
}

#[test]
#[serial]
fn test_resolve_without_any_file_uses_defaults() {
    unsafe { std::env::remove_var(CONFIG_ENV) };

    let config = Config::resolve(None).unwrap();
    assert_eq!(config.mqtt.broker, "localhost");
}
