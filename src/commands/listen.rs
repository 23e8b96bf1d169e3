//! Implementation of the `speak listen` command.

use crate::bridge::{Bridge, BridgeSettings, BusEvent, MqttLink, MqttSettings, SubprocessDispatch};
use crate::cli::ListenArgs;
use crate::config::{Config, MqttConfig};
use crate::error::{Result, SpeakError};
use crate::exit_codes;
use crate::locks::ContentionPolicy;
use crate::runner::Output;
use crate::signals;
use crate::strategy::ContentionFlags;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;

/// Execute the `speak listen` command.
pub fn cmd_listen(config: &Config, config_path: Option<PathBuf>, args: ListenArgs) -> Result<i32> {
    let mqtt = merge_mqtt(&config.mqtt, &args);
    let settings = BridgeSettings {
        policy: resolve_policy(&mqtt, &args)?,
        output: args.output.clone().map_or(Output::Play, Output::Save),
        accelerate: args.gpu,
        stats_every: mqtt.stats_every,
    };
    if settings.stats_every == 0 {
        return Err(SpeakError::Config(
            "--stats-every must be greater than 0".to_string(),
        ));
    }

    let dispatch =
        SubprocessDispatch::current_exe(Duration::from_secs(mqtt.invocation_timeout_secs))?
            .with_config(config_path);

    let (tx, rx) = mpsc::channel();
    let cancel = dispatch.cancel_flag();
    let shutdown_tx = tx.clone();
    signals::install(move |_| {
        cancel.store(true, Ordering::SeqCst);
        let _ = shutdown_tx.send(BusEvent::Shutdown);
    })?;

    match settings.policy {
        Some(policy) => tracing::info!(%policy, topic = %mqtt.topic, "listening for messages"),
        None => tracing::warn!(topic = %mqtt.topic, "listening with locking disabled"),
    }
    let link = MqttLink::connect(&MqttSettings::from_config(&mqtt), tx)?;
    let result = Bridge::new(dispatch, settings).run(&rx);
    link.disconnect();

    let counters = result?;
    println!("Final stats: {}", counters);
    Ok(exit_codes::SUCCESS)
}

/// Command-line values override the `mqtt:` config section.
fn merge_mqtt(base: &MqttConfig, args: &ListenArgs) -> MqttConfig {
    let mut mqtt = base.clone();
    if let Some(server) = &args.server {
        mqtt.broker = server.clone();
    }
    if let Some(port) = args.port {
        mqtt.port = port;
    }
    if let Some(topic) = &args.topic {
        mqtt.topic = topic.clone();
    }
    if args.username.is_some() {
        mqtt.username = args.username.clone();
    }
    if args.password.is_some() {
        mqtt.password = args.password.clone();
    }
    if let Some(strategy) = args.strategy {
        mqtt.strategy = strategy;
    }
    if let Some(stats_every) = args.stats_every {
        mqtt.stats_every = stats_every;
    }
    mqtt
}

/// The configured strategy applies only when no contention flag was given;
/// the legacy flags then resolve exactly as they do for `say`.
fn contention_flags(mqtt: &MqttConfig, args: &ListenArgs) -> ContentionFlags {
    let legacy = args.skip_if_locked || args.lock_timeout.is_some() || args.no_lock;
    ContentionFlags {
        strategy: args.strategy.or((!legacy).then_some(mqtt.strategy)),
        skip_if_locked: args.skip_if_locked,
        lock_timeout: args.lock_timeout,
        no_lock: args.no_lock,
    }
}

fn resolve_policy(mqtt: &MqttConfig, args: &ListenArgs) -> Result<Option<ContentionPolicy>> {
    contention_flags(mqtt, args).resolve(mqtt.lock_timeout_secs)
}
