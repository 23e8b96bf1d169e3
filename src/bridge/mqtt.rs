//! MQTT transport for the bridge.
//!
//! A pump thread drives the rumqttc connection and forwards publishes as
//! [`BusEvent`]s. The subscription is renewed on every ConnAck so it survives
//! broker reconnects.

use super::BusEvent;
use crate::config::MqttConfig;
use crate::error::{Result, SpeakError};
use rumqttc::{Client, Connection, ConnectionError, Event, MqttOptions, Packet, QoS};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

/// Delay before polling again after a transient connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Bounded request queue between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 10;

/// Connection parameters for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub client_id: String,
}

impl MqttSettings {
    /// Settings from config, with a per-process client id.
    pub fn from_config(config: &MqttConfig) -> Self {
        Self {
            broker: config.broker.clone(),
            port: config.port,
            topic: config.topic.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            client_id: format!("speak-{}", std::process::id()),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// A running MQTT connection. The pump thread exits on disconnect, on a
/// refused connection, or once the event receiver is dropped.
pub struct MqttLink {
    client: Client,
}

impl MqttLink {
    /// Connect and start forwarding messages to `events`.
    pub fn connect(settings: &MqttSettings, events: Sender<BusEvent>) -> Result<Self> {
        let (client, connection) = Client::new(settings.options(), REQUEST_CAPACITY);
        tracing::info!(
            broker = %settings.broker,
            port = settings.port,
            topic = %settings.topic,
            "connecting to MQTT broker"
        );

        let pump_client = client.clone();
        let topic = settings.topic.clone();
        thread::Builder::new()
            .name("speak-mqtt".to_string())
            .spawn(move || pump(connection, pump_client, topic, events))
            .map_err(|e| SpeakError::Bus(format!("failed to spawn MQTT thread: {}", e)))?;

        Ok(Self { client })
    }

    /// Ask the event loop to disconnect. Does not wait: while the broker is
    /// unreachable the request cannot be sent.
    pub fn disconnect(self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
        }
    }
}

fn pump(mut connection: Connection, client: Client, topic: String, events: Sender<BusEvent>) {
    for notification in connection.iter() {
        let forwarded = match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!(topic = %topic, "connected, subscribing");
                if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                    tracing::warn!(error = %e, "subscribe request failed");
                }
                Ok(())
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => events.send(BusEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                tracing::debug!("disconnect sent");
                break;
            }
            Ok(_) => Ok(()),
            Err(ConnectionError::ConnectionRefused(code)) => {
                let _ = events.send(BusEvent::Fatal(format!(
                    "broker refused connection: {:?}",
                    code
                )));
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection error, retrying");
                thread::sleep(RECONNECT_DELAY);
                Ok(())
            }
        };
        if forwarded.is_err() {
            tracing::debug!("bridge stopped listening");
            break;
        }
    }
}
