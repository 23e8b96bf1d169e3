//! Message-driven trigger.
//!
//! The bridge turns text payloads arriving on a bus into invocations, one at a
//! time. Transport (MQTT, see [`mqtt`]) and execution (see [`dispatch`]) sit
//! behind a channel and a trait, so the loop itself is plain synchronous code:
//! receive one [`BusEvent`], handle it to completion, tally the outcome.

pub mod dispatch;
pub mod mqtt;


pub use dispatch::SubprocessDispatch;
pub use mqtt::{MqttLink, MqttSettings};

use crate::error::{Result, SpeakError};
use crate::locks::ContentionPolicy;
use crate::runner::{Invocation, OperationOutcome, Output};
use std::fmt;
use std::sync::mpsc::Receiver;

/// One item delivered to the bridge loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A published payload.
    Message { topic: String, payload: Vec<u8> },
    /// The bus gave up for good (e.g. connection refused).
    Fatal(String),
    /// Stop after the current item.
    Shutdown,
}

/// Executes one invocation to completion.
pub trait Dispatch {
    fn dispatch(&self, invocation: &Invocation) -> OperationOutcome;
}

/// Running tally of handled messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub received: u64,
    pub completed: u64,
    /// Busy skips and lock-wait timeouts.
    pub skipped: u64,
    pub failed: u64,
}

impl Counters {
    fn record(&mut self, outcome: &OperationOutcome) {
        match outcome {
            OperationOutcome::Completed => self.completed += 1,
            OperationOutcome::SkippedBusy | OperationOutcome::TimedOut => self.skipped += 1,
            OperationOutcome::Failed(_) => self.failed += 1,
        }
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} completed={} skipped={} failed={}",
            self.received, self.completed, self.skipped, self.failed
        )
    }
}

/// How every message is turned into an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub policy: Option<ContentionPolicy>,
    pub output: Output,
    pub accelerate: bool,
    /// Log stats after this many received messages; 0 disables periodic stats.
    pub stats_every: u64,
}

/// The bridge loop and the counters it owns.
pub struct Bridge<D: Dispatch> {
    dispatcher: D,
    settings: BridgeSettings,
    counters: Counters,
}

impl<D: Dispatch> Bridge<D> {
    pub fn new(dispatcher: D, settings: BridgeSettings) -> Self {
        Self {
            dispatcher,
            settings,
            counters: Counters::default(),
        }
    }

    #[cfg(test)]
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Handle events until shutdown or until the sender side goes away.
    ///
    /// A `Fatal` event ends the loop with a bus error; counters are logged
    /// either way.
    pub fn run(&mut self, events: &Receiver<BusEvent>) -> Result<Counters> {
        loop {
            match events.recv() {
                Ok(BusEvent::Message { topic, payload }) => self.handle_message(&topic, &payload),
                Ok(BusEvent::Fatal(reason)) => {
                    self.log_stats();
                    return Err(SpeakError::Bus(reason));
                }
                Ok(BusEvent::Shutdown) => {
                    tracing::info!("shutting down bridge");
                    break;
                }
                Err(_) => {
                    tracing::debug!("event source closed");
                    break;
                }
            }
        }
        self.log_stats();
        Ok(self.counters)
    }

    /// Handle one payload synchronously.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text.trim(),
            Err(e) => {
                tracing::warn!(topic, error = %e, "ignoring payload that is not UTF-8");
                return;
            }
        };
        if text.is_empty() {
            tracing::debug!(topic, "ignoring empty payload");
            return;
        }

        self.counters.received += 1;
        tracing::info!(topic, chars = text.chars().count(), "message received");

        let invocation = Invocation {
            text: text.to_string(),
            output: self.settings.output.clone(),
            policy: self.settings.policy,
            accelerate: self.settings.accelerate,
        };
        let outcome = self.dispatcher.dispatch(&invocation);
        match &outcome {
            OperationOutcome::Completed => tracing::info!("spoken"),
            OperationOutcome::SkippedBusy => tracing::info!("skipped, another instance is speaking"),
            OperationOutcome::TimedOut => tracing::warn!("skipped, timed out waiting for lock"),
            OperationOutcome::Failed(reason) => tracing::error!(%reason, "invocation failed"),
        }
        self.counters.record(&outcome);

        if self.settings.stats_every > 0 && self.counters.received % self.settings.stats_every == 0 {
            self.log_stats();
        }
    }

    fn log_stats(&self) {
        let c = self.counters;
        tracing::info!(
            received = c.received,
            completed = c.completed,
            skipped = c.skipped,
            failed = c.failed,
            "bridge stats"
        );
    }
}
