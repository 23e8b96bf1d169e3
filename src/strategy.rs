//! Concurrency strategy names shared by `say` and `listen`.
//!
//! `skip`, `timeout` and `queue` are the user-facing names for the three
//! contention policies. Both triggers resolve their flags through
//! [`ContentionFlags::resolve`], so the same combination means the same thing
//! everywhere.

use crate::error::{Result, SpeakError};
use crate::locks::{ContentionPolicy, timeout_from_secs};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default bounded-wait budget for the `timeout` strategy.
pub const DEFAULT_LOCK_TIMEOUT_SECS: f64 = 30.0;

/// User-facing concurrency strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Skip when another instance is speaking.
    #[default]
    Skip,
    /// Wait a bounded time for the other instance, then give up.
    Timeout,
    /// Wait as long as it takes.
    Queue,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Skip => "skip",
            Strategy::Timeout => "timeout",
            Strategy::Queue => "queue",
        }
    }

    /// Map to a policy; `timeout_secs` only matters for `Timeout`.
    pub fn to_policy(self, timeout_secs: f64) -> Result<ContentionPolicy> {
        Ok(match self {
            Strategy::Skip => ContentionPolicy::FailFast,
            Strategy::Timeout => ContentionPolicy::BoundedWait(timeout_from_secs(timeout_secs)?),
            Strategy::Queue => ContentionPolicy::UnboundedWait,
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw contention flags as given on a command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentionFlags {
    pub strategy: Option<Strategy>,
    pub skip_if_locked: bool,
    pub lock_timeout: Option<f64>,
    pub no_lock: bool,
}

impl ContentionFlags {
    /// Resolve into a policy, or `None` when locking is disabled.
    ///
    /// Contradictory combinations are configuration errors; no flag silently
    /// wins over another. `default_timeout_secs` fills in `--strategy timeout`
    /// without `--lock-timeout`.
    pub fn resolve(&self, default_timeout_secs: f64) -> Result<Option<ContentionPolicy>> {
        if self.no_lock {
            if self.strategy.is_some() || self.skip_if_locked || self.lock_timeout.is_some() {
                return Err(SpeakError::Config(
                    "--no-lock cannot be combined with other locking options".to_string(),
                ));
            }
            return Ok(None);
        }

        let Some(strategy) = self.strategy else {
            return ContentionPolicy::from_flags(self.skip_if_locked, self.lock_timeout).map(Some);
        };

        let conflict = match strategy {
            Strategy::Skip => self.lock_timeout.is_some(),
            Strategy::Timeout => self.skip_if_locked,
            Strategy::Queue => self.skip_if_locked || self.lock_timeout.is_some(),
        };
        if conflict {
            return Err(SpeakError::Config(format!(
                "--strategy {} conflicts with {}",
                strategy,
                if self.skip_if_locked {
                    "--skip-if-locked"
                } else {
                    "--lock-timeout"
                }
            )));
        }

        strategy
            .to_policy(self.lock_timeout.unwrap_or(default_timeout_secs))
            .map(Some)
    }
}
