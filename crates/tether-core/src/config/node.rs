//! Node engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the control node engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// UDP address the node's single endpoint binds to, for both listening
    /// and dialing out
    pub local_address: String,

    /// How often an outbound session sends a heartbeat
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Send and receive deadline for heartbeats. Also the QUIC keep-alive
    /// interval; the idle timeout is twice this value.
    #[serde(with = "duration_secs")]
    pub max_heartbeat_interval: Duration,

    /// Time allowed for an inbound connection to complete its handshake
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Number of inbound connections that may be handshaking at once
    pub connection_queue_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            local_address: "0.0.0.0:6543".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            max_heartbeat_interval: Duration::from_secs(45),
            handshake_timeout: Duration::from_secs(15),
            connection_queue_size: 10,
        }
    }
}

impl NodeConfig {
    /// QUIC idle timeout derived from the heartbeat deadline
    pub fn idle_timeout(&self) -> Duration {
        self.max_heartbeat_interval * 2
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "connection_queue_size must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_interval must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.max_heartbeat_interval {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval ({:?}) must be shorter than max_heartbeat_interval ({:?})",
                self.heartbeat_interval, self.max_heartbeat_interval
            )));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "handshake_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pacing of redials to `[[remotes]]` entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Wait before the first redial of an outage, in seconds
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Longest wait between redials, in seconds
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Growth of the wait after each failed attempt
    pub multiplier: f64,

    /// Random extra wait as a fraction of the current one, clamped to 0..=1
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
