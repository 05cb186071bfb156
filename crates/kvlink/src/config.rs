// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity and process configuration.
//!
//! Every tunable lives in a configuration value handed to the instance at
//! construction time. Durations are stored in milliseconds so that the file
//! form stays readable.
//!
//! ```toml
//! [entity]
//! max_sessions = 10
//! session_idle_timeout_ms = 10000
//!
//! [process]
//! max_msg_size = 50
//! resend_interval_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Entity (store side) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Maximum number of live sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// A session with no traffic for this long is evicted.
    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout_ms: u64,

    /// How long `resp` waits for the next response.
    #[serde(default = "default_response_wait")]
    pub response_wait_ms: u64,

    /// Capacity of the per-session inbound and response channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_sessions() -> usize {
    10
}

fn default_session_idle_timeout() -> u64 {
    10_000
}

fn default_response_wait() -> u64 {
    5_000
}

fn default_channel_capacity() -> usize {
    100
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            session_idle_timeout_ms: default_session_idle_timeout(),
            response_wait_ms: default_response_wait(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EntityConfig {
    /// Builder: set the session limit.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Builder: set the idle eviction timeout.
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout_ms = as_millis(timeout);
        self
    }

    /// Builder: set the response window of `resp`.
    pub fn with_response_wait(mut self, wait: Duration) -> Self {
        self.response_wait_ms = as_millis(wait);
        self
    }

    /// Builder: set the per-session channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }

    pub fn response_wait(&self) -> Duration {
        Duration::from_millis(self.response_wait_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions cannot be 0".into()));
        }
        if self.session_idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session_idle_timeout_ms cannot be 0".into(),
            ));
        }
        if self.response_wait_ms == 0 {
            return Err(ConfigError::Invalid("response_wait_ms cannot be 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity cannot be 0".into()));
        }
        Ok(())
    }
}

/// Process (producer side) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Payload bytes per batch; the entry crossing the limit is still sent.
    #[serde(default = "default_max_msg_size")]
    pub max_msg_size: usize,

    /// Pending-entry count above which a flush happens immediately.
    #[serde(default = "default_send_msg_cutoff")]
    pub send_msg_cutoff: usize,

    /// Longest delay between the first work signal and a forced flush.
    #[serde(default = "default_send_message_max_delay")]
    pub send_message_max_delay_ms: u64,

    /// Period of the resend timer.
    #[serde(default = "default_resend_interval")]
    pub resend_interval_ms: u64,

    /// How long to wait for one acknowledgment.
    #[serde(default = "default_wait_resp_interval")]
    pub wait_resp_interval_ms: u64,

    /// Delay between reconnect attempts.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Total reconnect budget before the process shuts down.
    #[serde(default = "default_max_waiting_connection")]
    pub max_waiting_connection_ms: u64,
}

fn default_max_msg_size() -> usize {
    50
}

fn default_send_msg_cutoff() -> usize {
    150
}

fn default_send_message_max_delay() -> u64 {
    10_000
}

fn default_resend_interval() -> u64 {
    1_000
}

fn default_wait_resp_interval() -> u64 {
    4_000
}

fn default_reconnect_interval() -> u64 {
    1_000
}

fn default_max_waiting_connection() -> u64 {
    100_000
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_msg_size: default_max_msg_size(),
            send_msg_cutoff: default_send_msg_cutoff(),
            send_message_max_delay_ms: default_send_message_max_delay(),
            resend_interval_ms: default_resend_interval(),
            wait_resp_interval_ms: default_wait_resp_interval(),
            reconnect_interval_ms: default_reconnect_interval(),
            max_waiting_connection_ms: default_max_waiting_connection(),
        }
    }
}

impl ProcessConfig {
    /// Builder: set the batch byte limit.
    pub fn with_max_msg_size(mut self, max_msg_size: usize) -> Self {
        self.max_msg_size = max_msg_size;
        self
    }

    /// Builder: set the pending-count cutoff.
    pub fn with_send_msg_cutoff(mut self, cutoff: usize) -> Self {
        self.send_msg_cutoff = cutoff;
        self
    }

    /// Builder: set the forced-flush delay.
    pub fn with_send_message_max_delay(mut self, delay: Duration) -> Self {
        self.send_message_max_delay_ms = as_millis(delay);
        self
    }

    /// Builder: set the resend timer period.
    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval_ms = as_millis(interval);
        self
    }

    /// Builder: set the acknowledgment wait.
    pub fn with_wait_resp_interval(mut self, interval: Duration) -> Self {
        self.wait_resp_interval_ms = as_millis(interval);
        self
    }

    /// Builder: set the reconnect retry interval.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = as_millis(interval);
        self
    }

    /// Builder: set the total reconnect budget.
    pub fn with_max_waiting_connection(mut self, budget: Duration) -> Self {
        self.max_waiting_connection_ms = as_millis(budget);
        self
    }

    pub fn send_message_max_delay(&self) -> Duration {
        Duration::from_millis(self.send_message_max_delay_ms)
    }

    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    pub fn wait_resp_interval(&self) -> Duration {
        Duration::from_millis(self.wait_resp_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn max_waiting_connection(&self) -> Duration {
        Duration::from_millis(self.max_waiting_connection_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_msg_size == 0 {
            return Err(ConfigError::Invalid("max_msg_size cannot be 0".into()));
        }
        let durations = [
            ("send_message_max_delay_ms", self.send_message_max_delay_ms),
            ("resend_interval_ms", self.resend_interval_ms),
            ("wait_resp_interval_ms", self.wait_resp_interval_ms),
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("max_waiting_connection_ms", self.max_waiting_connection_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} cannot be 0", name)));
            }
        }
        Ok(())
    }
}

/// File form: one entity section and one section shared by all processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvlinkConfig {
    #[serde(default)]
    pub entity: EntityConfig,

    #[serde(default)]
    pub process: ProcessConfig,
}

impl KvlinkConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate both sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.entity.validate()?;
        self.process.validate()
    }
}

pub(crate) fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
