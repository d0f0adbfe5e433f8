//! Client configuration loaded from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Reject settings the controller cannot run with.
    pub fn validate(&self) -> Result<(), SessionError> {
        let endpoint = &self.client.endpoint;
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(SessionError::Config(format!(
                "endpoint {endpoint:?} must be a ws:// or wss:// URL"
            )));
        }
        if self.session.command_buffer == 0 {
            return Err(SessionError::Config(
                "command_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Peer connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Upper bound on one connection attempt. Unset: the transport decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            log_level: default_log_level(),
            connect_timeout_ms: None,
        }
    }
}

/// Turn handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Literal frame the peer sends on connect.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Abandon a turn the peer has not answered within this time. Unset:
    /// wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_timeout_ms: Option<u64>,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl SessionConfig {
    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            turn_timeout_ms: None,
            command_buffer: default_command_buffer(),
        }
    }
}

fn default_endpoint() -> String {
    "ws://localhost:6767".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_greeting() -> String {
    rps_types::GREETING.to_string()
}

fn default_command_buffer() -> usize {
    32
}
