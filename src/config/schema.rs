//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a session server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Server naming, used in registry keys and logs.
    pub server: ServerSection,

    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Session establishment and teardown timing.
    pub session: SessionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server naming.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// Label distinguishing this server from others in the same process.
    pub label: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            label: "session-server".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:10000").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Seconds a closed connection may keep flushing writes to a client
    /// that is not reading.
    pub close_grace_secs: u64,
}

impl ListenerConfig {
    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:10000".to_string(),
            max_connections: 10_000,
            close_grace_secs: 5,
        }
    }
}

/// Session timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline given to a degraded session's dispatcher to close gracefully.
    pub degraded_close_timeout_secs: u64,

    /// How long shutdown waits for sessions to finish closing.
    pub drain_timeout_secs: u64,
}

impl SessionConfig {
    pub fn degraded_close_timeout(&self) -> Duration {
        Duration::from_secs(self.degraded_close_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            degraded_close_timeout_secs: 10,
            drain_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
