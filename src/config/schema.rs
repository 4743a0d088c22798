//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Path on which the WebSocket upgrade is accepted.
pub const UPGRADE_PATH: &str = "/websocket";

/// Largest aggregated HTTP message (and WebSocket message) accepted: 5 MiB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 5 * 1024 * 1024;

/// Seconds of read inactivity before a connection is closed.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 15;

/// Root configuration for the WebSocket RPC server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listening socket, connection and execution pool settings.
    pub server: ServerConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Server configuration. Immutable once the server starts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or IP address to bind (e.g., "127.0.0.1").
    pub bind_host: String,

    /// TCP port to bind. `0` picks an ephemeral port.
    pub bind_port: u16,

    /// Read inactivity window before a connection is closed.
    pub idle_timeout_secs: u64,

    /// Upper bound for one aggregated HTTP message or WebSocket message.
    pub max_message_bytes: usize,

    /// WebSocket upgrade path. Fixed; never read from config files.
    #[serde(skip, default = "default_upgrade_path")]
    pub upgrade_path: String,

    /// Maximum concurrent connections (backpressure on accept).
    pub max_connections: usize,

    /// Threads in the acceptor pool.
    pub acceptor_threads: usize,

    /// Threads in the worker pool. `None` uses one per CPU core.
    pub worker_threads: Option<usize>,

    /// How long `stop()` waits for live connections before forcing them closed.
    pub shutdown_grace_secs: u64,
}

fn default_upgrade_path() -> String {
    UPGRADE_PATH.to_string()
}

impl ServerConfig {
    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 4445,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            upgrade_path: default_upgrade_path(),
            max_connections: 10_000,
            acceptor_threads: 1,
            worker_threads: None,
            shutdown_grace_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
        }
    }
}
