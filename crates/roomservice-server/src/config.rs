//! Server configuration.

use std::time::Duration;

use roomservice_settings::ServerSettings;
use serde::{Deserialize, Serialize};

use crate::websocket::socket::SessionConfig;

/// Runtime configuration for the notification server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path the WebSocket endpoint is mounted on.
    pub ws_path: String,
    /// Liveness sweep cadence in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Delay before a new session receives its greeting.
    pub welcome_delay_ms: u64,
    /// Per-session outbound queue depth.
    pub send_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Time allowed for session tasks to drain on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws".into(),
            heartbeat_interval_ms: 30_000,
            welcome_delay_ms: 100,
            send_queue_capacity: 256,
            max_message_size: 1024 * 1024,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    /// Liveness sweep cadence.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Shutdown drain budget.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Tuning handed to each session task.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            welcome_delay: Duration::from_millis(self.welcome_delay_ms),
            send_queue_capacity: self.send_queue_capacity,
        }
    }

    /// `host:port` bind string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            ws_path: s.ws_path.clone(),
            heartbeat_interval_ms: s.heartbeat_interval_ms,
            welcome_delay_ms: s.welcome_delay_ms,
            send_queue_capacity: s.send_queue_capacity,
            max_message_size: s.max_message_size,
            shutdown_timeout_ms: s.shutdown_timeout_ms,
        }
    }
}
