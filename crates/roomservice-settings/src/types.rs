//! Settings types.
//!
//! All structs use `#[serde(default)]` so a partial user file only has to
//! name the keys it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomserviceSettings {
    /// Notification server settings.
    pub server: ServerSettings,
    /// Notification client settings.
    pub client: ClientSettings,
}

impl RoomserviceSettings {
    /// Reject values the channel cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.client.validate()
    }
}

/// Server network and liveness settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub ws_path: String,
    /// Liveness sweep cadence in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Delay before the `connection` greeting is sent to a new session.
    pub welcome_delay_ms: u64,
    /// Outbound frames buffered per session before sends start failing.
    pub send_queue_capacity: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for session tasks to drain.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            heartbeat_interval_ms: 30_000,
            welcome_delay_ms: 100,
            send_queue_capacity: 256,
            max_message_size: 1024 * 1024,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ServerSettings {
    fn validate(&self) -> Result<()> {
        if !self.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.wsPath must start with '/': {}",
                self.ws_path
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Client connection policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Explicit channel URL. When unset the URL is derived from `origin`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Origin of the HTTP API the channel shares (scheme picks `ws`/`wss`).
    pub origin: String,
    /// Path of the WebSocket endpoint on the origin.
    pub ws_path: String,
    /// Reconnect automatically after an unexpected close.
    pub auto_reconnect: bool,
    /// Minimum spacing between connect attempts in milliseconds.
    pub rate_limit_ms: u64,
    /// First reconnect delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Reconnect delay cap in milliseconds.
    pub backoff_max_ms: u64,
    /// Consecutive failures tolerated before the user is notified.
    pub failure_notice_threshold: u32,
    /// Rolling window for the attempt cap, in milliseconds.
    pub flap_window_ms: u64,
    /// Transport opens allowed inside one rolling window.
    pub flap_max_attempts: usize,
    /// How long a transport open may take before it counts as failed.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: None,
            origin: "http://127.0.0.1:8080".to_string(),
            ws_path: "/ws".to_string(),
            auto_reconnect: true,
            rate_limit_ms: 3_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            failure_notice_threshold: 2,
            flap_window_ms: 60_000,
            flap_max_attempts: 10,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ClientSettings {
    /// URL the client connects to.
    ///
    /// Uses `url` when set. Otherwise swaps the origin's `http`/`https`
    /// scheme for `ws`/`wss` and appends `ws_path`.
    #[must_use]
    pub fn resolved_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let origin = self.origin.trim_end_matches('/');
        let ws_origin = if let Some(rest) = origin.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = origin.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            origin.to_string()
        };
        format!("{ws_origin}{}", self.ws_path)
    }

    fn validate(&self) -> Result<()> {
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err(SettingsError::InvalidValue(format!(
                "client backoff range is empty: base {} ms, max {} ms",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        if self.flap_max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "client.flapMaxAttempts must be positive".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "client.connectTimeoutMs must be positive".into(),
            ));
        }
        Ok(())
    }
}
