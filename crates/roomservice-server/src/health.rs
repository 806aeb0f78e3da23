//! `/health` endpoint.
//!
//! Reports whether the server is still admitting notification sessions and
//! how many are registered. Once shutdown starts the status flips to
//! `draining`: new WebSocket upgrades are refused while existing sessions
//! wind down.

use serde::Serialize;
use std::time::Instant;

/// Whether new sessions are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting sessions.
    Ok,
    /// Shutting down; upgrades get 503.
    Draining,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Admission status.
    pub status: HealthStatus,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Sessions in the registry, i.e. those a broadcast would reach.
    pub connections: usize,
}

/// Snapshot for the handler.
pub fn health_check(start_time: Instant, connections: usize, draining: bool) -> HealthResponse {
    HealthResponse {
        status: if draining {
            HealthStatus::Draining
        } else {
            HealthStatus::Ok
        },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}
