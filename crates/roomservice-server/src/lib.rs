//! # roomservice-server
//!
//! Axum HTTP + `WebSocket` server for real-time order notifications.
//!
//! - `WebSocket` gateway: session lifecycle, `connection` greeting, echo
//! - Liveness monitor: periodic probe sweep evicting silent sessions
//! - Session registry: fault-isolated fan-out of envelopes to every session
//! - Order notifications: a decorator over the order store that broadcasts
//!   after each committed create/update
//! - HTTP endpoints: order routes, health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;
