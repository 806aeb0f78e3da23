//! WebSocket session management, liveness monitoring, and broadcasting.

pub mod handler;
pub mod liveness;
pub mod registry;
pub mod session;
pub mod socket;
