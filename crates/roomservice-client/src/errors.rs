//! Client error types.

use thiserror::Error;

/// Failures opening or using a transport link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The link is closed.
    #[error("link closed")]
    Closed,
}

/// Failures reported by the client handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// No open connection to send on.
    #[error("not connected")]
    NotConnected,
    /// The client has been unmounted.
    #[error("client stopped")]
    Stopped,
}
