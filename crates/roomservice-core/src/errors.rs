//! Error types shared across the channel crates.

use thiserror::Error;

use crate::ids::OrderId;

/// Failures reported by the order-management collaborator.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The submitted data was rejected.
    #[error("invalid order: {0}")]
    Validation(String),
    /// No order exists with the given identifier.
    #[error("order not found: {0}")]
    NotFound(OrderId),
}

impl OrderError {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_ORDER",
            Self::NotFound(_) => "ORDER_NOT_FOUND",
        }
    }
}

/// Failures encoding or decoding a wire envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not a valid envelope.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A binary frame did not contain UTF-8 text.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    /// Attempted to send an envelope with no wire form.
    #[error("envelope has no wire representation")]
    Unsendable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display() {
        let err = OrderError::Validation("order has no items".into());
        assert_eq!(err.to_string(), "invalid order: order has no items");
        assert_eq!(err.code(), "INVALID_ORDER");
    }

    #[test]
    fn not_found_display() {
        let err = OrderError::NotFound(OrderId::from("ord_9"));
        assert_eq!(err.to_string(), "order not found: ord_9");
        assert_eq!(err.code(), "ORDER_NOT_FOUND");
    }

    #[test]
    fn malformed_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: EnvelopeError = json_err.into();
        assert!(err.to_string().starts_with("malformed envelope"));
    }
}
