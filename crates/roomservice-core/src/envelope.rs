//! Wire envelopes exchanged over the notification channel.
//!
//! Every frame is a UTF-8 JSON object tagged by `type`:
//!
//! | `type` | payload | direction |
//! |---|---|---|
//! | `connection` | `message` | server → client, once per session |
//! | `echo` | `data` | server → client, reflects a client frame |
//! | `new-order` | `order` | server → client |
//! | `order-status-update` | `order` | server → client |
//!
//! Unknown `type` values decode to [`Envelope::Unknown`] so that older
//! clients ignore event kinds added later instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EnvelopeError;
use crate::order::Order;

/// A tagged message unit carried over the channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    /// Greeting sent once after a session is admitted.
    Connection {
        /// Human-readable greeting.
        message: String,
    },
    /// Diagnostic reflection of a client-sent payload.
    Echo {
        /// The payload the client sent.
        data: Value,
    },
    /// An order was created.
    NewOrder {
        /// Snapshot of the created order.
        order: Order,
    },
    /// An order's status, settlement or payment flags changed.
    OrderStatusUpdate {
        /// Snapshot of the order after the change.
        order: Order,
    },
    /// Any `type` this build does not know about.
    #[serde(other)]
    Unknown,
}

/// Discriminant of a known envelope type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// `connection`
    Connection,
    /// `echo`
    Echo,
    /// `new-order`
    NewOrder,
    /// `order-status-update`
    OrderStatusUpdate,
}

impl EventKind {
    /// Wire string of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Echo => "echo",
            Self::NewOrder => "new-order",
            Self::OrderStatusUpdate => "order-status-update",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All known kinds, for exhaustive testing.
pub const ALL_EVENT_KINDS: &[EventKind] = &[
    EventKind::Connection,
    EventKind::Echo,
    EventKind::NewOrder,
    EventKind::OrderStatusUpdate,
];

impl Envelope {
    /// Build a `connection` greeting.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Build an `echo` reflecting `data`.
    #[must_use]
    pub fn echo(data: Value) -> Self {
        Self::Echo { data }
    }

    /// Build a `new-order` event.
    #[must_use]
    pub fn new_order(order: Order) -> Self {
        Self::NewOrder { order }
    }

    /// Build an `order-status-update` event.
    #[must_use]
    pub fn order_status_update(order: Order) -> Self {
        Self::OrderStatusUpdate { order }
    }

    /// Kind of the envelope, `None` for [`Envelope::Unknown`].
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Connection { .. } => Some(EventKind::Connection),
            Self::Echo { .. } => Some(EventKind::Echo),
            Self::NewOrder { .. } => Some(EventKind::NewOrder),
            Self::OrderStatusUpdate { .. } => Some(EventKind::OrderStatusUpdate),
            Self::Unknown => None,
        }
    }

    /// Order snapshot carried by order events.
    #[must_use]
    pub fn order(&self) -> Option<&Order> {
        match self {
            Self::NewOrder { order } | Self::OrderStatusUpdate { order } => Some(order),
            _ => None,
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// [`Envelope::Unknown`] has no wire form and cannot be sent.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        if matches!(self, Self::Unknown) {
            return Err(EnvelopeError::Unsendable);
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a frame delivered as raw bytes (binary frames carrying UTF-8).
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| EnvelopeError::InvalidUtf8)?;
        Self::decode(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::OrderId;
    use crate::order::{GuestContact, OrderItem, OrderStatus};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn sample_order() -> Order {
        Order {
            id: OrderId::from("ord_7"),
            created_at: chrono::Utc::now(),
            status: OrderStatus::Pending,
            guest: GuestContact {
                room_number: Some("204".into()),
                mobile_number: None,
                name: Some("Ana".into()),
            },
            items: vec![OrderItem {
                name: "Omelette".into(),
                quantity: 1,
                price: 8.0,
            }],
            total: 8.0,
            settled: false,
            paid: false,
        }
    }

    #[test]
    fn connection_wire_shape() {
        let text = Envelope::connection("hello").encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "connection", "message": "hello"}));
    }

    #[test]
    fn order_events_use_kebab_case_tags() {
        let created = Envelope::new_order(sample_order()).encode().unwrap();
        let updated = Envelope::order_status_update(sample_order())
            .encode()
            .unwrap();
        let created: Value = serde_json::from_str(&created).unwrap();
        let updated: Value = serde_json::from_str(&updated).unwrap();
        assert_eq!(created["type"], "new-order");
        assert_eq!(created["order"]["id"], "ord_7");
        assert_eq!(updated["type"], "order-status-update");
        assert_eq!(updated["order"]["roomNumber"], "204");
    }

    #[test]
    fn decodes_server_frame() {
        let text = r#"{"type":"echo","data":{"ping":1}}"#;
        let env = Envelope::decode(text).unwrap();
        assert_eq!(env, Envelope::echo(json!({"ping": 1})));
        assert_eq!(env.kind(), Some(EventKind::Echo));
    }

    #[test]
    fn unknown_type_is_ignorable() {
        let env = Envelope::decode(r#"{"type":"menu-updated","menu":[]}"#).unwrap();
        assert_eq!(env, Envelope::Unknown);
        assert_eq!(env.kind(), None);
    }

    #[test]
    fn unknown_cannot_be_encoded() {
        assert_matches!(Envelope::Unknown.encode(), Err(EnvelopeError::Unsendable));
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert_matches!(
            Envelope::decode("not json"),
            Err(EnvelopeError::Malformed(_))
        );
        assert_matches!(
            Envelope::decode(r#"{"message":"no type"}"#),
            Err(EnvelopeError::Malformed(_))
        );
    }

    #[test]
    fn known_type_with_wrong_payload_is_malformed() {
        assert_matches!(
            Envelope::decode(r#"{"type":"new-order","order":"nope"}"#),
            Err(EnvelopeError::Malformed(_))
        );
    }

    #[test]
    fn binary_frames_must_be_utf8() {
        assert_matches!(
            Envelope::decode_bytes(&[0xff, 0xfe]),
            Err(EnvelopeError::InvalidUtf8)
        );
        let env = Envelope::decode_bytes(br#"{"type":"connection","message":"x"}"#).unwrap();
        assert_eq!(env.kind(), Some(EventKind::Connection));
    }

    #[test]
    fn order_accessor() {
        let env = Envelope::order_status_update(sample_order());
        assert_eq!(env.order().unwrap().id.as_str(), "ord_7");
        assert!(Envelope::connection("x").order().is_none());
    }

    #[test]
    fn kind_strings_match_serde() {
        for kind in ALL_EVENT_KINDS {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
