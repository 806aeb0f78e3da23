//! Order snapshots carried by the notification channel.
//!
//! The order-management collaborator owns the order lifecycle. The channel
//! only republishes snapshots after a mutation commits, so these types are
//! plain data: the only behaviour here is input validation for
//! [`NewOrder`], patch application for [`OrderPatch`], and the relevance
//! check in [`OrderContext`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrderError;
use crate::ids::OrderId;

/// Fulfilment status of an order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Received, not yet picked up by the kitchen.
    #[default]
    Pending,
    /// Being prepared.
    Preparing,
    /// Handed to the guest.
    Delivered,
    /// Declined by staff.
    Rejected,
}

impl OrderStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Preparing => "Preparing",
            Self::Delivered => "Delivered",
            Self::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to reach the guest who placed an order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestContact {
    /// Room the order is delivered to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_number: Option<String>,
    /// Guest mobile number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
    /// Guest display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One line of an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Menu item name.
    pub name: String,
    /// Number of units.
    pub quantity: u32,
    /// Unit price.
    pub price: f64,
}

impl OrderItem {
    /// Price of the whole line.
    #[must_use]
    pub fn line_total(&self) -> f64 {
        f64::from(self.quantity) * self.price
    }
}

/// Snapshot of an order as last committed by the order store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Store-assigned identifier.
    pub id: OrderId,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// Fulfilment status.
    pub status: OrderStatus,
    /// Guest contact fields, flattened onto the order on the wire.
    #[serde(flatten)]
    pub guest: GuestContact,
    /// Line items.
    pub items: Vec<OrderItem>,
    /// Sum of all line totals.
    pub total: f64,
    /// Whether the bill has been settled against the room.
    #[serde(default)]
    pub settled: bool,
    /// Whether payment has been collected.
    #[serde(default)]
    pub paid: bool,
}

/// Input accepted by the order collaborator's create operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    /// Guest contact fields.
    #[serde(flatten)]
    pub guest: GuestContact,
    /// Requested items.
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

impl NewOrder {
    /// Check the order can be accepted.
    ///
    /// An order needs at least one item, every item needs a name, a positive
    /// quantity and a non-negative price, and the guest must be reachable
    /// through a room number or a mobile number.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::Validation("order has no items".into()));
        }
        for item in &self.items {
            if item.name.trim().is_empty() {
                return Err(OrderError::Validation("item name is empty".into()));
            }
            if item.quantity == 0 {
                return Err(OrderError::Validation(format!(
                    "item '{}' has zero quantity",
                    item.name
                )));
            }
            if !item.price.is_finite() || item.price < 0.0 {
                return Err(OrderError::Validation(format!(
                    "item '{}' has an invalid price",
                    item.name
                )));
            }
        }
        let has_room = non_blank(self.guest.room_number.as_deref()).is_some();
        let has_mobile = non_blank(self.guest.mobile_number.as_deref()).is_some();
        if !has_room && !has_mobile {
            return Err(OrderError::Validation(
                "room number or mobile number is required".into(),
            ));
        }
        Ok(())
    }

    /// Sum of all line totals.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.items.iter().map(OrderItem::line_total).sum()
    }
}

/// Changes to an order's mutable fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    /// New fulfilment status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    /// New settlement flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled: Option<bool>,
    /// New payment flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid: Option<bool>,
}

impl OrderPatch {
    /// Patch that only changes the status.
    #[must_use]
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.settled.is_none() && self.paid.is_none()
    }

    /// Apply the patch in place.
    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(settled) = self.settled {
            order.settled = settled;
        }
        if let Some(paid) = self.paid {
            order.paid = paid;
        }
    }
}

/// Order context a guest client remembers locally after placing an order.
///
/// Used by the client dispatcher to decide whether a status update concerns
/// this guest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderContext {
    /// Remembered room number.
    #[serde(default)]
    pub room_number: Option<String>,
    /// Remembered mobile number.
    #[serde(default)]
    pub mobile_number: Option<String>,
}

impl OrderContext {
    /// Context keyed by room number.
    #[must_use]
    pub fn room(room_number: impl Into<String>) -> Self {
        Self {
            room_number: Some(room_number.into()),
            mobile_number: None,
        }
    }

    /// Context keyed by mobile number.
    #[must_use]
    pub fn mobile(mobile_number: impl Into<String>) -> Self {
        Self {
            room_number: None,
            mobile_number: Some(mobile_number.into()),
        }
    }

    /// Whether the order belongs to this context.
    ///
    /// Matches when either the room number or the mobile number is present
    /// on both sides and equal (surrounding whitespace ignored).
    #[must_use]
    pub fn matches(&self, order: &Order) -> bool {
        let same = |mine: Option<&str>, theirs: Option<&str>| match (
            non_blank(mine),
            non_blank(theirs),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        same(
            self.room_number.as_deref(),
            order.guest.room_number.as_deref(),
        ) || same(
            self.mobile_number.as_deref(),
            order.guest.mobile_number.as_deref(),
        )
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn item(name: &str, quantity: u32, price: f64) -> OrderItem {
        OrderItem {
            name: name.into(),
            quantity,
            price,
        }
    }

    fn order_for(room: Option<&str>, mobile: Option<&str>) -> Order {
        Order {
            id: OrderId::from("ord_1"),
            created_at: Utc::now(),
            status: OrderStatus::Pending,
            guest: GuestContact {
                room_number: room.map(Into::into),
                mobile_number: mobile.map(Into::into),
                name: None,
            },
            items: vec![item("Tea", 1, 2.5)],
            total: 2.5,
            settled: false,
            paid: false,
        }
    }

    #[test]
    fn status_serializes_as_title_case() {
        let json = serde_json::to_string(&OrderStatus::Preparing).unwrap();
        assert_eq!(json, r#""Preparing""#);
        assert_eq!(OrderStatus::Rejected.to_string(), "Rejected");
    }

    #[test]
    fn order_wire_shape_is_flat_camel_case() {
        let order = order_for(Some("204"), Some("555-0100"));
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["roomNumber"], "204");
        assert_eq!(value["mobileNumber"], "555-0100");
        assert_eq!(value["status"], "Pending");
        assert!(value["createdAt"].is_string());
        assert!(value.get("guest").is_none());
    }

    #[test]
    fn valid_order_passes() {
        let new = NewOrder {
            guest: GuestContact {
                room_number: Some("101".into()),
                ..GuestContact::default()
            },
            items: vec![item("Coffee", 2, 3.0), item("Cake", 1, 4.5)],
        };
        assert!(new.validate().is_ok());
        assert!((new.total() - 10.5).abs() < f64::EPSILON);
    }

    #[test]
    fn order_without_items_is_rejected() {
        let new = NewOrder {
            guest: GuestContact {
                room_number: Some("101".into()),
                ..GuestContact::default()
            },
            items: vec![],
        };
        assert_matches!(new.validate(), Err(OrderError::Validation(_)));
    }

    #[test]
    fn order_without_contact_is_rejected() {
        let new = NewOrder {
            guest: GuestContact {
                room_number: Some("   ".into()),
                ..GuestContact::default()
            },
            items: vec![item("Coffee", 1, 3.0)],
        };
        let err = new.validate().unwrap_err();
        assert!(err.to_string().contains("room number or mobile number"));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let new = NewOrder {
            guest: GuestContact {
                mobile_number: Some("555".into()),
                ..GuestContact::default()
            },
            items: vec![item("Coffee", 0, 3.0)],
        };
        assert_matches!(new.validate(), Err(OrderError::Validation(_)));
    }

    #[test]
    fn patch_applies_only_present_fields() {
        let mut order = order_for(Some("1"), None);
        let patch = OrderPatch {
            status: Some(OrderStatus::Delivered),
            settled: None,
            paid: Some(true),
        };
        patch.apply(&mut order);
        assert_eq!(order.status, OrderStatus::Delivered);
        assert!(!order.settled);
        assert!(order.paid);
    }

    #[test]
    fn empty_patch() {
        assert!(OrderPatch::default().is_empty());
        assert!(!OrderPatch::status(OrderStatus::Preparing).is_empty());
    }

    #[test]
    fn context_matches_room() {
        let order = order_for(Some("204"), None);
        assert!(OrderContext::room("204").matches(&order));
        assert!(OrderContext::room(" 204 ").matches(&order));
        assert!(!OrderContext::room("101").matches(&order));
    }

    #[test]
    fn context_matches_mobile() {
        let order = order_for(None, Some("555-0100"));
        assert!(OrderContext::mobile("555-0100").matches(&order));
        assert!(!OrderContext::room("555-0100").matches(&order));
    }

    #[test]
    fn empty_context_never_matches() {
        let order = order_for(None, None);
        assert!(!OrderContext::default().matches(&order));
    }
}
