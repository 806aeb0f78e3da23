//! # roomservice-core
//!
//! Shared vocabulary for the order notification channel.
//!
//! - **Branded IDs**: `OrderId`, `SessionId` as newtypes for type safety
//! - **Orders**: read-only `Order` snapshots plus the inputs the order
//!   collaborator accepts (`NewOrder`, `OrderPatch`)
//! - **Envelopes**: the `Envelope` tagged union carried over the wire
//! - **Errors**: `OrderError` and `EnvelopeError` via `thiserror`
//! - **Logging**: `tracing` subscriber setup shared by every binary

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod order;

pub use envelope::{Envelope, EventKind};
pub use errors::{EnvelopeError, OrderError};
pub use ids::{OrderId, SessionId};
pub use order::{GuestContact, NewOrder, Order, OrderContext, OrderItem, OrderPatch, OrderStatus};
