//! Order collaborator and the notifying decorator around it.

pub mod notify;
pub mod store;

pub use notify::{NotifyingOrders, OrderObserver};
pub use store::InMemoryOrders;

use async_trait::async_trait;
use roomservice_core::{NewOrder, Order, OrderError, OrderId, OrderPatch};

/// Order persistence as seen by the notification channel.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Validate and store a new order, returning it with its assigned id.
    async fn create_order(&self, new: NewOrder) -> Result<Order, OrderError>;

    /// Apply `patch` to an existing order.
    ///
    /// `Ok(None)` means no order has that id.
    async fn update_order_status(
        &self,
        id: &OrderId,
        patch: OrderPatch,
    ) -> Result<Option<Order>, OrderError>;

    /// Look up an order.
    async fn get_order(&self, id: &OrderId) -> Option<Order>;
}
