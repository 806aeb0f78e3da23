//! Post-commit notifications for order mutations.
//!
//! [`NotifyingOrders`] wraps any [`OrderService`]. The wrapped call runs
//! first; observers hear about the result only when it succeeded and
//! produced an order. Callers see the wrapped service's results unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use roomservice_core::{Envelope, NewOrder, Order, OrderError, OrderId, OrderPatch};
use tracing::{debug, info};

use super::OrderService;
use crate::metrics::{ORDERS_CREATED_TOTAL, ORDERS_UPDATED_TOTAL};
use crate::websocket::registry::SessionRegistry;

/// Receives committed order changes.
#[async_trait]
pub trait OrderObserver: Send + Sync {
    /// A new order was stored.
    async fn order_created(&self, order: &Order);
    /// An existing order changed.
    async fn order_updated(&self, order: &Order);
}

#[async_trait]
impl OrderObserver for SessionRegistry {
    async fn order_created(&self, order: &Order) {
        let report = self.broadcast(&Envelope::new_order(order.clone())).await;
        info!(order_id = %order.id, recipients = report.recipients, "new order broadcast");
    }

    async fn order_updated(&self, order: &Order) {
        let report = self
            .broadcast(&Envelope::order_status_update(order.clone()))
            .await;
        info!(
            order_id = %order.id,
            status = %order.status,
            recipients = report.recipients,
            "order status broadcast"
        );
    }
}

/// [`OrderService`] decorator that notifies observers after each commit.
pub struct NotifyingOrders {
    inner: Arc<dyn OrderService>,
    observers: Vec<Arc<dyn OrderObserver>>,
}

impl NotifyingOrders {
    /// Wrap `inner`; `observers` are fixed for the decorator's lifetime.
    pub fn new(inner: Arc<dyn OrderService>, observers: Vec<Arc<dyn OrderObserver>>) -> Self {
        Self { inner, observers }
    }

    /// Number of attached observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

#[async_trait]
impl OrderService for NotifyingOrders {
    async fn create_order(&self, new: NewOrder) -> Result<Order, OrderError> {
        let order = self.inner.create_order(new).await?;
        counter!(ORDERS_CREATED_TOTAL).increment(1);
        for observer in &self.observers {
            observer.order_created(&order).await;
        }
        Ok(order)
    }

    async fn update_order_status(
        &self,
        id: &OrderId,
        patch: OrderPatch,
    ) -> Result<Option<Order>, OrderError> {
        let Some(order) = self.inner.update_order_status(id, patch).await? else {
            debug!(order_id = %id, "update matched no order, nothing to notify");
            return Ok(None);
        };
        counter!(ORDERS_UPDATED_TOTAL).increment(1);
        for observer in &self.observers {
            observer.order_updated(&order).await;
        }
        Ok(Some(order))
    }

    async fn get_order(&self, id: &OrderId) -> Option<Order> {
        self.inner.get_order(id).await
    }
}
