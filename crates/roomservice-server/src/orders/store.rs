//! In-memory order store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use roomservice_core::{NewOrder, Order, OrderError, OrderId, OrderPatch, OrderStatus};
use tracing::debug;

use super::OrderService;

/// Reference [`OrderService`] keeping orders in a map.
#[derive(Default)]
pub struct InMemoryOrders {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrders {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    /// Whether the store holds no orders.
    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}

#[async_trait]
impl OrderService for InMemoryOrders {
    async fn create_order(&self, new: NewOrder) -> Result<Order, OrderError> {
        new.validate()?;
        let total = new.total();
        let order = Order {
            id: OrderId::new(),
            created_at: Utc::now(),
            status: OrderStatus::Pending,
            guest: new.guest,
            items: new.items,
            total,
            settled: false,
            paid: false,
        };
        debug!(order_id = %order.id, total, "order stored");
        let _ = self.orders.write().insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn update_order_status(
        &self,
        id: &OrderId,
        patch: OrderPatch,
    ) -> Result<Option<Order>, OrderError> {
        if patch.is_empty() {
            return Err(OrderError::Validation("patch changes nothing".into()));
        }
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(id) else {
            return Ok(None);
        };
        patch.apply(order);
        debug!(order_id = %id, status = %order.status, "order updated");
        Ok(Some(order.clone()))
    }

    async fn get_order(&self, id: &OrderId) -> Option<Order> {
        self.orders.read().get(id).cloned()
    }
}
