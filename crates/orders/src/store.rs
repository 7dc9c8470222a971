use std::sync::Arc;

use async_trait::async_trait;

use crate::{Order, OrderId, OrderItem, OrderStatus, OrderWithItems, Result};

/// Core trait for order store implementations.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes an order and all of its items, or nothing.
    async fn insert_order_with_items(&self, order: &Order, items: &[OrderItem]) -> Result<()>;

    /// Sets the status of an order and returns the updated header.
    ///
    /// Does not check the current status; callers own the state machine.
    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Items of an order in insertion order.
    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    /// Loads an order header together with its items.
    async fn get_order_with_items(&self, order_id: OrderId) -> Result<Option<OrderWithItems>> {
        let Some(order) = self.get_order(order_id).await? else {
            return Ok(None);
        };
        let items = self.get_order_items(order_id).await?;
        Ok(Some(OrderWithItems { order, items }))
    }
}

#[async_trait]
impl<S: OrderStore + ?Sized> OrderStore for Arc<S> {
    async fn insert_order_with_items(&self, order: &Order, items: &[OrderItem]) -> Result<()> {
        (**self).insert_order_with_items(order, items).await
    }

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        (**self).update_order_status(order_id, status).await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        (**self).get_order(order_id).await
    }

    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        (**self).get_order_items(order_id).await
    }
}
