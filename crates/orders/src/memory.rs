use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{Order, OrderId, OrderItem, OrderStatus, OrderStore, OrderStoreError, Result};

#[derive(Debug, Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    items: HashMap<OrderId, Vec<OrderItem>>,
}

/// In-memory order store.
///
/// Fault toggles let tests exercise the saga's failure paths.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
    fail_on_insert: Arc<AtomicBool>,
    fail_on_status_update: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next inserts fail part-way through the items, as if an item row was rejected.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.fail_on_insert.store(fail, Ordering::SeqCst);
    }

    /// Makes status updates fail.
    pub fn set_fail_on_status_update(&self, fail: bool) {
        self.fail_on_status_update.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order_with_items(&self, order: &Order, items: &[OrderItem]) -> Result<()> {
        let mut state = self.state.write().await;

        if state.orders.contains_key(&order.id) {
            return Err(OrderStoreError::AlreadyExists(order.id));
        }

        // Stage every row first so a failure leaves nothing behind.
        let mut staged = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if self.fail_on_insert.load(Ordering::SeqCst) && i + 1 == items.len() {
                return Err(OrderStoreError::Unavailable(format!(
                    "failed to insert item {} of order {}",
                    item.sku, order.id
                )));
            }
            if item.order_id != order.id {
                return Err(OrderStoreError::Corrupt(format!(
                    "item {} belongs to order {}, not {}",
                    item.id, item.order_id, order.id
                )));
            }
            staged.push(item.clone());
        }

        state.orders.insert(order.id, order.clone());
        state.items.insert(order.id, staged);
        Ok(())
    }

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        if self.fail_on_status_update.load(Ordering::SeqCst) {
            return Err(OrderStoreError::Unavailable(format!(
                "failed to update status of order {order_id}"
            )));
        }

        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(OrderStoreError::NotFound(order_id))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        Ok(self
            .state
            .read()
            .await
            .items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }
}
