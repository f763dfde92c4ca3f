use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, OrderId};
use domain::{Order, OrderChanges, OrderStatus, OutboxMessage, OutboxStatus};
use tokio::sync::RwLock;

use crate::{AfterInsert, OrderStore, Result, StoreError};

#[derive(Default)]
struct Tables {
    orders: Vec<Order>,
    outbox: Vec<OutboxMessage>,
}

impl Tables {
    fn order_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.id == id)
    }

    fn outbox_mut(&mut self, id: MessageId) -> Option<&mut OutboxMessage> {
        self.outbox.iter_mut().find(|m| m.id == id)
    }
}

/// In-memory order store for testing and local runs.
///
/// Every operation takes a single lock over both tables, which gives the same
/// atomicity and compare-and-set behavior as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Returns the total number of outbox rows stored.
    pub async fn outbox_count(&self) -> usize {
        self.tables.read().await.outbox.len()
    }

    /// Inserts or replaces an order as-is, bypassing the lifecycle guards.
    ///
    /// Lets tests seed orders with arbitrary expiry timestamps.
    pub async fn put_order(&self, order: Order) {
        let mut tables = self.tables.write().await;
        match tables.order_mut(order.id) {
            Some(existing) => *existing = order,
            None => tables.orders.push(order),
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: &Order, outbox: Option<&OutboxMessage>) -> Result<()> {
        let mut tables = self.tables.write().await;

        if tables.orders.iter().any(|o| o.id == order.id) {
            return Err(StoreError::DuplicateOrder(order.id));
        }
        if let Some(message) = outbox.filter(|m| m.order_id != order.id) {
            return Err(StoreError::OrphanOutboxMessage(message.order_id));
        }

        tables.orders.push(order.clone());
        if let Some(message) = outbox {
            tables.outbox.push(message.clone());
        }
        Ok(())
    }

    async fn create_order_with<'a>(
        &'a self,
        order: &'a Order,
        after_insert: AfterInsert<'a>,
    ) -> Result<Option<OutboxMessage>> {
        // The write lock is held across `after_insert`, so no reader sees the
        // order before the outbox decision is made.
        let mut tables = self.tables.write().await;

        if tables.orders.iter().any(|o| o.id == order.id) {
            return Err(StoreError::DuplicateOrder(order.id));
        }

        let outbox = after_insert.await;
        if let Some(message) = outbox.as_ref().filter(|m| m.order_id != order.id) {
            return Err(StoreError::OrphanOutboxMessage(message.order_id));
        }

        tables.orders.push(order.clone());
        if let Some(message) = &outbox {
            tables.outbox.push(message.clone());
        }
        Ok(outbox)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .iter()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn transition(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut tables = self.tables.write().await;
        let Some(order) = tables.order_mut(id) else {
            return Ok(None);
        };
        if !from.contains(&order.status) {
            return Ok(None);
        }
        order.set_status(to, at);
        Ok(Some(order.clone()))
    }

    async fn update_order(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        changes: &OrderChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut tables = self.tables.write().await;
        let Some(order) = tables.order_mut(id) else {
            return Ok(None);
        };
        if !from.contains(&order.status) {
            return Ok(None);
        }
        if let Some(sku) = &changes.sku {
            order.sku = sku.clone();
        }
        if let Some(quantity) = changes.quantity {
            order.quantity = quantity;
        }
        order.updated_at = at;
        Ok(Some(order.clone()))
    }

    async fn delete_order(&self, id: OrderId, from: &[OrderStatus]) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(index) = tables
            .orders
            .iter()
            .position(|o| o.id == id && from.contains(&o.status))
        else {
            return Ok(false);
        };
        tables.orders.remove(index);
        tables.outbox.retain(|m| m.order_id != id);
        Ok(true)
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .iter()
            .filter(|o| o.is_expired(now))
            .cloned()
            .collect())
    }

    async fn pending_outbox(&self, limit: usize, max_attempts: u32) -> Result<Vec<OutboxMessage>> {
        let tables = self.tables.read().await;
        Ok(tables
            .outbox
            .iter()
            .filter(|m| m.is_retryable(max_attempts))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_outbox_processed(&self, id: MessageId) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(message) = tables.outbox_mut(id) {
            message.mark_processed();
        }
        Ok(())
    }

    async fn record_outbox_failure(
        &self,
        id: MessageId,
        error: &str,
        max_attempts: u32,
    ) -> Result<Option<OutboxMessage>> {
        let mut tables = self.tables.write().await;
        let Some(message) = tables.outbox_mut(id) else {
            return Ok(None);
        };
        if message.status != OutboxStatus::Pending {
            return Ok(None);
        }
        message.record_failure(error, max_attempts);
        Ok(Some(message.clone()))
    }

    async fn outbox_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxMessage>> {
        let tables = self.tables.read().await;
        Ok(tables
            .outbox
            .iter()
            .filter(|m| m.order_id == order_id)
            .cloned()
            .collect())
    }
}
