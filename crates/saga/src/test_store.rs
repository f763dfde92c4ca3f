//! Order store wrapper that injects faults into the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, OrderId};
use domain::{Order, OrderChanges, OrderStatus, OutboxMessage};
use order_store::{AfterInsert, InMemoryOrderStore, OrderStore, Result, StoreError};

#[derive(Clone, Default)]
pub(crate) struct FaultyStore {
    pub(crate) inner: InMemoryOrderStore,
    fail_inserts: Arc<AtomicBool>,
    confirm_after_scan: Arc<AtomicBool>,
}

impl FaultyStore {
    pub(crate) fn new(inner: InMemoryOrderStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Makes every order insert fail as if the database were unreachable.
    pub(crate) fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    /// Confirms every order `find_expired` returns right after the scan, so
    /// callers act on a stale snapshot.
    pub(crate) fn confirm_after_scan(&self) {
        self.confirm_after_scan.store(true, Ordering::SeqCst);
    }

    fn insert_error() -> StoreError {
        StoreError::Database(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl OrderStore for FaultyStore {
    async fn create_order(&self, order: &Order, outbox: Option<&OutboxMessage>) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::insert_error());
        }
        self.inner.create_order(order, outbox).await
    }

    async fn create_order_with<'a>(
        &'a self,
        order: &'a Order,
        after_insert: AfterInsert<'a>,
    ) -> Result<Option<OutboxMessage>> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::insert_error());
        }
        self.inner.create_order_with(order, after_insert).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.inner.get_order(id).await
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        self.inner.list_orders(status).await
    }

    async fn transition(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.inner.transition(id, from, to, at).await
    }

    async fn update_order(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        changes: &OrderChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.inner.update_order(id, from, changes, at).await
    }

    async fn delete_order(&self, id: OrderId, from: &[OrderStatus]) -> Result<bool> {
        self.inner.delete_order(id, from).await
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        let expired = self.inner.find_expired(now).await?;
        if self.confirm_after_scan.load(Ordering::SeqCst) {
            for order in &expired {
                let mut confirmed = order.clone();
                confirmed.set_status(OrderStatus::Confirmed, now);
                self.inner.put_order(confirmed).await;
            }
        }
        Ok(expired)
    }

    async fn pending_outbox(&self, limit: usize, max_attempts: u32) -> Result<Vec<OutboxMessage>> {
        self.inner.pending_outbox(limit, max_attempts).await
    }

    async fn mark_outbox_processed(&self, id: MessageId) -> Result<()> {
        self.inner.mark_outbox_processed(id).await
    }

    async fn record_outbox_failure(
        &self,
        id: MessageId,
        error: &str,
        max_attempts: u32,
    ) -> Result<Option<OutboxMessage>> {
        self.inner
            .record_outbox_failure(id, error, max_attempts)
            .await
    }

    async fn outbox_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxMessage>> {
        self.inner.outbox_for_order(order_id).await
    }
}
