use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, OrderId};
use domain::{Order, OrderChanges, OrderStatus, OutboxMessage};
use futures_util::future::BoxFuture;

use crate::Result;

/// Work run inside the order-creation transaction, after the order row is
/// written and before it commits.
///
/// Resolves to the outbox row to store alongside the order, if any. It is
/// never polled when the order insert fails.
pub type AfterInsert<'a> = BoxFuture<'a, Option<OutboxMessage>>;

/// Core trait for order persistence.
///
/// Every status change goes through a compare-and-set guard (`from`), so the
/// timeout sweep, reservation handlers, and user requests racing on the same
/// row can never overwrite each other's transitions.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order and, optionally, an outbox row for it.
    ///
    /// Both rows are written atomically - either both are stored or neither is.
    async fn create_order(&self, order: &Order, outbox: Option<&OutboxMessage>) -> Result<()>;

    /// Inserts a new order, then runs `after_insert` before committing.
    ///
    /// The outbox row `after_insert` resolves to (if any) is written in the
    /// same transaction and returned. If the order insert fails, `after_insert`
    /// is dropped without running.
    async fn create_order_with<'a>(
        &'a self,
        order: &'a Order,
        after_insert: AfterInsert<'a>,
    ) -> Result<Option<OutboxMessage>>;

    /// Retrieves an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists orders, oldest first, optionally filtered by status.
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>>;

    /// Moves an order to `to` if its current status is one of `from`.
    ///
    /// The expiry is cleared for every target other than PENDING. Returns the
    /// updated order, or None if the order is missing or the guard failed.
    async fn transition(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>>;

    /// Applies field changes if the order's status is one of `from`.
    ///
    /// Never touches status or expiry. Returns None if the guard failed.
    async fn update_order(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        changes: &OrderChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>>;

    /// Deletes an order (and its outbox rows) if its status is one of `from`.
    ///
    /// Returns true if a row was deleted.
    async fn delete_order(&self, id: OrderId, from: &[OrderStatus]) -> Result<bool>;

    /// Retrieves PENDING orders whose expiry is strictly before `now`.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Order>>;

    /// Retrieves up to `limit` pending outbox rows with fewer than
    /// `max_attempts` attempts, in insertion order.
    async fn pending_outbox(&self, limit: usize, max_attempts: u32) -> Result<Vec<OutboxMessage>>;

    /// Marks a pending outbox row as delivered.
    async fn mark_outbox_processed(&self, id: MessageId) -> Result<()>;

    /// Records a failed delivery attempt for a pending outbox row.
    ///
    /// Increments `attempts`, stores the error, and flips the row to failed
    /// once the attempt count reaches `max_attempts`. Returns the updated row,
    /// or None if the row is missing or already final.
    async fn record_outbox_failure(
        &self,
        id: MessageId,
        error: &str,
        max_attempts: u32,
    ) -> Result<Option<OutboxMessage>>;

    /// Lists every outbox row written for an order.
    async fn outbox_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxMessage>>;
}
