//! Order lifecycle coordinator.

use std::sync::Arc;

use broker::{ConnectionManager, EventPublisher};
use chrono::Utc;
use common::OrderId;
use domain::{
    CreateOrder, IntegrationEvent, Order, OrderCancelled, OrderCreated, OrderStatus, OutboxMessage,
    ReservationCancelled, ReservationConfirmed, ReservationFailed, UpdateOrder,
};
use order_store::OrderStore;
use tracing::{debug, info, warn};

use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::outbox::OutboxRelay;
use crate::services::InventoryValidator;
use crate::sweeper::TimeoutSweeper;

/// Result of a guarded status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The order moved to the new status.
    Applied(Order),
    /// The order's status did not allow the change; it is returned untouched.
    Ignored(Order),
}

impl TransitionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            TransitionOutcome::Applied(order) | TransitionOutcome::Ignored(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            TransitionOutcome::Applied(order) | TransitionOutcome::Ignored(order) => order,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Drives orders through their lifecycle.
///
/// ```text
/// create ──► PENDING ──┬── reservation confirmed ──► CONFIRMED
///                      ├── reservation failed ─────► FAILED
///                      ├── validity expired ───────► FAILED   (TimeoutSweeper)
///                      └── cancel ──► CANCELLING ──┬── reservation cancelled ──► CANCELLED
///                                                  └── reservation failed ─────► FAILED
/// ```
///
/// Every status change is a compare-and-set against the statuses allowed to
/// make it, so handlers, the sweep, and user requests racing on one order
/// never overwrite each other.
pub struct OrderStateMachine<S>
where
    S: OrderStore,
{
    store: S,
    validator: InventoryValidator,
    publisher: Arc<EventPublisher>,
    config: SagaConfig,
}

impl<S> OrderStateMachine<S>
where
    S: OrderStore + Clone,
{
    /// Creates a new state machine on top of a managed broker connection.
    pub fn new(store: S, connection: ConnectionManager, config: SagaConfig) -> Self {
        let validator = InventoryValidator::new(connection.clone(), config.rpc_timeout);
        let publisher = Arc::new(EventPublisher::new(
            connection,
            config.publisher_config(),
            config.circuit_breaker_config(),
        ));
        Self {
            store,
            validator,
            publisher,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    pub fn connection(&self) -> &ConnectionManager {
        self.publisher.connection()
    }

    /// Builds the relay that retries outbox rows through this machine's publisher.
    pub fn outbox_relay(&self) -> OutboxRelay<S> {
        OutboxRelay::new(
            self.store.clone(),
            Arc::clone(&self.publisher),
            self.config.outbox_batch_size,
            self.config.outbox_max_attempts,
        )
    }

    /// Builds the sweep that fails PENDING orders past their validity window.
    pub fn timeout_sweeper(&self) -> TimeoutSweeper<S> {
        TimeoutSweeper::new(self.store.clone())
    }

    /// Validates stock, persists a PENDING order, and announces it.
    ///
    /// `order.created` is published inside the store's create transaction,
    /// after the order row is written. If the write fails nothing is
    /// published; if the publish fails the event is stored in the outbox in
    /// the same transaction. Nothing is stored when validation fails.
    #[tracing::instrument(
        skip(self, command),
        fields(sku = %command.sku, quantity = command.quantity)
    )]
    pub async fn create(&self, command: CreateOrder) -> Result<Order> {
        let (sku, quantity) = command.validate()?;
        self.validator.validate(&sku, quantity).await?;

        let order = Order::pending(
            sku,
            quantity,
            Utc::now(),
            self.config.order_validity_window(),
        );
        let payload = serde_json::to_value(OrderCreated::from(&order))?;

        let (order_id, created_at) = (order.id, order.created_at);
        let publisher = &self.publisher;
        let announce = Box::pin(async move {
            match publisher.publish(OrderCreated::NAME, &payload).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(
                        order_id = %order_id,
                        error = %e,
                        "Failed to publish event, storing it in the outbox"
                    );
                    metrics::counter!("orders_outbox_fallback_total").increment(1);
                    Some(OutboxMessage::pending(
                        order_id,
                        OrderCreated::NAME,
                        payload,
                        created_at,
                    ))
                }
            }
        });

        let outbox = self.store.create_order_with(&order, announce).await?;

        metrics::counter!("orders_created_total").increment(1);
        info!(order_id = %order.id, outboxed = outbox.is_some(), "Order created");
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        self.store
            .get_order(id)
            .await?
            .ok_or(SagaError::OrderNotFound(id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(status).await?)
    }

    /// Changes the SKU and/or quantity of an order that is still open.
    ///
    /// Status and expiry are left as they are.
    #[tracing::instrument(skip(self, command))]
    pub async fn update(&self, id: OrderId, command: UpdateOrder) -> Result<Order> {
        let changes = command.validate()?;

        match self
            .store
            .update_order(id, &OrderStatus::OPEN, &changes, Utc::now())
            .await?
        {
            Some(order) => {
                info!(order_id = %id, "Order updated");
                Ok(order)
            }
            None => Err(self.rejection(id).await),
        }
    }

    /// Deletes an order that is still open.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, id: OrderId) -> Result<()> {
        if self.store.delete_order(id, &OrderStatus::OPEN).await? {
            info!(order_id = %id, "Order removed");
            Ok(())
        } else {
            Err(self.rejection(id).await)
        }
    }

    /// Requests cancellation and emits `order.cancelled`.
    ///
    /// Cancelling an order that already ended as CANCELLED or FAILED returns
    /// it unchanged. A CONFIRMED order cannot be cancelled. Repeating the
    /// call on a CANCELLING order emits the event again.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, id: OrderId) -> Result<Order> {
        let order = match self
            .apply_transition(id, OrderStatus::Cancelling, OrderStatus::can_request_cancel)
            .await?
        {
            TransitionOutcome::Applied(order) => order,
            TransitionOutcome::Ignored(order) if order.status == OrderStatus::Confirmed => {
                return Err(SagaError::OrderLocked {
                    id,
                    status: order.status,
                });
            }
            TransitionOutcome::Ignored(order) => return Ok(order),
        };

        let payload = serde_json::to_value(OrderCancelled { order_id: id })?;
        self.publisher.publish(OrderCancelled::NAME, &payload).await?;

        Ok(order)
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_reservation_confirmed(
        &self,
        event: ReservationConfirmed,
    ) -> Result<TransitionOutcome> {
        self.apply_transition(event.order_id, OrderStatus::Confirmed, OrderStatus::can_confirm)
            .await
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_reservation_failed(
        &self,
        event: ReservationFailed,
    ) -> Result<TransitionOutcome> {
        self.apply_transition(event.order_id, OrderStatus::Failed, OrderStatus::can_fail)
            .await
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_reservation_cancelled(
        &self,
        event: ReservationCancelled,
    ) -> Result<TransitionOutcome> {
        self.apply_transition(
            event.order_id,
            OrderStatus::Cancelled,
            OrderStatus::can_complete_cancel,
        )
        .await
    }

    /// Moves the order to `to` if `allowed` accepts its status at write time.
    async fn apply_transition(
        &self,
        id: OrderId,
        to: OrderStatus,
        allowed: fn(&OrderStatus) -> bool,
    ) -> Result<TransitionOutcome> {
        let from: Vec<OrderStatus> = OrderStatus::ALL
            .into_iter()
            .filter(|status| allowed(status))
            .collect();

        if let Some(order) = self.store.transition(id, &from, to, Utc::now()).await? {
            metrics::counter!("order_transitions_total", "to" => to.as_str()).increment(1);
            info!(order_id = %id, status = %to, "Order status changed");
            return Ok(TransitionOutcome::Applied(order));
        }

        let current = self.get_order(id).await?;
        debug!(
            order_id = %id,
            status = %current.status,
            target = %to,
            "Transition not allowed from current status, ignoring"
        );
        Ok(TransitionOutcome::Ignored(current))
    }

    /// Explains why a guarded update or delete touched nothing.
    async fn rejection(&self, id: OrderId) -> SagaError {
        match self.store.get_order(id).await {
            Ok(Some(order)) => SagaError::OrderLocked {
                id,
                status: order.status,
            },
            Ok(None) => SagaError::OrderNotFound(id),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use broker::{ConnectionConfig, InMemoryBroker};
    use order_store::InMemoryOrderStore;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::ErrorKind;
    use crate::test_store::FaultyStore;

    struct Harness {
        broker: InMemoryBroker,
        store: InMemoryOrderStore,
        machine: OrderStateMachine<InMemoryOrderStore>,
    }

    async fn connected_inventory() -> (InMemoryBroker, ConnectionManager) {
        let broker = InMemoryBroker::new();
        broker.on_request("check_availability", |request| {
            Ok(json!({
                "skuExists": request["sku"] != "UNKNOWN",
                "hasAvailableStock": request["quantity"].as_u64().unwrap_or(0) <= 10,
                "availableQuantity": 10,
            }))
        });

        let connection = ConnectionManager::new(
            Arc::new(broker.clone()),
            ConnectionConfig::default(),
            CancellationToken::new(),
        );
        connection.ensure_connected().await.unwrap();
        (broker, connection)
    }

    async fn harness() -> Harness {
        let (broker, connection) = connected_inventory().await;
        let store = InMemoryOrderStore::new();
        let machine = OrderStateMachine::new(store.clone(), connection, SagaConfig::default());
        Harness {
            broker,
            store,
            machine,
        }
    }

    async fn pending_order(h: &Harness) -> Order {
        h.machine
            .create(CreateOrder::new("TEST-001", 5))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_publishes_without_outbox() {
        let h = harness().await;

        let order = pending_order(&h).await;

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(
            order.expires_at,
            Some(order.created_at + chrono::Duration::minutes(5))
        );
        assert_eq!(h.broker.emitted_count("order.created"), 1);
        assert_eq!(
            h.broker.emitted()[0].payload,
            json!({"orderId": order.id, "sku": "TEST-001", "quantity": 5})
        );
        assert_eq!(h.store.outbox_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_falls_back_to_outbox() {
        let h = harness().await;
        h.broker.set_fail_on_emit(true);

        let order = pending_order(&h).await;

        let rows = h.store.outbox_for_order(order.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, "order.created");
        assert_eq!(rows[0].attempts, 0);
        assert_eq!(rows[0].payload["orderId"], json!(order.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_never_persists() {
        let h = harness().await;

        let zero = h.machine.create(CreateOrder::new("TEST-001", 0)).await;
        assert_eq!(zero.unwrap_err().kind(), ErrorKind::InvalidParameter);

        let unknown = h.machine.create(CreateOrder::new("UNKNOWN", 1)).await;
        assert_eq!(unknown.unwrap_err().kind(), ErrorKind::InvalidParameter);

        let too_many = h.machine.create(CreateOrder::new("TEST-001", 11)).await;
        assert_eq!(too_many.unwrap_err().kind(), ErrorKind::InvalidParameter);

        assert_eq!(h.store.order_count().await, 0);
        assert_eq!(h.broker.emit_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_insert_publishes_nothing() {
        let (broker, connection) = connected_inventory().await;
        let store = FaultyStore::new(InMemoryOrderStore::new());
        store.fail_inserts();
        let machine = OrderStateMachine::new(store.clone(), connection, SagaConfig::default());

        let err = machine
            .create(CreateOrder::new("TEST-001", 5))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(broker.emitted_count("order.created"), 0);
        assert_eq!(broker.emit_attempts(), 0);
        assert_eq!(store.inner.order_count().await, 0);
        assert_eq!(store.inner.outbox_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_is_idempotent() {
        let h = harness().await;
        let order = pending_order(&h).await;
        let event = ReservationConfirmed { order_id: order.id };

        let first = h
            .machine
            .handle_reservation_confirmed(event.clone())
            .await
            .unwrap();
        assert!(first.is_applied());
        assert_eq!(first.order().status, OrderStatus::Confirmed);
        assert_eq!(first.order().expires_at, None);

        let second = h.machine.handle_reservation_confirmed(event).await.unwrap();
        assert!(!second.is_applied());
        assert_eq!(second.into_order().status, OrderStatus::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_cancel_request() {
        let h = harness().await;
        let order = pending_order(&h).await;
        h.machine.cancel_order(order.id).await.unwrap();

        let outcome = h
            .machine
            .handle_reservation_failed(ReservationFailed { order_id: order.id })
            .await
            .unwrap();

        assert!(outcome.is_applied());
        assert_eq!(outcome.order().status, OrderStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_on_terminal_orders_are_noops() {
        let h = harness().await;
        let order = pending_order(&h).await;
        h.machine
            .handle_reservation_failed(ReservationFailed { order_id: order.id })
            .await
            .unwrap();

        let confirmed = h
            .machine
            .handle_reservation_confirmed(ReservationConfirmed { order_id: order.id })
            .await
            .unwrap();
        let cancelled = h
            .machine
            .handle_reservation_cancelled(ReservationCancelled { order_id: order.id })
            .await
            .unwrap();

        assert_eq!(confirmed.order().status, OrderStatus::Failed);
        assert!(!confirmed.is_applied());
        assert!(!cancelled.is_applied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_for_unknown_order_is_not_found() {
        let h = harness().await;
        let result = h
            .machine
            .handle_reservation_confirmed(ReservationConfirmed {
                order_id: OrderId::new(),
            })
            .await;
        assert!(matches!(result, Err(SagaError::OrderNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_emits_event_and_completes() {
        let h = harness().await;
        let order = pending_order(&h).await;

        let cancelling = h.machine.cancel_order(order.id).await.unwrap();
        assert_eq!(cancelling.status, OrderStatus::Cancelling);
        assert_eq!(cancelling.expires_at, None);
        assert_eq!(h.broker.emitted_count("order.cancelled"), 1);

        let done = h
            .machine
            .handle_reservation_cancelled(ReservationCancelled { order_id: order.id })
            .await
            .unwrap();
        assert_eq!(done.order().status, OrderStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_rules_for_final_orders() {
        let h = harness().await;

        let confirmed = pending_order(&h).await;
        h.machine
            .handle_reservation_confirmed(ReservationConfirmed {
                order_id: confirmed.id,
            })
            .await
            .unwrap();
        let err = h.machine.cancel_order(confirmed.id).await.unwrap_err();
        assert!(matches!(err, SagaError::OrderLocked { .. }));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let failed = pending_order(&h).await;
        h.machine
            .handle_reservation_failed(ReservationFailed { order_id: failed.id })
            .await
            .unwrap();
        let unchanged = h.machine.cancel_order(failed.id).await.unwrap();
        assert_eq!(unchanged.status, OrderStatus::Failed);

        assert_eq!(h.broker.emitted_count("order.cancelled"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_order() {
        let h = harness().await;
        let err = h.machine.cancel_order(OrderId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_publish_failure_keeps_cancelling_and_retry_reemits() {
        let h = harness().await;
        let order = pending_order(&h).await;
        h.broker.set_fail_on_emit(true);

        let err = h.machine.cancel_order(order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        let stored = h.machine.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelling);

        h.broker.set_fail_on_emit(false);
        h.machine.cancel_order(order.id).await.unwrap();
        assert_eq!(h.broker.emitted_count("order.cancelled"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_and_remove_guards() {
        let h = harness().await;
        let order = pending_order(&h).await;

        let updated = h
            .machine
            .update(
                order.id,
                UpdateOrder {
                    sku: None,
                    quantity: Some(7),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.quantity.get(), 7);
        assert_eq!(updated.status, OrderStatus::Pending);

        h.machine
            .handle_reservation_confirmed(ReservationConfirmed { order_id: order.id })
            .await
            .unwrap();

        let update_err = h
            .machine
            .update(
                order.id,
                UpdateOrder {
                    sku: Some("TEST-002".into()),
                    quantity: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            update_err,
            SagaError::OrderLocked {
                status: OrderStatus::Confirmed,
                ..
            }
        ));

        let remove_err = h.machine.remove(order.id).await.unwrap_err();
        assert_eq!(remove_err.kind(), ErrorKind::NotFound);
        assert!(h.machine.get_order(order.id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_open_order() {
        let h = harness().await;
        let order = pending_order(&h).await;

        h.machine.remove(order.id).await.unwrap();

        let err = h.machine.get_order(order.id).await.unwrap_err();
        assert!(matches!(err, SagaError::OrderNotFound(_)));
        assert!(matches!(
            h.machine.remove(order.id).await,
            Err(SagaError::OrderNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_update_is_invalid() {
        let h = harness().await;
        let order = pending_order(&h).await;

        let err = h
            .machine
            .update(order.id, UpdateOrder::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_orders_by_status() {
        let h = harness().await;
        let first = pending_order(&h).await;
        tokio::time::advance(Duration::from_millis(5)).await;
        let second = pending_order(&h).await;
        h.machine
            .handle_reservation_confirmed(ReservationConfirmed {
                order_id: second.id,
            })
            .await
            .unwrap();

        let pending = h
            .machine
            .list_orders(Some(OrderStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(h.machine.list_orders(None).await.unwrap().len(), 2);
    }
}
