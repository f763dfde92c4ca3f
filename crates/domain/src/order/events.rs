//! Messages exchanged with the inventory service over the broker.
//!
//! Outbound events are fire-and-forget; inbound reservation events arrive
//! asynchronously and may be redelivered, so their handlers are idempotent.

use common::OrderId;
use serde::{Deserialize, Serialize};

use super::{Order, Quantity, Sku};

/// A message with a fixed routing pattern on the broker.
pub trait IntegrationEvent: Serialize {
    /// Broker pattern the message is published or consumed under.
    const NAME: &'static str;
}

/// Emitted after an order is accepted and persisted as PENDING.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: Quantity,
}

impl IntegrationEvent for OrderCreated {
    const NAME: &'static str = "order.created";
}

impl From<&Order> for OrderCreated {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            sku: order.sku.clone(),
            quantity: order.quantity,
        }
    }
}

/// Emitted when a cancellation is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    pub order_id: OrderId,
}

impl IntegrationEvent for OrderCancelled {
    const NAME: &'static str = "order.cancelled";
}

/// Inventory reserved stock for the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationConfirmed {
    pub order_id: OrderId,
}

impl IntegrationEvent for ReservationConfirmed {
    const NAME: &'static str = "inventory.reservation_confirmed";
}

/// Inventory could not reserve stock for the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationFailed {
    pub order_id: OrderId,
}

impl IntegrationEvent for ReservationFailed {
    const NAME: &'static str = "inventory.reservation_failed";
}

/// Inventory released the reservation after a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCancelled {
    pub order_id: OrderId,
}

impl IntegrationEvent for ReservationCancelled {
    const NAME: &'static str = "inventory.reservation_cancelled";
}

/// Request half of the `check_availability` request/reply exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub sku: Sku,
    pub quantity: Quantity,
}

impl IntegrationEvent for AvailabilityRequest {
    const NAME: &'static str = "check_availability";
}

/// Reply half of the `check_availability` exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReply {
    pub sku_exists: bool,
    pub has_available_stock: bool,
    pub available_quantity: u64,
}
