//! Domain layer for the order service.
//!
//! This crate provides the types every other layer agrees on:
//! - `Order` and its `OrderStatus` lifecycle
//! - Validated value objects (`Sku`, `Quantity`) and commands
//! - Integration event payloads exchanged with the inventory service
//! - `OutboxMessage`, the durable fallback for events that failed to publish

pub mod error;
pub mod order;
pub mod outbox;

pub use common::{MessageId, OrderId};
pub use error::DomainError;
pub use order::{
    AvailabilityReply, AvailabilityRequest, CreateOrder, IntegrationEvent, Order, OrderCancelled,
    OrderChanges, OrderCreated, OrderStatus, Quantity, ReservationCancelled, ReservationConfirmed,
    ReservationFailed, Sku, UpdateOrder,
};
pub use outbox::{OutboxMessage, OutboxStatus};
