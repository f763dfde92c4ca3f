//! Domain error types.

use thiserror::Error;

/// Errors raised while validating order input or decoding stored values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// SKU was empty or whitespace.
    #[error("SKU must not be empty")]
    EmptySku,

    /// Quantity was zero or negative.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: i64 },

    /// An update request that changes nothing.
    #[error("Update must change at least one field")]
    EmptyUpdate,

    /// A status string that is not part of the lifecycle.
    #[error("Unknown order status: {0}")]
    UnknownOrderStatus(String),

    /// A status string that is not a known outbox status.
    #[error("Unknown outbox status: {0}")]
    UnknownOutboxStatus(String),
}
