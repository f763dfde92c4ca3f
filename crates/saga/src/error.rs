//! Saga error types.

use broker::PublishError;
use common::OrderId;
use domain::{DomainError, OrderStatus};
use order_store::StoreError;
use thiserror::Error;

/// How an error should be reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller input is wrong; retrying unchanged will fail again.
    InvalidParameter,
    /// The order does not exist or can no longer be changed.
    NotFound,
    /// A dependency is down; safe to retry later.
    ServiceUnavailable,
    /// Anything else. Details are logged, not returned.
    Internal,
}

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Unknown SKU or insufficient stock, as reported by inventory.
    #[error("{0}")]
    InvalidParameter(String),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order reached a final status and cannot be changed.
    #[error("Order {id} is {status} and can no longer be modified")]
    OrderLocked { id: OrderId, status: OrderStatus },

    /// Inventory or the broker could not be reached.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Local input validation failed, or a stored value could not be decoded.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Publishing an event failed.
    #[error("Failed to publish event: {0}")]
    Publish(#[from] PublishError),

    /// Order store error.
    #[error("Order store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            SagaError::OrderNotFound(_) | SagaError::OrderLocked { .. } => ErrorKind::NotFound,
            SagaError::ServiceUnavailable(_) | SagaError::Publish(_) => {
                ErrorKind::ServiceUnavailable
            }
            SagaError::Domain(
                DomainError::EmptySku
                | DomainError::InvalidQuantity { .. }
                | DomainError::EmptyUpdate,
            ) => ErrorKind::InvalidParameter,
            SagaError::Domain(_) | SagaError::Store(_) | SagaError::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let id = OrderId::new();
        assert_eq!(
            SagaError::InvalidParameter("invalid sku".into()).kind(),
            ErrorKind::InvalidParameter
        );
        assert_eq!(
            SagaError::Domain(DomainError::InvalidQuantity { quantity: 0 }).kind(),
            ErrorKind::InvalidParameter
        );
        assert_eq!(SagaError::OrderNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(
            SagaError::OrderLocked {
                id,
                status: OrderStatus::Confirmed
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SagaError::Publish(PublishError::CircuitOpen).kind(),
            ErrorKind::ServiceUnavailable
        );
        assert_eq!(
            SagaError::Domain(DomainError::UnknownOrderStatus("LOST".into())).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            SagaError::Store(StoreError::DuplicateOrder(id)).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_locked_message_names_status() {
        let id = OrderId::new();
        let err = SagaError::OrderLocked {
            id,
            status: OrderStatus::Confirmed,
        };
        assert_eq!(
            err.to_string(),
            format!("Order {id} is CONFIRMED and can no longer be modified")
        );
    }
}
