use common::OrderId;
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when reading or writing orders and outbox rows.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An order with this ID already exists.
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// An outbox row referenced an order that is not stored.
    #[error("Outbox message references unknown order {0}")]
    OrphanOutboxMessage(OrderId),

    /// A stored value could not be decoded into a domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
