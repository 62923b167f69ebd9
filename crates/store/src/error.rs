use common::OrderId;
use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order changed since it was read; the caller must reload and decide again.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// The order was not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An order with this id or order number already exists.
    #[error("Order already exists: {0}")]
    DuplicateOrder(String),

    /// An order record would violate its own invariants.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// A change violated a store-level invariant and was rejected as a whole.
    #[error("Invalid change: {0}")]
    InvalidChange(String),

    /// A persisted value could not be mapped back into a record.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// The backend refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

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

impl StoreError {
    /// Returns true for optimistic concurrency conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
