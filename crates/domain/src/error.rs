//! Domain error types.

use common::{Money, OrderId, ProductId};
use store::{OrderStatus, PaymentStatus, StoreError};
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors returned by the cart, checkout and payment services.
///
/// Everything except [`Gateway`](DomainError::Gateway) and
/// [`Storage`](DomainError::Storage) is a business rejection and must not be
/// retried as-is.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The request was malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Checkout was attempted on an empty cart.
    #[error("Cart is empty")]
    EmptyCart,

    #[error(
        "Insufficient inventory for {product_id}: requested {requested}, available {available}"
    )]
    InsufficientInventory {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The product or variant does not exist or is not active.
    #[error("Product unavailable: {0}")]
    ProductUnavailable(String),

    #[error("Cart item not found: {0}")]
    ItemNotFound(ProductId),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// The action is not legal from the order's current statuses.
    #[error("Cannot {action} order in status {status}/{payment_status}")]
    InvalidStateTransition {
        status: OrderStatus,
        payment_status: PaymentStatus,
        action: &'static str,
    },

    /// An unexpired payment attempt is still open for the order.
    #[error("A payment is already in progress for order {0}")]
    PaymentInProgress(OrderId),

    #[error("Order {0} is already paid")]
    AlreadyPaid(OrderId),

    #[error("Payment signature mismatch")]
    SignatureMismatch,

    /// The gateway reported a different amount than the order's frozen total.
    #[error("Amount mismatch: expected {expected}, gateway reported {actual}")]
    AmountMismatch { expected: Money, actual: Money },

    /// The gateway reported a payment in a different currency than the order's.
    #[error("Currency mismatch: expected {expected}, gateway reported {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl DomainError {
    /// Returns true for infrastructure faults the caller may retry.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, DomainError::Gateway(_) | DomainError::Storage(_))
    }

    /// Returns true for optimistic concurrency conflicts from the store.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Storage(e) if e.is_conflict())
    }

    pub(crate) fn transition(
        status: OrderStatus,
        payment_status: PaymentStatus,
        action: &'static str,
    ) -> Self {
        DomainError::InvalidStateTransition {
            status,
            payment_status,
            action,
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::OrderNotFound(id) => DomainError::OrderNotFound(id.to_string()),
            StoreError::InvalidOrder(reason) => DomainError::Validation(reason),
            other => DomainError::Storage(other),
        }
    }
}
