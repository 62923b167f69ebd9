//! Order commands.

use common::{OrderId, OwnerKey};
use store::{Actor, Address, OrderStatus};

use crate::error::DomainError;

/// Command to turn a cart into an order.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Whose cart is checked out.
    pub owner: OwnerKey,

    pub shipping_address: Address,

    /// Defaults to the shipping address.
    pub billing_address: Option<Address>,

    pub shipping_method: String,

    pub notes: Option<String>,
}

impl CheckoutRequest {
    /// Creates a new CheckoutRequest command.
    pub fn new(
        owner: OwnerKey,
        shipping_address: Address,
        shipping_method: impl Into<String>,
    ) -> Self {
        Self {
            owner,
            shipping_address,
            billing_address: None,
            shipping_method: shipping_method.into(),
            notes: None,
        }
    }

    pub fn billing_address(mut self, address: Address) -> Self {
        self.billing_address = Some(address);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), DomainError> {
        if self.shipping_method.trim().is_empty() {
            return Err(DomainError::Validation(
                "shipping method is required".to_string(),
            ));
        }
        validate_address("shipping", &self.shipping_address)?;
        if let Some(billing) = &self.billing_address {
            validate_address("billing", billing)?;
        }
        Ok(())
    }
}

/// Rejects addresses missing any of the fields needed to deliver or bill.
pub(crate) fn validate_address(kind: &str, address: &Address) -> Result<(), DomainError> {
    let required = [
        ("name", &address.name),
        ("line1", &address.line1),
        ("city", &address.city),
        ("postal_code", &address.postal_code),
        ("country", &address.country),
    ];
    match required.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((field, _)) => Err(DomainError::Validation(format!(
            "{kind} address {field} is required"
        ))),
        None => Ok(()),
    }
}

/// The customer-editable fields of an order.
///
/// Items, prices and totals are frozen at creation and cannot be expressed
/// here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderUpdate {
    /// Only accepted before payment is confirmed.
    pub shipping_address: Option<Address>,

    /// Only accepted before payment is confirmed.
    pub billing_address: Option<Address>,

    /// `Some(None)` clears the notes.
    pub notes: Option<Option<String>>,
}

impl OrderUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shipping_address(mut self, address: Address) -> Self {
        self.shipping_address = Some(address);
        self
    }

    pub fn billing_address(mut self, address: Address) -> Self {
        self.billing_address = Some(address);
        self
    }

    pub fn notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.shipping_address.is_none() && self.billing_address.is_none() && self.notes.is_none()
    }

    pub fn changes_addresses(&self) -> bool {
        self.shipping_address.is_some() || self.billing_address.is_some()
    }
}

/// Command to cancel an order.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: OrderId,

    pub actor: Actor,

    pub reason: Option<String>,
}

impl CancelOrder {
    /// Creates a new CancelOrder command.
    pub fn new(order_id: OrderId, actor: Actor) -> Self {
        Self {
            order_id,
            actor,
            reason: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Command to move a paid order one step along fulfillment.
#[derive(Debug, Clone)]
pub struct AdvanceFulfillment {
    pub order_id: OrderId,

    /// The next fulfillment status; skipping steps is rejected.
    pub target: OrderStatus,

    pub actor: Actor,

    pub comment: Option<String>,
}

impl AdvanceFulfillment {
    /// Creates a new AdvanceFulfillment command.
    pub fn new(order_id: OrderId, target: OrderStatus, actor: Actor) -> Self {
        Self {
            order_id,
            target,
            actor,
            comment: None,
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}
