//! Tax, shipping and discount quoting port.
//!
//! The core never computes these amounts; it only validates what the policy
//! returns.

use common::Money;
use store::Address;

use crate::DomainError;

/// Charges added to an order's subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Charges {
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
}

impl Charges {
    /// Rejects negative components and discounts larger than what they discount.
    pub fn validate(&self, subtotal: Money) -> Result<(), DomainError> {
        if self.tax.is_negative() || self.shipping.is_negative() || self.discount.is_negative() {
            return Err(DomainError::Validation(
                "charges must not be negative".to_string(),
            ));
        }
        let gross = subtotal
            .checked_add(self.tax)
            .and_then(|m| m.checked_add(self.shipping))
            .ok_or_else(|| DomainError::Validation("order total overflows".to_string()))?;
        if self.discount > gross {
            return Err(DomainError::Validation(format!(
                "discount {} exceeds order amount {gross}",
                self.discount
            )));
        }
        Ok(())
    }
}

/// Quotes charges for a checkout.
pub trait ChargesPolicy: Send + Sync {
    fn quote(&self, subtotal: Money, shipping_method: &str, shipping_address: &Address)
    -> Charges;
}

/// Charges nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCharges;

impl ChargesPolicy for NoCharges {
    fn quote(&self, _subtotal: Money, _shipping_method: &str, _address: &Address) -> Charges {
        Charges::default()
    }
}

/// Applies the same charges to every order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCharges(pub Charges);

impl ChargesPolicy for FixedCharges {
    fn quote(&self, _subtotal: Money, _shipping_method: &str, _address: &Address) -> Charges {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_may_not_exceed_gross() {
        let charges = Charges {
            tax: Money::from_minor(10),
            shipping: Money::from_minor(0),
            discount: Money::from_minor(111),
        };
        assert!(charges.validate(Money::from_minor(100)).is_err());
        assert!(charges.validate(Money::from_minor(101)).is_ok());
    }

    #[test]
    fn negative_charges_are_rejected() {
        let charges = Charges {
            tax: Money::from_minor(-1),
            ..Default::default()
        };
        assert!(matches!(
            charges.validate(Money::from_minor(100)),
            Err(DomainError::Validation(_))
        ));
    }
}
