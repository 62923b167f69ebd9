use chrono::{DateTime, Utc};
use common::{Money, OwnerKey, ProductId, VariantId};
use serde::{Deserialize, Serialize};

/// One line of a cart.
///
/// At most one line exists per `(owner, product_id, variant_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub owner: OwnerKey,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    /// Always greater than zero; a zero quantity removes the line instead.
    pub quantity: u32,
    /// Catalog price captured at the last write to this line.
    pub unit_price: Money,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    /// Creates a new line written at `now`.
    pub fn new(
        owner: OwnerKey,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            owner,
            product_id,
            variant_id,
            quantity,
            unit_price,
            added_at: now,
            updated_at: now,
        }
    }

    /// Returns `quantity * unit_price`.
    pub fn line_total(&self) -> Money {
        self.unit_price.saturating_mul(self.quantity)
    }

    /// Returns true if this line is for the given product/variant pair.
    pub fn is_for(&self, product_id: &ProductId, variant_id: Option<&VariantId>) -> bool {
        &self.product_id == product_id && self.variant_id.as_ref() == variant_id
    }

    /// Returns a copy of this line re-owned by `owner`.
    pub fn with_owner(&self, owner: OwnerKey) -> Self {
        Self {
            owner,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_total_multiplies_quantity_by_price() {
        let item = CartItem::new(
            OwnerKey::session("s-1"),
            ProductId::new("P-1"),
            None,
            3,
            Money::from_minor(1250),
            Utc::now(),
        );
        assert_eq!(item.line_total(), Money::from_minor(3750));
    }

    #[test]
    fn is_for_distinguishes_variants() {
        let item = CartItem::new(
            OwnerKey::session("s-1"),
            ProductId::new("P-1"),
            Some(VariantId::new("V-RED")),
            1,
            Money::from_minor(100),
            Utc::now(),
        );
        assert!(item.is_for(&ProductId::new("P-1"), Some(&VariantId::new("V-RED"))));
        assert!(!item.is_for(&ProductId::new("P-1"), None));
        assert!(!item.is_for(&ProductId::new("P-1"), Some(&VariantId::new("V-BLUE"))));
    }
}
