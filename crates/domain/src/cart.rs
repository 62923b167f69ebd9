//! Cart service.
//!
//! Signed-in users keep durable carts; guest sessions keep expiring carts.
//! Every mutation re-checks the live catalog, so an add that would exceed
//! tracked stock is rejected even if the earlier lines were fine.

use std::sync::Arc;

use common::{Money, OwnerKey, ProductId, SessionId, UserId, VariantId};
use serde::Serialize;
use store::{CartItem, CartStore};
use tracing::{info, warn};

use crate::catalog::{Catalog, quote_line};
use crate::clock::Clock;
use crate::deps::Dependencies;
use crate::error::DomainError;

/// A cart as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartSnapshot {
    pub owner: OwnerKey,
    pub items: Vec<CartItem>,
    /// Sum of line quantities.
    pub total_quantity: u32,
    /// Sum of `quantity * unit_price` over the lines.
    pub subtotal: Money,
}

impl CartSnapshot {
    fn new(owner: OwnerKey, items: Vec<CartItem>) -> Self {
        let total_quantity = items
            .iter()
            .fold(0u32, |sum, item| sum.saturating_add(item.quantity));
        let subtotal = items.iter().map(CartItem::line_total).sum();
        Self {
            owner,
            items,
            total_quantity,
            subtotal,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the quantity held for a product/variant pair.
    pub fn quantity_of(&self, product_id: &ProductId, variant_id: Option<&VariantId>) -> u32 {
        self.items
            .iter()
            .find(|item| item.is_for(product_id, variant_id))
            .map_or(0, |item| item.quantity)
    }
}

/// What a guest-to-user merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Lines folded into the user's cart.
    pub merged: usize,
    /// Lines that could not be written and were dropped.
    pub dropped: usize,
}

/// Cart operations keyed by owner.
#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartStore>,
    session_carts: Arc<dyn CartStore>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    max_line_quantity: u32,
}

impl CartService {
    pub fn new(deps: &Dependencies) -> Self {
        Self {
            carts: deps.carts.clone(),
            session_carts: deps.session_carts.clone(),
            catalog: deps.catalog.clone(),
            clock: deps.clock.clone(),
            max_line_quantity: deps.config.max_line_quantity,
        }
    }

    fn store_for(&self, owner: &OwnerKey) -> &dyn CartStore {
        match owner {
            OwnerKey::User(_) => self.carts.as_ref(),
            OwnerKey::Session(_) => self.session_carts.as_ref(),
        }
    }

    fn check_quantity(&self, quantity: u32) -> Result<(), DomainError> {
        if quantity == 0 || quantity > self.max_line_quantity {
            return Err(DomainError::Validation(format!(
                "quantity must be between 1 and {}",
                self.max_line_quantity
            )));
        }
        Ok(())
    }

    /// Returns the owner's cart. An absent cart is an empty cart.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn get_cart(&self, owner: &OwnerKey) -> Result<CartSnapshot, DomainError> {
        let items = self.store_for(owner).items(owner).await?;
        Ok(CartSnapshot::new(owner.clone(), items))
    }

    /// Adds `quantity` of a product (or variant) to the cart.
    ///
    /// An existing line is incremented and its price refreshed to the live
    /// catalog price.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn add_item(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
    ) -> Result<CartItem, DomainError> {
        self.check_quantity(quantity)?;
        let quote = quote_line(self.catalog.as_ref(), product_id, variant_id).await?;

        let store = self.store_for(owner);
        let existing = store
            .find(owner, product_id, variant_id)
            .await?
            .map_or(0, |line| line.quantity);
        let requested = existing.saturating_add(quantity);
        if requested > self.max_line_quantity {
            return Err(DomainError::Validation(format!(
                "line quantity {requested} exceeds {}",
                self.max_line_quantity
            )));
        }
        quote.ensure_available(requested)?;

        let line = store
            .add_quantity(
                owner,
                product_id,
                variant_id,
                quantity,
                quote.price,
                self.clock.now(),
            )
            .await?;

        metrics::counter!("cart_mutations_total", "op" => "add").increment(1);
        info!(%product_id, quantity = line.quantity, "Cart item added");
        Ok(line)
    }

    /// Replaces the quantity of an existing line. Zero removes it.
    ///
    /// Returns the updated line, or `None` when the line was removed.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn set_item_quantity(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
    ) -> Result<Option<CartItem>, DomainError> {
        let store = self.store_for(owner);
        if quantity == 0 {
            store.remove(owner, product_id, variant_id).await?;
            metrics::counter!("cart_mutations_total", "op" => "remove").increment(1);
            return Ok(None);
        }
        self.check_quantity(quantity)?;

        if store.find(owner, product_id, variant_id).await?.is_none() {
            return Err(DomainError::ItemNotFound(product_id.clone()));
        }
        let quote = quote_line(self.catalog.as_ref(), product_id, variant_id).await?;
        quote.ensure_available(quantity)?;

        let now = self.clock.now();
        if !store
            .set_line(owner, product_id, variant_id, quantity, quote.price, now)
            .await?
        {
            // Removed concurrently
            return Err(DomainError::ItemNotFound(product_id.clone()));
        }

        metrics::counter!("cart_mutations_total", "op" => "set").increment(1);
        Ok(store.find(owner, product_id, variant_id).await?)
    }

    /// Removes a line, failing with `ItemNotFound` if it is absent.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn remove_item(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<(), DomainError> {
        if !self
            .store_for(owner)
            .remove(owner, product_id, variant_id)
            .await?
        {
            return Err(DomainError::ItemNotFound(product_id.clone()));
        }
        metrics::counter!("cart_mutations_total", "op" => "remove").increment(1);
        Ok(())
    }

    /// Removes every line of the cart.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn clear(&self, owner: &OwnerKey) -> Result<usize, DomainError> {
        let removed = self.store_for(owner).clear(owner).await?;
        metrics::counter!("cart_mutations_total", "op" => "clear").increment(1);
        Ok(removed)
    }

    /// Folds a guest cart into a user's durable cart.
    ///
    /// Quantities of matching lines are summed without an inventory check;
    /// stock is re-checked on the next mutation and at checkout. The guest
    /// cart is cleared afterwards even if some lines could not be written.
    #[tracing::instrument(skip(self), fields(session = %session_id, user = %user_id))]
    pub async fn merge_guest_into_user(
        &self,
        session_id: &SessionId,
        user_id: UserId,
    ) -> Result<MergeOutcome, DomainError> {
        let guest = OwnerKey::session(session_id.clone());
        let user = OwnerKey::user(user_id);
        let lines = self.session_carts.items(&guest).await?;

        let mut outcome = MergeOutcome::default();
        for line in &lines {
            let written = self
                .carts
                .add_quantity(
                    &user,
                    &line.product_id,
                    line.variant_id.as_ref(),
                    line.quantity,
                    line.unit_price,
                    self.clock.now(),
                )
                .await;
            match written {
                Ok(_) => outcome.merged += 1,
                Err(e) => {
                    outcome.dropped += 1;
                    warn!(product_id = %line.product_id, error = %e, "Dropped guest cart line during merge");
                }
            }
        }

        if let Err(e) = self.session_carts.clear(&guest).await {
            warn!(error = %e, "Failed to clear guest cart after merge");
        }

        metrics::counter!("cart_merges_total").increment(1);
        info!(
            merged = outcome.merged,
            dropped = outcome.dropped,
            "Guest cart merged"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::InMemoryDependencies;

    fn setup() -> (CartService, InMemoryDependencies) {
        let mem = InMemoryDependencies::default();
        (CartService::new(&mem.deps), mem)
    }

    #[tokio::test]
    async fn absent_cart_is_empty() {
        let (carts, _mem) = setup();
        let cart = carts.get_cart(&OwnerKey::user(UserId::new())).await.unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.subtotal, Money::zero());
    }

    #[tokio::test]
    async fn add_checks_existing_plus_new_against_stock() {
        let (carts, mem) = setup();
        let owner = OwnerKey::user(UserId::new());
        let product = mem.catalog.add_product("A", Money::from_minor(100), 5);

        carts.add_item(&owner, &product, None, 3).await.unwrap();
        let err = carts.add_item(&owner, &product, None, 3).await.unwrap_err();

        assert!(matches!(
            err,
            DomainError::InsufficientInventory {
                requested: 6,
                available: 5,
                ..
            }
        ));
        assert_eq!(carts.get_cart(&owner).await.unwrap().quantity_of(&product, None), 3);
    }

    #[tokio::test]
    async fn add_refreshes_price() {
        let (carts, mem) = setup();
        let owner = OwnerKey::session("s-1");
        let product = mem.catalog.add_product("A", Money::from_minor(100), 10);

        carts.add_item(&owner, &product, None, 1).await.unwrap();
        mem.catalog.set_price(&product, Money::from_minor(120));
        let line = carts.add_item(&owner, &product, None, 1).await.unwrap();

        assert_eq!(line.quantity, 2);
        assert_eq!(line.unit_price, Money::from_minor(120));
        let cart = carts.get_cart(&owner).await.unwrap();
        assert_eq!(cart.subtotal, Money::from_minor(240));
        assert_eq!(cart.total_quantity, 2);
    }

    #[tokio::test]
    async fn rejects_zero_and_oversized_quantities() {
        let (carts, mem) = setup();
        let owner = OwnerKey::user(UserId::new());
        let product = mem.catalog.add_product("A", Money::from_minor(100), 10_000);

        assert!(matches!(
            carts.add_item(&owner, &product, None, 0).await,
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            carts.add_item(&owner, &product, None, 1000).await,
            Err(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn inactive_product_is_unavailable() {
        let (carts, mem) = setup();
        let product = mem.catalog.add_product("A", Money::from_minor(100), 10);
        mem.catalog.set_active(&product, false);

        let result = carts
            .add_item(&OwnerKey::user(UserId::new()), &product, None, 1)
            .await;
        assert!(matches!(result, Err(DomainError::ProductUnavailable(_))));
    }

    #[tokio::test]
    async fn set_quantity_zero_removes_and_missing_line_fails() {
        let (carts, mem) = setup();
        let owner = OwnerKey::user(UserId::new());
        let product = mem.catalog.add_product("A", Money::from_minor(100), 10);

        assert!(matches!(
            carts.set_item_quantity(&owner, &product, None, 2).await,
            Err(DomainError::ItemNotFound(_))
        ));

        carts.add_item(&owner, &product, None, 1).await.unwrap();
        let line = carts
            .set_item_quantity(&owner, &product, None, 4)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.quantity, 4);

        assert!(carts
            .set_item_quantity(&owner, &product, None, 0)
            .await
            .unwrap()
            .is_none());
        assert!(carts.get_cart(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_quantity_rechecks_stock() {
        let (carts, mem) = setup();
        let owner = OwnerKey::user(UserId::new());
        let product = mem.catalog.add_product("A", Money::from_minor(100), 10);
        carts.add_item(&owner, &product, None, 2).await.unwrap();
        mem.catalog.set_stock(&product, 3);

        assert!(matches!(
            carts.set_item_quantity(&owner, &product, None, 4).await,
            Err(DomainError::InsufficientInventory { .. })
        ));
    }

    #[tokio::test]
    async fn remove_missing_line_fails() {
        let (carts, _mem) = setup();
        let result = carts
            .remove_item(&OwnerKey::user(UserId::new()), &ProductId::new("X"), None)
            .await;
        assert!(matches!(result, Err(DomainError::ItemNotFound(_))));
    }
}
