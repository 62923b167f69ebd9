use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, OwnerKey, ProductId, VariantId};

use crate::{CartItem, Order, OrderChange, OrderQuery, Payment, Result, StatusEntry, StoreError};

/// Storage of cart lines keyed by owner.
///
/// All implementations must be thread-safe (Send + Sync). Every method is
/// atomic with respect to concurrent calls for the same owner.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the owner's lines, oldest first. Empty for an unknown owner.
    async fn items(&self, owner: &OwnerKey) -> Result<Vec<CartItem>>;

    /// Returns the line for a product/variant pair, if present.
    async fn find(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<Option<CartItem>>;

    /// Adds `quantity` to the line, creating it if absent.
    ///
    /// The existing quantity and the added quantity are summed in a single
    /// atomic step and the unit price is refreshed. Returns the stored line.
    async fn add_quantity(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Result<CartItem>;

    /// Overwrites the quantity and price of an existing line.
    ///
    /// Returns false if the line does not exist.
    async fn set_line(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Deletes a line. Returns false if it did not exist.
    async fn remove(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<bool>;

    /// Deletes all of the owner's lines, returning how many were removed.
    async fn clear(&self, owner: &OwnerKey) -> Result<usize>;
}

/// Storage of orders, their payments and their status ledger.
///
/// Orders are created by [`insert`](OrderStore::insert) and afterwards only
/// ever changed by [`commit`](OrderStore::commit).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order together with its first ledger entry.
    ///
    /// Fails with `DuplicateOrder` if the id or order number is taken.
    async fn insert(&self, order: &Order, entry: StatusEntry) -> Result<()>;

    /// Retrieves an order by id.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Retrieves an order by its human-readable number.
    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>>;

    /// Lists orders matching a query, newest first.
    async fn query(&self, query: OrderQuery) -> Result<Vec<Order>>;

    /// Returns every payment attempt for an order, oldest first.
    async fn payments(&self, order_id: OrderId) -> Result<Vec<Payment>>;

    /// Finds a payment by the gateway's intent id.
    async fn payment_by_gateway_order_id(&self, gateway_order_id: &str)
    -> Result<Option<Payment>>;

    /// Finds a payment by the gateway's captured payment id.
    async fn payment_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>>;

    /// Returns the status ledger of an order, oldest first.
    async fn history(&self, order_id: OrderId) -> Result<Vec<StatusEntry>>;

    /// Applies a change atomically.
    ///
    /// Fails with `ConcurrencyConflict` if the order is no longer at
    /// `change.expected_version`, and with `InvalidChange` if the change
    /// would break an order invariant. Nothing is written on failure.
    /// Returns the order as committed.
    async fn commit(&self, change: OrderChange) -> Result<Order>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Retrieves an order, failing with `OrderNotFound` if it is absent.
    async fn require(&self, id: OrderId) -> Result<Order> {
        self.get(id).await?.ok_or(StoreError::OrderNotFound(id))
    }

    /// Returns the order's open payment attempt, if any.
    async fn open_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self
            .payments(order_id)
            .await?
            .into_iter()
            .find(Payment::is_open))
    }

    /// Returns the most recent payment attempt, if any.
    async fn latest_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self.payments(order_id).await?.into_iter().last())
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
