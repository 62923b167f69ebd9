use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, OwnerKey, ProductId, VariantId};
use tokio::sync::RwLock;

use crate::{
    CartItem, Order, OrderChange, OrderQuery, Payment, Result, StatusEntry, StoreError,
    change::merge_payments,
    store::{CartStore, OrderStore},
};

/// In-memory cart store for testing.
///
/// Provides the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    carts: Arc<RwLock<HashMap<OwnerKey, Vec<CartItem>>>>,
}

impl InMemoryCartStore {
    /// Creates a new empty cart store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of owners with at least one line.
    pub async fn cart_count(&self) -> usize {
        self.carts
            .read()
            .await
            .values()
            .filter(|lines| !lines.is_empty())
            .count()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn items(&self, owner: &OwnerKey) -> Result<Vec<CartItem>> {
        Ok(self.carts.read().await.get(owner).cloned().unwrap_or_default())
    }

    async fn find(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<Option<CartItem>> {
        let carts = self.carts.read().await;
        Ok(carts
            .get(owner)
            .and_then(|lines| lines.iter().find(|l| l.is_for(product_id, variant_id)))
            .cloned())
    }

    async fn add_quantity(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Result<CartItem> {
        let mut carts = self.carts.write().await;
        let lines = carts.entry(owner.clone()).or_default();
        Ok(add_to_lines(
            lines, owner, product_id, variant_id, quantity, unit_price, now,
        ))
    }

    async fn set_line(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut carts = self.carts.write().await;
        Ok(carts.get_mut(owner).is_some_and(|lines| {
            set_in_lines(lines, product_id, variant_id, quantity, unit_price, now)
        }))
    }

    async fn remove(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<bool> {
        let mut carts = self.carts.write().await;
        Ok(carts
            .get_mut(owner)
            .is_some_and(|lines| remove_from_lines(lines, product_id, variant_id)))
    }

    async fn clear(&self, owner: &OwnerKey) -> Result<usize> {
        Ok(self
            .carts
            .write()
            .await
            .remove(owner)
            .map(|lines| lines.len())
            .unwrap_or(0))
    }
}

/// Sums `quantity` into the matching line or appends a new one.
pub(crate) fn add_to_lines(
    lines: &mut Vec<CartItem>,
    owner: &OwnerKey,
    product_id: &ProductId,
    variant_id: Option<&VariantId>,
    quantity: u32,
    unit_price: Money,
    now: DateTime<Utc>,
) -> CartItem {
    if let Some(line) = lines.iter_mut().find(|l| l.is_for(product_id, variant_id)) {
        line.quantity = line.quantity.saturating_add(quantity);
        line.unit_price = unit_price;
        line.updated_at = now;
        return line.clone();
    }
    let line = CartItem::new(
        owner.clone(),
        product_id.clone(),
        variant_id.cloned(),
        quantity,
        unit_price,
        now,
    );
    lines.push(line.clone());
    line
}

pub(crate) fn set_in_lines(
    lines: &mut [CartItem],
    product_id: &ProductId,
    variant_id: Option<&VariantId>,
    quantity: u32,
    unit_price: Money,
    now: DateTime<Utc>,
) -> bool {
    match lines.iter_mut().find(|l| l.is_for(product_id, variant_id)) {
        Some(line) => {
            line.quantity = quantity;
            line.unit_price = unit_price;
            line.updated_at = now;
            true
        }
        None => false,
    }
}

pub(crate) fn remove_from_lines(
    lines: &mut Vec<CartItem>,
    product_id: &ProductId,
    variant_id: Option<&VariantId>,
) -> bool {
    let before = lines.len();
    lines.retain(|l| !l.is_for(product_id, variant_id));
    lines.len() != before
}

#[derive(Default)]
struct OrderState {
    orders: HashMap<OrderId, Order>,
    payments: HashMap<OrderId, Vec<Payment>>,
    history: HashMap<OrderId, Vec<StatusEntry>>,
}

impl OrderState {
    /// Mirrors the unique gateway id indexes of the relational schema.
    fn gateway_id_taken(&self, payment: &Payment) -> bool {
        self.payments.values().flatten().any(|other| {
            other.id != payment.id
                && ((payment.gateway_order_id.is_some()
                    && other.gateway_order_id == payment.gateway_order_id)
                    || (payment.gateway_payment_id.is_some()
                        && other.gateway_payment_id == payment.gateway_payment_id))
        })
    }
}

/// In-memory order store for testing.
///
/// Keeps orders, payments and the ledger behind a single lock so that a
/// commit is atomic. Commits can be made to fail on demand.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<OrderState>>,
    fail_commits: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates a new empty order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent commit fail with `Unavailable` until reset.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order, entry: StatusEntry) -> Result<()> {
        if entry.order_id != order.id() {
            return Err(StoreError::InvalidChange(
                "creation entry belongs to another order".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id()) {
            return Err(StoreError::DuplicateOrder(order.id().to_string()));
        }
        if state
            .orders
            .values()
            .any(|o| o.order_number() == order.order_number())
        {
            return Err(StoreError::DuplicateOrder(order.order_number().to_string()));
        }

        state.orders.insert(order.id(), order.clone());
        state.payments.insert(order.id(), Vec::new());
        state.history.insert(order.id(), vec![entry]);
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.order_number() == order_number)
            .cloned())
    }

    async fn query(&self, query: OrderQuery) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| query.matches(o))
            .cloned()
            .collect();

        // Newest first, order number as a stable tiebreak
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.order_number().cmp(a.order_number()))
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(orders.into_iter().skip(offset).take(limit).collect())
    }

    async fn payments(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn payment_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .flatten()
            .find(|p| p.gateway_order_id.as_deref() == Some(gateway_order_id))
            .cloned())
    }

    async fn payment_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .flatten()
            .find(|p| p.gateway_payment_id.as_deref() == Some(gateway_payment_id))
            .cloned())
    }

    async fn history(&self, order_id: OrderId) -> Result<Vec<StatusEntry>> {
        Ok(self
            .state
            .read()
            .await
            .history
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(&self, change: OrderChange) -> Result<Order> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commits disabled".to_string()));
        }

        let mut state = self.state.write().await;
        let current = state
            .orders
            .get(&change.order_id)
            .ok_or(StoreError::OrderNotFound(change.order_id))?;

        if current.version() != change.expected_version {
            return Err(StoreError::ConcurrencyConflict {
                order_id: change.order_id,
                expected: change.expected_version,
                actual: current.version(),
            });
        }

        let existing = state
            .payments
            .get(&change.order_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        change.validate(current, existing)?;
        if let Some(payment) = change.payments.iter().find(|p| state.gateway_id_taken(p)) {
            return Err(StoreError::InvalidChange(format!(
                "gateway reference of payment {} is already recorded",
                payment.id
            )));
        }

        // Validated; apply everything under the same lock
        let merged = merge_payments(existing, &change.payments);
        let mut updated = current.clone();
        updated.apply(&change);

        state.orders.insert(change.order_id, updated.clone());
        state.payments.insert(change.order_id, merged);
        state
            .history
            .entry(change.order_id)
            .or_default()
            .extend(change.entries);

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_order;
    use crate::{Actor, OrderStatus, OrderStoreExt, PaymentStatus, Version};

    fn owner() -> OwnerKey {
        OwnerKey::session("guest-1")
    }

    #[tokio::test]
    async fn add_quantity_sums_existing_line() {
        let store = InMemoryCartStore::new();
        let product = ProductId::new("P-1");
        let now = Utc::now();

        store
            .add_quantity(&owner(), &product, None, 2, Money::from_minor(100), now)
            .await
            .unwrap();
        let line = store
            .add_quantity(&owner(), &product, None, 3, Money::from_minor(120), now)
            .await
            .unwrap();

        assert_eq!(line.quantity, 5);
        assert_eq!(line.unit_price, Money::from_minor(120));
        assert_eq!(store.items(&owner()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn variants_are_separate_lines() {
        let store = InMemoryCartStore::new();
        let product = ProductId::new("P-1");
        let red = VariantId::new("RED");
        let now = Utc::now();

        store
            .add_quantity(&owner(), &product, None, 1, Money::from_minor(100), now)
            .await
            .unwrap();
        store
            .add_quantity(&owner(), &product, Some(&red), 1, Money::from_minor(100), now)
            .await
            .unwrap();

        assert_eq!(store.items(&owner()).await.unwrap().len(), 2);
        assert!(store.remove(&owner(), &product, Some(&red)).await.unwrap());
        assert!(!store.remove(&owner(), &product, Some(&red)).await.unwrap());
    }

    #[tokio::test]
    async fn set_line_requires_existing_line() {
        let store = InMemoryCartStore::new();
        let product = ProductId::new("P-1");
        let now = Utc::now();

        assert!(
            !store
                .set_line(&owner(), &product, None, 4, Money::from_minor(100), now)
                .await
                .unwrap()
        );
        store
            .add_quantity(&owner(), &product, None, 1, Money::from_minor(100), now)
            .await
            .unwrap();
        assert!(
            store
                .set_line(&owner(), &product, None, 4, Money::from_minor(90), now)
                .await
                .unwrap()
        );
        let line = store.find(&owner(), &product, None).await.unwrap().unwrap();
        assert_eq!(line.quantity, 4);
        assert_eq!(line.unit_price, Money::from_minor(90));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let store = InMemoryCartStore::new();
        let now = Utc::now();
        store
            .add_quantity(&owner(), &ProductId::new("P-1"), None, 1, Money::from_minor(1), now)
            .await
            .unwrap();

        assert_eq!(store.clear(&owner()).await.unwrap(), 1);
        assert_eq!(store.clear(&owner()).await.unwrap(), 0);
        assert_eq!(store.cart_count().await, 0);
    }

    async fn inserted() -> (InMemoryOrderStore, Order) {
        let store = InMemoryOrderStore::new();
        let order = sample_order();
        store
            .insert(&order, StatusEntry::created(&order, Actor::Customer))
            .await
            .unwrap();
        (store, order)
    }

    fn cancel(order: &Order) -> OrderChange {
        OrderChange::for_order(order, Utc::now())
            .status(OrderStatus::Cancelled)
            .record(StatusEntry::new(
                order.id(),
                OrderStatus::Cancelled,
                order.payment_status(),
                "Cancelled",
                Actor::Customer,
                Utc::now(),
            ))
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_order_number() {
        let (store, order) = inserted().await;
        let result = store
            .insert(&order, StatusEntry::created(&order, Actor::Customer))
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateOrder(_))));
        assert_eq!(store.history(order.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_bumps_version_and_appends_ledger() {
        let (store, order) = inserted().await;

        let committed = store.commit(cancel(&order)).await.unwrap();

        assert_eq!(committed.status(), OrderStatus::Cancelled);
        assert_eq!(committed.version(), Version::new(2));
        assert_eq!(store.require(order.id()).await.unwrap(), committed);
        let history = store.history(order.id()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn stale_commit_conflicts_and_writes_nothing() {
        let (store, order) = inserted().await;
        store.commit(cancel(&order)).await.unwrap();

        let result = store.commit(cancel(&order)).await;

        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { expected, actual, .. })
                if expected == Version::first() && actual == Version::new(2)
        ));
        assert_eq!(store.history(order.id()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let (store, order) = inserted().await;
        store.set_fail_commits(true);

        assert!(matches!(
            store.commit(cancel(&order)).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(
            store.require(order.id()).await.unwrap().status(),
            OrderStatus::Pending
        );

        store.set_fail_commits(false);
        assert!(store.commit(cancel(&order)).await.is_ok());
    }

    #[tokio::test]
    async fn payments_are_found_by_gateway_ids() {
        let (store, order) = inserted().await;
        let mut payment = Payment::open(order.id(), order.total(), "INR", Utc::now());
        payment.gateway_order_id = Some("order_abc".to_string());

        let change = OrderChange::for_order(&order, Utc::now())
            .status(OrderStatus::PaymentProcessing)
            .payment_status(PaymentStatus::Processing)
            .upsert_payment(payment.clone())
            .record(StatusEntry::new(
                order.id(),
                OrderStatus::PaymentProcessing,
                PaymentStatus::Processing,
                "Payment initiated",
                Actor::Customer,
                Utc::now(),
            ));
        store.commit(change).await.unwrap();

        let found = store
            .payment_by_gateway_order_id("order_abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, payment.id);
        assert_eq!(
            store.open_payment(order.id()).await.unwrap().map(|p| p.id),
            Some(payment.id)
        );
        assert!(
            store
                .payment_by_gateway_payment_id("pay_missing")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn query_filters_and_paginates_newest_first() {
        let store = InMemoryOrderStore::new();
        let mut ids = Vec::new();
        for offset in 0..3 {
            let mut new = crate::fixtures::sample_new_order();
            new.created_at = Utc::now() + chrono::Duration::seconds(offset);
            let order = Order::create(new).unwrap();
            store
                .insert(&order, StatusEntry::created(&order, Actor::Customer))
                .await
                .unwrap();
            ids.push(order.id());
        }

        let all = store.query(OrderQuery::new()).await.unwrap();
        assert_eq!(all.iter().map(Order::id).collect::<Vec<_>>(), {
            let mut newest_first = ids.clone();
            newest_first.reverse();
            newest_first
        });

        let page = store.query(OrderQuery::new().offset(1).limit(1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id(), ids[1]);
    }
}
