//! Order command execution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::OrderId;
use store::{Order, OrderChange, OrderStore, OrderStoreExt, Payment};
use tracing::debug;

use crate::clock::Clock;
use crate::error::DomainError;

/// How many times a decision is re-taken after losing a concurrent commit.
pub const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult {
    /// The order after the command; unchanged if nothing was committed.
    pub order: Order,

    /// Whether a change was committed.
    pub committed: bool,

    /// Commits attempted, including the successful one.
    pub attempts: u32,
}

/// Executes state changes against orders.
///
/// Each attempt:
/// 1. Loads the order and its payments from the store
/// 2. Runs the decision to produce an [`OrderChange`] (or nothing)
/// 3. Commits the change with optimistic concurrency
///
/// When the commit loses to a concurrent writer the decision is re-run on
/// fresh state, up to [`MAX_COMMIT_ATTEMPTS`] times.
#[derive(Clone)]
pub struct CommandHandler {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
}

impl CommandHandler {
    /// Creates a new command handler over the given order store.
    pub fn new(store: Arc<dyn OrderStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns a reference to the underlying order store.
    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    /// Loads an order and its payments, failing if the order does not exist.
    pub async fn load(&self, order_id: OrderId) -> Result<(Order, Vec<Payment>), DomainError> {
        let order = self.store.require(order_id).await?;
        let payments = self.store.payments(order_id).await?;
        Ok((order, payments))
    }

    /// Decides and commits a change.
    ///
    /// The decision receives the current order, its payments and the time and
    /// returns the change to commit, `None` for a no-op, or a rejection.
    /// Rejections are returned as-is and never retried.
    pub async fn execute<F>(
        &self,
        order_id: OrderId,
        mut decide: F,
    ) -> Result<CommandResult, DomainError>
    where
        F: FnMut(&Order, &[Payment], DateTime<Utc>) -> Result<Option<OrderChange>, DomainError>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let (order, payments) = self.load(order_id).await?;

            let Some(change) = decide(&order, &payments, self.clock.now())? else {
                return Ok(CommandResult {
                    order,
                    committed: false,
                    attempts,
                });
            };

            match self.store.commit(change).await {
                Ok(order) => {
                    return Ok(CommandResult {
                        order,
                        committed: true,
                        attempts,
                    });
                }
                Err(e) if e.is_conflict() && attempts < MAX_COMMIT_ATTEMPTS => {
                    metrics::counter!("order_commit_conflicts_total").increment(1);
                    debug!(%order_id, attempts, "Commit conflict, retrying on fresh state");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use common::{Money, OrderId, ProductId};
    use store::{
        Actor, InMemoryOrderStore, NewOrder, OrderItem, OrderQuery, OrderStatus, PaymentStatus,
        StatusEntry, StoreError, Version,
    };

    use super::*;
    use crate::clock::SystemClock;

    fn new_order() -> Order {
        Order::create(NewOrder {
            id: OrderId::new(),
            order_number: format!("ORD-20260101-{}", &OrderId::new().to_string()[..12]),
            user_id: None,
            currency: "INR".to_string(),
            shipping_method: "standard".to_string(),
            shipping_address: Default::default(),
            billing_address: Default::default(),
            notes: None,
            items: vec![
                OrderItem::new(ProductId::new("P"), None, "S", "N", 1, Money::from_minor(100))
                    .unwrap(),
            ],
            tax: Money::zero(),
            shipping: Money::zero(),
            discount: Money::zero(),
            created_at: Utc::now(),
        })
        .unwrap()
    }

    async fn handler_with_order(store: Arc<dyn OrderStore>) -> (CommandHandler, Order) {
        let order = new_order();
        store
            .insert(&order, StatusEntry::created(&order, Actor::Customer))
            .await
            .unwrap();
        (CommandHandler::new(store, Arc::new(SystemClock)), order)
    }

    fn cancel(order: &Order, now: DateTime<Utc>) -> OrderChange {
        OrderChange::for_order(order, now)
            .status(OrderStatus::Cancelled)
            .record(StatusEntry::new(
                order.id(),
                OrderStatus::Cancelled,
                PaymentStatus::Pending,
                "Order cancelled",
                Actor::Customer,
                now,
            ))
    }

    #[tokio::test]
    async fn test_execute_commits_change() {
        let (handler, order) = handler_with_order(Arc::new(InMemoryOrderStore::new())).await;

        let result = handler
            .execute(order.id(), |order, _, now| Ok(Some(cancel(order, now))))
            .await
            .unwrap();

        assert!(result.committed);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.order.status(), OrderStatus::Cancelled);
        assert_eq!(result.order.version(), Version::new(2));
    }

    #[tokio::test]
    async fn test_execute_without_change_does_not_commit() {
        let store = InMemoryOrderStore::new();
        let (handler, order) = handler_with_order(Arc::new(store.clone())).await;

        let result = handler.execute(order.id(), |_, _, _| Ok(None)).await.unwrap();

        assert!(!result.committed);
        assert_eq!(result.order.version(), Version::first());
        assert_eq!(store.history(order.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_returns_rejection_without_retry() {
        let (handler, order) = handler_with_order(Arc::new(InMemoryOrderStore::new())).await;
        let calls = AtomicU32::new(0);

        let result = handler
            .execute(order.id(), |_, _, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DomainError::EmptyCart)
            })
            .await;

        assert!(matches!(result, Err(DomainError::EmptyCart)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_order() {
        let handler = CommandHandler::new(Arc::new(InMemoryOrderStore::new()), Arc::new(SystemClock));
        let result = handler.execute(OrderId::new(), |_, _, _| Ok(None)).await;
        assert!(matches!(result, Err(DomainError::OrderNotFound(_))));
    }

    /// Store that reports a conflict on the first `conflicts` commits.
    struct Contended {
        inner: InMemoryOrderStore,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl OrderStore for Contended {
        async fn insert(&self, order: &Order, entry: StatusEntry) -> store::Result<()> {
            self.inner.insert(order, entry).await
        }
        async fn get(&self, id: OrderId) -> store::Result<Option<Order>> {
            self.inner.get(id).await
        }
        async fn get_by_number(&self, number: &str) -> store::Result<Option<Order>> {
            self.inner.get_by_number(number).await
        }
        async fn query(&self, query: OrderQuery) -> store::Result<Vec<Order>> {
            self.inner.query(query).await
        }
        async fn payments(&self, order_id: OrderId) -> store::Result<Vec<Payment>> {
            self.inner.payments(order_id).await
        }
        async fn payment_by_gateway_order_id(&self, id: &str) -> store::Result<Option<Payment>> {
            self.inner.payment_by_gateway_order_id(id).await
        }
        async fn payment_by_gateway_payment_id(&self, id: &str) -> store::Result<Option<Payment>> {
            self.inner.payment_by_gateway_payment_id(id).await
        }
        async fn history(&self, order_id: OrderId) -> store::Result<Vec<StatusEntry>> {
            self.inner.history(order_id).await
        }
        async fn commit(&self, change: OrderChange) -> store::Result<Order> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::ConcurrencyConflict {
                    order_id: change.order_id,
                    expected: change.expected_version,
                    actual: change.expected_version.next(),
                });
            }
            self.inner.commit(change).await
        }
    }

    #[tokio::test]
    async fn test_execute_retries_conflicts() {
        let store = Arc::new(Contended {
            inner: InMemoryOrderStore::new(),
            conflicts: AtomicU32::new(2),
        });
        let (handler, order) = handler_with_order(store).await;

        let result = handler
            .execute(order.id(), |order, _, now| Ok(Some(cancel(order, now))))
            .await
            .unwrap();

        assert!(result.committed);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_execute_gives_up_after_max_attempts() {
        let store = Arc::new(Contended {
            inner: InMemoryOrderStore::new(),
            conflicts: AtomicU32::new(MAX_COMMIT_ATTEMPTS),
        });
        let (handler, order) = handler_with_order(store).await;

        let result = handler
            .execute(order.id(), |order, _, now| Ok(Some(cancel(order, now))))
            .await;

        assert!(result.unwrap_err().is_conflict());
    }
}
