//! Order service: checkout, reads and non-payment lifecycle changes.

use std::sync::Arc;

use common::{Money, OrderId, OwnerKey};
use store::{
    Actor, NewOrder, Order, OrderChange, OrderDetails, OrderItem, OrderQuery, OrderStatus,
    OrderStore, OrderStoreExt, Payment, StatusEntry,
};
use tracing::{info, warn};

use crate::cart::CartService;
use crate::catalog::{Catalog, quote_line};
use crate::charges::ChargesPolicy;
use crate::clock::Clock;
use crate::command::CommandHandler;
use crate::deps::Dependencies;
use crate::error::DomainError;
use crate::ledger::Ledger;
use crate::machine;
use crate::notify::{Notification, NotificationQueue};

use super::commands::validate_address;
use super::{AdvanceFulfillment, CancelOrder, CheckoutRequest, OrderUpdate, order_number};

/// Service for managing orders.
///
/// Creates orders from carts and applies every non-payment transition
/// through the command handler.
#[derive(Clone)]
pub struct OrderService {
    handler: CommandHandler,
    ledger: Ledger,
    orders: Arc<dyn OrderStore>,
    carts: CartService,
    catalog: Arc<dyn Catalog>,
    charges: Arc<dyn ChargesPolicy>,
    clock: Arc<dyn Clock>,
    notifications: NotificationQueue,
    currency: String,
}

impl OrderService {
    /// Creates a new order service from the dependency bundle.
    pub fn new(deps: &Dependencies) -> Self {
        Self {
            handler: CommandHandler::new(deps.orders.clone(), deps.clock.clone()),
            ledger: Ledger::new(deps.orders.clone()),
            orders: deps.orders.clone(),
            carts: CartService::new(deps),
            catalog: deps.catalog.clone(),
            charges: deps.charges.clone(),
            clock: deps.clock.clone(),
            notifications: deps.notifications.clone(),
            currency: deps.config.currency.clone(),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler {
        &self.handler
    }

    /// Materializes the owner's cart into a new `pending` order.
    ///
    /// Every line is re-checked against live inventory and snapshotted at
    /// the current catalog price. The cart is cleared once the order exists.
    #[tracing::instrument(skip(self, request), fields(owner = %request.owner))]
    pub async fn create_order(&self, request: CheckoutRequest) -> Result<Order, DomainError> {
        request.validate()?;

        let cart = self.carts.get_cart(&request.owner).await?;
        if cart.is_empty() {
            return Err(DomainError::EmptyCart);
        }

        let mut items = Vec::with_capacity(cart.items.len());
        for line in &cart.items {
            let quote = quote_line(
                self.catalog.as_ref(),
                &line.product_id,
                line.variant_id.as_ref(),
            )
            .await?;
            quote.ensure_available(line.quantity)?;

            let item = OrderItem::new(
                quote.product_id,
                quote.variant_id,
                quote.sku,
                quote.name,
                line.quantity,
                quote.price,
            )
            .ok_or_else(|| {
                DomainError::Validation(format!("invalid line for {}", line.product_id))
            })?;
            items.push(item);
        }

        let subtotal = items
            .iter()
            .try_fold(Money::zero(), |sum, item| sum.checked_add(item.line_total))
            .ok_or_else(|| DomainError::Validation("order subtotal overflows".to_string()))?;
        let charges = self
            .charges
            .quote(subtotal, &request.shipping_method, &request.shipping_address);
        charges.validate(subtotal)?;

        let id = OrderId::new();
        let now = self.clock.now();
        let order = Order::create(NewOrder {
            id,
            order_number: order_number(id, now),
            user_id: request.owner.user_id(),
            currency: self.currency.clone(),
            shipping_method: request.shipping_method,
            billing_address: request
                .billing_address
                .unwrap_or_else(|| request.shipping_address.clone()),
            shipping_address: request.shipping_address,
            notes: request.notes,
            items,
            tax: charges.tax,
            shipping: charges.shipping,
            discount: charges.discount,
            created_at: now,
        })?;

        self.orders
            .insert(&order, StatusEntry::created(&order, Actor::Customer))
            .await?;

        if let Err(e) = self.carts.clear(&request.owner).await {
            warn!(order_id = %order.id(), error = %e, "Failed to clear cart after checkout");
        }

        metrics::counter!("orders_created_total").increment(1);
        self.notify_status(&order);
        info!(
            order_id = %order.id(),
            order_number = order.order_number(),
            total = %order.total(),
            "Order created"
        );
        Ok(order)
    }

    /// Loads an order by id.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, DomainError> {
        Ok(self.orders.require(order_id).await?)
    }

    /// Loads an order by its order number.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_by_number(&self, order_number: &str) -> Result<Order, DomainError> {
        self.orders
            .get_by_number(order_number)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound(order_number.to_string()))
    }

    /// Lists orders matching a query, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, query: OrderQuery) -> Result<Vec<Order>, DomainError> {
        Ok(self.orders.query(query).await?)
    }

    /// Lists the orders of one owner. Guest sessions own no orders.
    pub async fn orders_of(&self, owner: &OwnerKey) -> Result<Vec<Order>, DomainError> {
        match owner.user_id() {
            Some(user_id) => self.list_orders(OrderQuery::for_user(user_id)).await,
            None => Ok(Vec::new()),
        }
    }

    /// Returns the status ledger of an order, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn history(&self, order_id: OrderId) -> Result<Vec<StatusEntry>, DomainError> {
        self.orders.require(order_id).await?;
        self.ledger.history(order_id).await
    }

    /// Returns every payment attempt of an order, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn payments(&self, order_id: OrderId) -> Result<Vec<Payment>, DomainError> {
        self.orders.require(order_id).await?;
        Ok(self.orders.payments(order_id).await?)
    }

    /// Applies a customer edit.
    ///
    /// Addresses may only change while the order is `pending` or
    /// `payment_processing`. An update that changes nothing is a no-op.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_order(
        &self,
        order_id: OrderId,
        update: OrderUpdate,
    ) -> Result<Order, DomainError> {
        if update.is_empty() {
            return Err(DomainError::Validation("update changes nothing".to_string()));
        }
        if let Some(address) = &update.shipping_address {
            validate_address("shipping", address)?;
        }
        if let Some(address) = &update.billing_address {
            validate_address("billing", address)?;
        }

        let result = self
            .handler
            .execute(order_id, |order, _, now| {
                if update.changes_addresses()
                    && !matches!(
                        order.status(),
                        OrderStatus::Pending | OrderStatus::PaymentProcessing
                    )
                {
                    return Err(DomainError::transition(
                        order.status(),
                        order.payment_status(),
                        "change addresses of",
                    ));
                }

                let details = OrderDetails {
                    shipping_address: update
                        .shipping_address
                        .clone()
                        .unwrap_or_else(|| order.shipping_address().clone()),
                    billing_address: update
                        .billing_address
                        .clone()
                        .unwrap_or_else(|| order.billing_address().clone()),
                    notes: match &update.notes {
                        Some(notes) => notes.clone(),
                        None => order.notes().map(str::to_string),
                    },
                };
                let unchanged = &details.shipping_address == order.shipping_address()
                    && &details.billing_address == order.billing_address()
                    && details.notes.as_deref() == order.notes();
                if unchanged {
                    return Ok(None);
                }
                Ok(Some(OrderChange::for_order(order, now).details(details)))
            })
            .await?;

        Ok(result.order)
    }

    /// Cancels an order, failing any payment still open.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn cancel(&self, cmd: CancelOrder) -> Result<Order, DomainError> {
        let result = self
            .handler
            .execute(cmd.order_id, |order, payments, now| {
                machine::cancel(order, payments, cmd.actor.clone(), cmd.reason.as_deref(), now)
                    .map(Some)
            })
            .await?;

        self.notify_status(&result.order);
        info!(actor = %cmd.actor, "Order cancelled");
        Ok(result.order)
    }

    /// Moves a paid order one step along fulfillment.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, target = %cmd.target))]
    pub async fn advance_fulfillment(&self, cmd: AdvanceFulfillment) -> Result<Order, DomainError> {
        let result = self
            .handler
            .execute(cmd.order_id, |order, _, now| {
                machine::advance(
                    order,
                    cmd.target,
                    cmd.actor.clone(),
                    cmd.comment.as_deref(),
                    now,
                )
                .map(Some)
            })
            .await?;

        self.notify_status(&result.order);
        info!(actor = %cmd.actor, "Fulfillment advanced");
        Ok(result.order)
    }

    fn notify_status(&self, order: &Order) {
        self.notifications.enqueue(Notification::OrderStatusChanged {
            order_id: order.id(),
            status: order.status(),
            payment_status: order.payment_status(),
        });
    }
}
