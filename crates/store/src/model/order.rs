use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId, VariantId};
use serde::{Deserialize, Serialize};

use crate::{OrderChange, StoreError, Version};

/// Lifecycle status of an order.
///
/// ```text
/// pending ─► payment_processing ─► confirmed ─► processing ─► shipped
///    │               │                 │                         │
///    └───────────────┴─────────────────┴─► cancelled             ▼
///                                                         out_for_delivery
///                                                                │
///                                refunded ◄── delivered ◄────────┘
///                                    ▲            │
///                                    └─ completed ◄┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    PaymentProcessing,
    Confirmed,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Pending,
        OrderStatus::PaymentProcessing,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    /// Returns the status name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PaymentProcessing => "payment_processing",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Payment axis of an order, and status of an individual payment attempt.
///
/// ```text
/// pending ─► processing ─┬─► paid ─► refunded
///                        └─► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    /// Returns the status name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Returns true while the attempt can still settle.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A postal address captured on the order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Frozen monetary totals of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
}

impl Totals {
    /// Computes `total = subtotal + tax + shipping - discount`.
    ///
    /// Returns `None` on overflow or when any component or the total is negative.
    pub fn compute(subtotal: Money, tax: Money, shipping: Money, discount: Money) -> Option<Self> {
        if [subtotal, tax, shipping, discount]
            .iter()
            .any(Money::is_negative)
        {
            return None;
        }
        let total = subtotal
            .checked_add(tax)?
            .checked_add(shipping)?
            .checked_sub(discount)?;
        if total.is_negative() {
            return None;
        }
        Some(Self {
            subtotal,
            tax,
            shipping,
            discount,
            total,
        })
    }

    /// Returns true if the stored total matches its components.
    pub fn is_balanced(&self) -> bool {
        Totals::compute(self.subtotal, self.tax, self.shipping, self.discount)
            .is_some_and(|t| t.total == self.total)
    }
}

/// Price snapshot of one ordered line. Never modified after the order exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl OrderItem {
    /// Creates a line snapshot, computing `line_total = quantity * unit_price`.
    ///
    /// Returns `None` for a zero quantity, a negative price or an overflowing total.
    pub fn new(
        product_id: ProductId,
        variant_id: Option<VariantId>,
        sku: impl Into<String>,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Option<Self> {
        if quantity == 0 || unit_price.is_negative() {
            return None;
        }
        let line_total = unit_price.checked_mul(quantity)?;
        Some(Self {
            product_id,
            variant_id,
            sku: sku.into(),
            name: name.into(),
            quantity,
            unit_price,
            line_total,
        })
    }
}

/// Everything needed to create an order record.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: Option<UserId>,
    pub currency: String,
    pub shipping_method: String,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub created_at: DateTime<Utc>,
}

/// An order record.
///
/// Items and totals are fixed at creation. Status fields change only through
/// [`OrderStore::commit`](crate::OrderStore::commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) order_number: String,
    pub(crate) user_id: Option<UserId>,
    pub(crate) status: OrderStatus,
    pub(crate) payment_status: PaymentStatus,
    pub(crate) currency: String,
    pub(crate) totals: Totals,
    pub(crate) shipping_method: String,
    pub(crate) shipping_address: Address,
    pub(crate) billing_address: Address,
    pub(crate) notes: Option<String>,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) version: Version,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new `pending` order from frozen item snapshots.
    pub fn create(new: NewOrder) -> Result<Self, StoreError> {
        if new.items.is_empty() {
            return Err(StoreError::InvalidOrder("order has no items".to_string()));
        }
        if let Some(item) = new
            .items
            .iter()
            .find(|item| item.unit_price.checked_mul(item.quantity) != Some(item.line_total))
        {
            return Err(StoreError::InvalidOrder(format!(
                "line total of {} does not match quantity * unit price",
                item.product_id
            )));
        }

        let subtotal = new
            .items
            .iter()
            .try_fold(Money::zero(), |acc, item| acc.checked_add(item.line_total))
            .ok_or_else(|| StoreError::InvalidOrder("subtotal overflows".to_string()))?;
        let totals = Totals::compute(subtotal, new.tax, new.shipping, new.discount)
            .ok_or_else(|| StoreError::InvalidOrder("charges produce an invalid total".to_string()))?;

        Ok(Self {
            id: new.id,
            order_number: new.order_number,
            user_id: new.user_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            currency: new.currency,
            totals,
            shipping_method: new.shipping_method,
            shipping_address: new.shipping_address,
            billing_address: new.billing_address,
            notes: new.notes,
            items: new.items,
            version: Version::first(),
            created_at: new.created_at,
            updated_at: new.created_at,
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    /// Returns the owning user; `None` for guest checkout.
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    /// Returns the frozen amount due.
    pub fn total(&self) -> Money {
        self.totals.total
    }

    pub fn shipping_method(&self) -> &str {
        &self.shipping_method
    }

    pub fn shipping_address(&self) -> &Address {
        &self.shipping_address
    }

    pub fn billing_address(&self) -> &Address {
        &self.billing_address
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns the total quantity across all lines.
    pub fn total_quantity(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |sum, item| sum.saturating_add(item.quantity))
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Applies a validated change and bumps the version.
    pub(crate) fn apply(&mut self, change: &OrderChange) {
        if let Some(status) = change.status {
            self.status = status;
        }
        if let Some(payment_status) = change.payment_status {
            self.payment_status = payment_status;
        }
        if let Some(details) = &change.details {
            self.shipping_address = details.shipping_address.clone();
            self.billing_address = details.billing_address.clone();
            self.notes = details.notes.clone();
        }
        self.version = self.version.next();
        self.updated_at = change.at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_new_order;

    #[test]
    fn create_computes_balanced_totals() {
        let order = Order::create(sample_new_order()).unwrap();
        let totals = order.totals();
        assert_eq!(totals.subtotal, Money::from_minor(2500));
        assert_eq!(totals.total, Money::from_minor(2800));
        assert!(totals.is_balanced());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.version(), Version::first());
        assert_eq!(order.total_quantity(), 3);
    }

    #[test]
    fn total_quantity_saturates() {
        let half = u32::MAX / 2 + 1;
        let mut new = sample_new_order();
        new.items = vec![
            OrderItem::new(ProductId::new("P-1"), None, "SKU-1", "Bolt", half, Money::from_minor(1))
                .unwrap(),
            OrderItem::new(ProductId::new("P-2"), None, "SKU-2", "Nut", half, Money::from_minor(1))
                .unwrap(),
        ];
        let order = Order::create(new).unwrap();
        assert_eq!(order.total_quantity(), u32::MAX);
    }

    #[test]
    fn create_rejects_empty_orders() {
        let mut new = sample_new_order();
        new.items.clear();
        assert!(matches!(Order::create(new), Err(StoreError::InvalidOrder(_))));
    }

    #[test]
    fn create_rejects_tampered_line_totals() {
        let mut new = sample_new_order();
        new.items[0].line_total = Money::from_minor(1);
        assert!(matches!(Order::create(new), Err(StoreError::InvalidOrder(_))));
    }

    #[test]
    fn create_rejects_discount_larger_than_total() {
        let mut new = sample_new_order();
        new.discount = Money::from_minor(1_000_000);
        assert!(matches!(Order::create(new), Err(StoreError::InvalidOrder(_))));
    }

    #[test]
    fn order_item_rejects_zero_quantity() {
        assert!(OrderItem::new(ProductId::new("P"), None, "S", "N", 0, Money::from_minor(1)).is_none());
    }

    #[test]
    fn status_names_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        for status in PaymentStatus::ALL {
            assert_eq!(status.as_str().parse::<PaymentStatus>(), Ok(status));
        }
        assert!("archived".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::OutForDelivery).unwrap();
        assert_eq!(json, "\"out_for_delivery\"");
    }
}
