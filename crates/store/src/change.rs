use chrono::{DateTime, Utc};
use common::OrderId;

use crate::{
    Address, Order, OrderStatus, Payment, PaymentStatus, Result, StatusEntry, StoreError, Version,
};

/// Editable customer details of an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetails {
    pub shipping_address: Address,
    pub billing_address: Address,
    pub notes: Option<String>,
}

/// A set of writes to one order that commit together or not at all.
///
/// A change is built against the [`Order`] it was decided on and carries that
/// order's version. The store rejects it with
/// [`StoreError::ConcurrencyConflict`] if the order moved on in the meantime.
#[derive(Debug, Clone)]
pub struct OrderChange {
    pub order_id: OrderId,
    pub expected_version: Version,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub details: Option<OrderDetails>,
    /// Payments to insert or replace, matched by id.
    pub payments: Vec<Payment>,
    /// Ledger entries to append, oldest first.
    pub entries: Vec<StatusEntry>,
    pub at: DateTime<Utc>,
}

impl OrderChange {
    /// Starts an empty change against `order` as it was read.
    pub fn for_order(order: &Order, at: DateTime<Utc>) -> Self {
        Self {
            order_id: order.id(),
            expected_version: order.version(),
            status: None,
            payment_status: None,
            details: None,
            payments: Vec::new(),
            entries: Vec::new(),
            at,
        }
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn payment_status(mut self, payment_status: PaymentStatus) -> Self {
        self.payment_status = Some(payment_status);
        self
    }

    pub fn details(mut self, details: OrderDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn upsert_payment(mut self, payment: Payment) -> Self {
        self.payments.push(payment);
        self
    }

    pub fn record(mut self, entry: StatusEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Returns true if the change writes nothing.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.payment_status.is_none()
            && self.details.is_none()
            && self.payments.is_empty()
            && self.entries.is_empty()
    }

    /// Returns the statuses `current` ends up in once this change applies.
    pub fn resulting_status(&self, current: &Order) -> (OrderStatus, PaymentStatus) {
        (
            self.status.unwrap_or(current.status()),
            self.payment_status.unwrap_or(current.payment_status()),
        )
    }

    /// Checks the change against the current order and its payments.
    ///
    /// Called by stores after the version check and before any write.
    pub(crate) fn validate(&self, current: &Order, existing: &[Payment]) -> Result<()> {
        if self.is_empty() {
            return Err(StoreError::InvalidChange("change writes nothing".to_string()));
        }
        if self.order_id != current.id() {
            return Err(StoreError::InvalidChange(format!(
                "change for {} applied to {}",
                self.order_id,
                current.id()
            )));
        }
        if let Some(payment) = self.payments.iter().find(|p| p.order_id != self.order_id) {
            return Err(StoreError::InvalidChange(format!(
                "payment {} belongs to order {}",
                payment.id, payment.order_id
            )));
        }
        if let Some(entry) = self.entries.iter().find(|e| e.order_id != self.order_id) {
            return Err(StoreError::InvalidChange(format!(
                "ledger entry {} belongs to order {}",
                entry.id, entry.order_id
            )));
        }

        let resulting = self.resulting_status(current);
        let status_changes = resulting != (current.status(), current.payment_status());
        match self.entries.last() {
            None if status_changes => {
                return Err(StoreError::InvalidChange(
                    "status change without a ledger entry".to_string(),
                ));
            }
            Some(last) if (last.status, last.payment_status) != resulting => {
                return Err(StoreError::InvalidChange(format!(
                    "ledger entry records {}/{} but order ends at {}/{}",
                    last.status, last.payment_status, resulting.0, resulting.1
                )));
            }
            _ => {}
        }

        let open = merge_payments(existing, &self.payments)
            .iter()
            .filter(|p| p.is_open())
            .count();
        if open > 1 {
            return Err(StoreError::InvalidChange(format!(
                "order {} would have {open} open payments",
                self.order_id
            )));
        }

        Ok(())
    }
}

/// Applies payment upserts over the existing payments, keeping creation order.
pub(crate) fn merge_payments(existing: &[Payment], upserts: &[Payment]) -> Vec<Payment> {
    let mut merged = existing.to_vec();
    for payment in upserts {
        match merged.iter_mut().find(|p| p.id == payment.id) {
            Some(slot) => *slot = payment.clone(),
            None => merged.push(payment.clone()),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use common::Money;

    use super::*;
    use crate::Actor;
    use crate::fixtures::sample_new_order;

    fn order() -> Order {
        Order::create(sample_new_order()).unwrap()
    }

    #[test]
    fn status_change_requires_ledger_entry() {
        let order = order();
        let change = OrderChange::for_order(&order, Utc::now()).status(OrderStatus::Cancelled);
        assert!(matches!(
            change.validate(&order, &[]),
            Err(StoreError::InvalidChange(_))
        ));

        let change = change.record(StatusEntry::new(
            order.id(),
            OrderStatus::Cancelled,
            PaymentStatus::Pending,
            "Cancelled by customer",
            Actor::Customer,
            Utc::now(),
        ));
        assert!(change.validate(&order, &[]).is_ok());
    }

    #[test]
    fn ledger_entry_must_match_resulting_status() {
        let order = order();
        let change = OrderChange::for_order(&order, Utc::now())
            .status(OrderStatus::Cancelled)
            .record(StatusEntry::new(
                order.id(),
                OrderStatus::Confirmed,
                PaymentStatus::Pending,
                "wrong",
                Actor::System,
                Utc::now(),
            ));
        assert!(change.validate(&order, &[]).is_err());
    }

    #[test]
    fn second_open_payment_is_rejected() {
        let order = order();
        let now = Utc::now();
        let existing = Payment::open(order.id(), Money::from_minor(2800), "INR", now);
        let change = OrderChange::for_order(&order, now)
            .upsert_payment(Payment::open(order.id(), Money::from_minor(2800), "INR", now));
        assert!(change.validate(&order, &[existing.clone()]).is_err());

        let change = OrderChange::for_order(&order, now)
            .upsert_payment(existing.failed("timeout", None, now))
            .upsert_payment(Payment::open(order.id(), Money::from_minor(2800), "INR", now));
        assert!(change.validate(&order, &[existing]).is_ok());
    }

    #[test]
    fn empty_change_is_rejected() {
        let order = order();
        assert!(
            OrderChange::for_order(&order, Utc::now())
                .validate(&order, &[])
                .is_err()
        );
    }
}
