//! Status ledger reads and replay detection.
//!
//! Entries are appended by [`OrderStore::commit`] only. Entries caused by a
//! gateway artifact carry its id as `reference`, which is how a replayed
//! verification or webhook is recognised as already applied.

use std::sync::Arc;

use common::OrderId;
use store::{OrderStore, PaymentStatus, StatusEntry};

use crate::DomainError;

/// Read access to the status ledger.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn OrderStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Returns the full history of an order, oldest first.
    pub async fn history(&self, order_id: OrderId) -> Result<Vec<StatusEntry>, DomainError> {
        Ok(self.store.history(order_id).await?)
    }

    /// Returns the entry caused by `reference`, if one was recorded.
    pub async fn find_reference(
        &self,
        order_id: OrderId,
        reference: &str,
    ) -> Result<Option<StatusEntry>, DomainError> {
        Ok(find_reference(&self.history(order_id).await?, reference).cloned())
    }

    /// Returns true if a transition to `payment_status` caused by `reference`
    /// has already been applied.
    pub async fn is_applied(
        &self,
        order_id: OrderId,
        reference: &str,
        payment_status: PaymentStatus,
    ) -> Result<bool, DomainError> {
        Ok(self
            .find_reference(order_id, reference)
            .await?
            .is_some_and(|entry| entry.payment_status == payment_status))
    }
}

/// Finds the most recent entry carrying `reference`.
pub fn find_reference<'a>(history: &'a [StatusEntry], reference: &str) -> Option<&'a StatusEntry> {
    history
        .iter()
        .rev()
        .find(|entry| entry.reference.as_deref() == Some(reference))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use store::{Actor, OrderStatus};

    use super::*;

    fn entry(reference: Option<&str>, payment_status: PaymentStatus) -> StatusEntry {
        let entry = StatusEntry::new(
            OrderId::new(),
            OrderStatus::Confirmed,
            payment_status,
            "test",
            Actor::Gateway,
            Utc::now(),
        );
        match reference {
            Some(reference) => entry.with_reference(reference),
            None => entry,
        }
    }

    #[test]
    fn finds_latest_entry_by_reference() {
        let history = vec![
            entry(None, PaymentStatus::Pending),
            entry(Some("pay_1"), PaymentStatus::Failed),
            entry(Some("pay_2"), PaymentStatus::Paid),
        ];

        assert_eq!(
            find_reference(&history, "pay_2").map(|e| e.payment_status),
            Some(PaymentStatus::Paid)
        );
        assert!(find_reference(&history, "pay_3").is_none());
    }
}
