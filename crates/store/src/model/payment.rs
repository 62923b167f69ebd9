use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::PaymentStatus;

/// One attempt to collect money for an order.
///
/// At most one attempt per order is open (`pending` or `processing`) at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    /// Identifier of the payment intent at the gateway, once opened.
    pub gateway_order_id: Option<String>,
    /// Identifier of the captured payment at the gateway, once verified.
    pub gateway_payment_id: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub failure_code: Option<String>,
    pub refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the attempt settles as paid or failed.
    pub processed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Creates a new `processing` attempt for the given amount.
    pub fn open(
        order_id: OrderId,
        amount: Money,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            order_id,
            gateway_order_id: None,
            gateway_payment_id: None,
            amount,
            currency: currency.into(),
            status: PaymentStatus::Processing,
            failure_reason: None,
            failure_code: None,
            refund_id: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Returns true while the attempt can still settle.
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Returns true if the attempt has been open for at least `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.is_open() && now - self.created_at >= timeout
    }

    /// Returns a copy settled as paid with the captured gateway payment id.
    pub fn paid(&self, gateway_payment_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            gateway_payment_id: Some(gateway_payment_id.into()),
            status: PaymentStatus::Paid,
            updated_at: now,
            processed_at: Some(now),
            ..self.clone()
        }
    }

    /// Returns a copy settled as failed.
    pub fn failed(
        &self,
        reason: impl Into<String>,
        code: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: PaymentStatus::Failed,
            failure_reason: Some(reason.into()),
            failure_code: code,
            updated_at: now,
            processed_at: Some(now),
            ..self.clone()
        }
    }

    /// Returns a copy marked refunded.
    pub fn refunded(&self, refund_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: PaymentStatus::Refunded,
            refund_id: Some(refund_id.into()),
            updated_at: now,
            ..self.clone()
        }
    }
}
