//! Order/payment state machine.
//!
//! Pure transition rules. Each function inspects an order (and its payments)
//! as read from the store and either rejects the action or returns the
//! [`OrderChange`] that performs it. Nothing here writes; the services commit
//! the returned change.
//!
//! ```text
//! order:   pending ─► payment_processing ─► confirmed ─► processing ─► shipped
//!                                                         ─► out_for_delivery ─► delivered ─► completed
//!          cancelled  ◄─ pending | payment_processing | confirmed   (never once paid)
//!          refunded   ◄─ delivered | completed                     (paid only)
//!
//! payment: pending ─► processing ─► paid ─► refunded
//!                              └──► failed  (order stays addressable at confirmed)
//! ```

use chrono::{DateTime, Duration, Utc};
use common::Money;
use store::{
    Actor, Order, OrderChange, OrderStatus, Payment, PaymentStatus, StatusEntry,
};

use crate::DomainError;

/// Failure reason recorded when an abandoned payment is superseded.
pub const REASON_TIMEOUT: &str = "timeout";
/// Failure reason recorded when opening the remote intent failed.
pub const REASON_GATEWAY_ERROR: &str = "gateway_error";
/// Failure reason recorded on open payments of a cancelled order.
pub const REASON_ORDER_CANCELLED: &str = "order_cancelled";

/// Returns true if a new payment attempt may be opened for the order.
pub fn can_accept_payment(order: &Order) -> bool {
    match order.status() {
        OrderStatus::Pending | OrderStatus::PaymentProcessing => true,
        OrderStatus::Confirmed => order.payment_status() == PaymentStatus::Failed,
        _ => false,
    }
}

/// Returns true if the order may be cancelled.
pub fn can_cancel(order: &Order, payments: &[Payment]) -> bool {
    matches!(
        order.status(),
        OrderStatus::Pending | OrderStatus::PaymentProcessing | OrderStatus::Confirmed
    ) && !is_paid(order, payments)
}

/// Returns true if the order may be refunded.
pub fn can_refund(order: &Order) -> bool {
    order.payment_status() == PaymentStatus::Paid
        && matches!(
            order.status(),
            OrderStatus::Delivered | OrderStatus::Completed
        )
}

/// Returns the next step of the fulfillment path, if any.
pub fn next_fulfillment(status: OrderStatus) -> Option<OrderStatus> {
    match status {
        OrderStatus::Confirmed => Some(OrderStatus::Processing),
        OrderStatus::Processing => Some(OrderStatus::Shipped),
        OrderStatus::Shipped => Some(OrderStatus::OutForDelivery),
        OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
        OrderStatus::Delivered => Some(OrderStatus::Completed),
        _ => None,
    }
}

fn is_paid(order: &Order, payments: &[Payment]) -> bool {
    matches!(
        order.payment_status(),
        PaymentStatus::Paid | PaymentStatus::Refunded
    ) || payments
        .iter()
        .any(|p| matches!(p.status, PaymentStatus::Paid | PaymentStatus::Refunded))
}

/// Order status after a payment attempt fails.
///
/// The order is kept at `confirmed` so it stays addressable for a retry.
fn status_after_failure(status: OrderStatus) -> OrderStatus {
    match status {
        OrderStatus::PaymentProcessing | OrderStatus::Confirmed => OrderStatus::Confirmed,
        other => other,
    }
}

fn entry(
    order: &Order,
    status: OrderStatus,
    payment_status: PaymentStatus,
    comment: impl Into<String>,
    actor: Actor,
    at: DateTime<Utc>,
) -> StatusEntry {
    StatusEntry::new(order.id(), status, payment_status, comment, actor, at)
}

/// Fails every open payment older than `timeout`.
///
/// Returns `None` when nothing is stale.
pub fn expire_stale(
    order: &Order,
    payments: &[Payment],
    now: DateTime<Utc>,
    timeout: Duration,
) -> Option<OrderChange> {
    let stale: Vec<&Payment> = payments
        .iter()
        .filter(|p| p.is_stale(now, timeout))
        .collect();
    if stale.is_empty() {
        return None;
    }

    let status = status_after_failure(order.status());
    let mut change = OrderChange::for_order(order, now)
        .status(status)
        .payment_status(PaymentStatus::Failed);
    for payment in &stale {
        change = change.upsert_payment(payment.failed(
            REASON_TIMEOUT,
            Some("payment_timeout".to_string()),
            now,
        ));
    }
    Some(change.record(entry(
        order,
        status,
        PaymentStatus::Failed,
        "Payment timed out",
        Actor::System,
        now,
    )))
}

/// Opens a new `processing` payment for the order's frozen total.
///
/// Expects stale payments to have been expired already.
pub fn open_payment(
    order: &Order,
    payments: &[Payment],
    actor: Actor,
    now: DateTime<Utc>,
) -> Result<(OrderChange, Payment), DomainError> {
    if is_paid(order, payments) {
        return Err(DomainError::AlreadyPaid(order.id()));
    }
    if payments.iter().any(Payment::is_open) {
        return Err(DomainError::PaymentInProgress(order.id()));
    }
    if !can_accept_payment(order) {
        return Err(DomainError::transition(
            order.status(),
            order.payment_status(),
            "open payment for",
        ));
    }
    if !order.total().is_positive() {
        return Err(DomainError::Validation(format!(
            "order total {} cannot be charged",
            order.total()
        )));
    }

    let status = match order.status() {
        OrderStatus::Pending => OrderStatus::PaymentProcessing,
        other => other,
    };
    let payment = Payment::open(order.id(), order.total(), order.currency(), now);
    let change = OrderChange::for_order(order, now)
        .status(status)
        .payment_status(PaymentStatus::Processing)
        .upsert_payment(payment.clone())
        .record(entry(
            order,
            status,
            PaymentStatus::Processing,
            "Payment initiated",
            actor,
            now,
        ));
    Ok((change, payment))
}

/// Records the remote intent id on an open payment.
pub fn attach_intent(
    order: &Order,
    payment: &Payment,
    gateway_order_id: &str,
    now: DateTime<Utc>,
) -> Result<OrderChange, DomainError> {
    if !payment.is_open() {
        return Err(DomainError::transition(
            order.status(),
            order.payment_status(),
            "attach intent to",
        ));
    }
    let mut updated = payment.clone();
    updated.gateway_order_id = Some(gateway_order_id.to_string());
    updated.updated_at = now;
    Ok(OrderChange::for_order(order, now).upsert_payment(updated))
}

/// Settles an open payment as failed.
pub fn fail_payment(
    order: &Order,
    payment: &Payment,
    reason: &str,
    code: Option<String>,
    actor: Actor,
    reference: Option<&str>,
    now: DateTime<Utc>,
) -> Result<OrderChange, DomainError> {
    if !payment.is_open() {
        return Err(DomainError::transition(
            order.status(),
            order.payment_status(),
            "fail payment of",
        ));
    }

    let status = status_after_failure(order.status());
    let mut ledger = entry(
        order,
        status,
        PaymentStatus::Failed,
        format!("Payment failed: {reason}"),
        actor,
        now,
    );
    if let Some(reference) = reference {
        ledger = ledger.with_reference(reference);
    }

    Ok(OrderChange::for_order(order, now)
        .status(status)
        .payment_status(PaymentStatus::Failed)
        .upsert_payment(payment.failed(reason, code, now))
        .record(ledger))
}

/// Settles a `processing` payment as paid and confirms the order.
///
/// Payment, order and ledger change in the one returned unit.
pub fn confirm_payment(
    order: &Order,
    payment: &Payment,
    gateway_payment_id: &str,
    actor: Actor,
    now: DateTime<Utc>,
) -> Result<OrderChange, DomainError> {
    if payment.status != PaymentStatus::Processing
        || !matches!(
            order.status(),
            OrderStatus::PaymentProcessing | OrderStatus::Confirmed
        )
    {
        return Err(DomainError::transition(
            order.status(),
            order.payment_status(),
            "confirm payment of",
        ));
    }

    Ok(OrderChange::for_order(order, now)
        .status(OrderStatus::Confirmed)
        .payment_status(PaymentStatus::Paid)
        .upsert_payment(payment.paid(gateway_payment_id, now))
        .record(
            entry(
                order,
                OrderStatus::Confirmed,
                PaymentStatus::Paid,
                "Payment verified",
                actor,
                now,
            )
            .with_reference(gateway_payment_id),
        ))
}

/// Cancels the order, failing any open payment.
pub fn cancel(
    order: &Order,
    payments: &[Payment],
    actor: Actor,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<OrderChange, DomainError> {
    if !can_cancel(order, payments) {
        return Err(DomainError::transition(
            order.status(),
            order.payment_status(),
            "cancel",
        ));
    }

    let open: Vec<&Payment> = payments.iter().filter(|p| p.is_open()).collect();
    let payment_status = if open.is_empty() {
        order.payment_status()
    } else {
        PaymentStatus::Failed
    };

    let mut change = OrderChange::for_order(order, now)
        .status(OrderStatus::Cancelled)
        .payment_status(payment_status);
    for payment in open {
        change = change.upsert_payment(payment.failed(REASON_ORDER_CANCELLED, None, now));
    }
    let comment = match reason {
        Some(reason) => format!("Order cancelled: {reason}"),
        None => "Order cancelled".to_string(),
    };
    Ok(change.record(entry(
        order,
        OrderStatus::Cancelled,
        payment_status,
        comment,
        actor,
        now,
    )))
}

/// Moves a paid order one step along the fulfillment path.
pub fn advance(
    order: &Order,
    target: OrderStatus,
    actor: Actor,
    comment: Option<&str>,
    now: DateTime<Utc>,
) -> Result<OrderChange, DomainError> {
    if order.payment_status() != PaymentStatus::Paid
        || next_fulfillment(order.status()) != Some(target)
    {
        return Err(DomainError::transition(
            order.status(),
            order.payment_status(),
            "advance fulfillment of",
        ));
    }

    let comment = comment
        .map(str::to_string)
        .unwrap_or_else(|| format!("Order {target}"));
    Ok(OrderChange::for_order(order, now)
        .status(target)
        .record(entry(
            order,
            target,
            order.payment_status(),
            comment,
            actor,
            now,
        )))
}

/// Checks a refund request before anything is sent to the gateway.
pub fn check_refund(order: &Order, payment: &Payment, amount: Money) -> Result<(), DomainError> {
    if !can_refund(order) || payment.status != PaymentStatus::Paid {
        return Err(DomainError::transition(
            order.status(),
            order.payment_status(),
            "refund",
        ));
    }
    if !amount.is_positive() || amount > payment.amount {
        return Err(DomainError::Validation(format!(
            "refund amount {amount} must be between 0.01 and {}",
            payment.amount
        )));
    }
    Ok(())
}

/// Records a refund created at the gateway.
pub fn refund(
    order: &Order,
    payment: &Payment,
    refund_id: &str,
    amount: Money,
    actor: Actor,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<OrderChange, DomainError> {
    check_refund(order, payment, amount)?;

    Ok(OrderChange::for_order(order, now)
        .status(OrderStatus::Refunded)
        .payment_status(PaymentStatus::Refunded)
        .upsert_payment(payment.refunded(refund_id, now))
        .record(
            entry(
                order,
                OrderStatus::Refunded,
                PaymentStatus::Refunded,
                format!("Refunded {amount}: {reason}"),
                actor,
                now,
            )
            .with_reference(refund_id),
        ))
}
