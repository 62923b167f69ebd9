//! Payment orchestration.
//!
//! Drives the gateway and the state machine together: every status change
//! is decided by [`machine`](crate::machine) and committed through the
//! [`CommandHandler`]; the gateway is only called outside of a commit.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use common::{Money, OrderId, PaymentId};
use serde::Serialize;
use store::{Actor, Order, OrderStore, OrderStoreExt, Payment, PaymentStatus};
use tracing::{error, info, warn};

use crate::command::CommandHandler;
use crate::deps::Dependencies;
use crate::error::DomainError;
use crate::gateway::{
    GatewayError, GatewayEvent, GatewayPaymentStatus, IntentRequest, PaymentGateway,
};
use crate::ledger::Ledger;
use crate::machine::{self, REASON_GATEWAY_ERROR};
use crate::notify::{Notification, NotificationQueue};

/// What the client needs to complete payment at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntent {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub gateway_order_id: String,
    pub amount: Money,
    pub currency: String,
    pub public_key: String,
}

fn reject(reason: &'static str) {
    metrics::counter!("payment_verifications_rejected_total", "reason" => reason).increment(1);
}

async fn timed<T, F>(op: &'static str, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    let started = Instant::now();
    let result = call.await;
    metrics::histogram!("gateway_request_duration_seconds", "op" => op)
        .record(started.elapsed().as_secs_f64());
    result
}

fn find<'a>(payments: &'a [Payment], id: PaymentId) -> Result<&'a Payment, DomainError> {
    payments
        .iter()
        .find(|p| p.id == id)
        .ok_or_else(|| DomainError::PaymentNotFound(id.to_string()))
}

/// Service for opening, verifying, failing and refunding payments.
#[derive(Clone)]
pub struct PaymentService {
    handler: CommandHandler,
    ledger: Ledger,
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationQueue,
    payment_timeout: chrono::Duration,
}

impl PaymentService {
    /// Creates a new payment service from the dependency bundle.
    pub fn new(deps: &Dependencies) -> Self {
        Self {
            handler: CommandHandler::new(deps.orders.clone(), deps.clock.clone()),
            ledger: Ledger::new(deps.orders.clone()),
            orders: deps.orders.clone(),
            gateway: deps.gateway.clone(),
            notifications: deps.notifications.clone(),
            payment_timeout: deps.config.payment_timeout_chrono(),
        }
    }

    /// Opens a new payment attempt and its remote intent.
    ///
    /// Abandoned attempts older than the payment timeout are failed first.
    /// A younger open attempt blocks with `PaymentInProgress`, a settled one
    /// with `AlreadyPaid`. If the gateway cannot create the intent the new
    /// attempt is failed and the gateway error returned.
    #[tracing::instrument(skip(self))]
    pub async fn open_payment_intent(&self, order_id: OrderId) -> Result<PaymentIntent, DomainError> {
        let timeout = self.payment_timeout;
        let expired = self
            .handler
            .execute(order_id, |order, payments, now| {
                Ok(machine::expire_stale(order, payments, now, timeout))
            })
            .await?;
        if expired.committed {
            metrics::counter!("payment_intents_expired_total").increment(1);
            info!("Abandoned payment expired");
            self.notifications.enqueue(Notification::PaymentFailed {
                order_id,
                reason: machine::REASON_TIMEOUT.to_string(),
            });
        }

        let mut opened = None;
        let result = self
            .handler
            .execute(order_id, |order, payments, now| {
                let (change, payment) =
                    machine::open_payment(order, payments, Actor::Customer, now)?;
                opened = Some(payment);
                Ok(Some(change))
            })
            .await
            .inspect_err(|e| warn!(error = %e, "Payment intent refused"))?;
        let payment = opened.ok_or_else(|| DomainError::PaymentNotFound(order_id.to_string()))?;
        let order = result.order;

        let request = IntentRequest {
            amount: payment.amount,
            currency: payment.currency.clone(),
            receipt: order.order_number().to_string(),
        };
        let intent = match timed("open_intent", self.gateway.open_intent(&request)).await {
            Ok(intent) => intent,
            Err(e) => {
                error!(error = %e, payment_id = %payment.id, "Gateway failed to open intent");
                self.fail_after_gateway_error(order_id, payment.id).await;
                return Err(e.into());
            }
        };

        let gateway_order_id = intent.id.clone();
        self.handler
            .execute(order_id, |order, payments, now| {
                let current = find(payments, payment.id)?;
                machine::attach_intent(order, current, &gateway_order_id, now).map(Some)
            })
            .await?;

        metrics::counter!("payment_intents_opened_total").increment(1);
        info!(
            payment_id = %payment.id,
            gateway_order_id = %intent.id,
            amount = %payment.amount,
            "Payment intent opened"
        );
        Ok(PaymentIntent {
            order_id,
            payment_id: payment.id,
            gateway_order_id: intent.id,
            amount: payment.amount,
            currency: payment.currency,
            public_key: self.gateway.public_key().to_string(),
        })
    }

    async fn fail_after_gateway_error(&self, order_id: OrderId, payment_id: PaymentId) {
        let result = self
            .handler
            .execute(order_id, |order, payments, now| {
                let current = find(payments, payment_id)?;
                if !current.is_open() {
                    return Ok(None);
                }
                machine::fail_payment(
                    order,
                    current,
                    REASON_GATEWAY_ERROR,
                    None,
                    Actor::System,
                    None,
                    now,
                )
                .map(Some)
            })
            .await;

        match result {
            Ok(result) if result.committed => {
                metrics::counter!("payments_failed_total").increment(1);
                self.notifications.enqueue(Notification::PaymentFailed {
                    order_id,
                    reason: REASON_GATEWAY_ERROR.to_string(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, %payment_id, "Failed to record gateway error on payment");
            }
        }
    }

    /// Verifies the proof the client received from the gateway and confirms
    /// the order.
    ///
    /// The signature is checked first, then the gateway is asked for the
    /// captured amount, which must equal the order total. Payment, order and
    /// ledger change in one commit. Replaying an applied verification
    /// returns the order unchanged.
    #[tracing::instrument(skip(self, signature))]
    pub async fn verify_payment(
        &self,
        order_id: OrderId,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<Order, DomainError> {
        if !self
            .gateway
            .verify_signature(gateway_order_id, gateway_payment_id, signature)
        {
            reject("signature");
            warn!("Payment signature mismatch");
            return Err(DomainError::SignatureMismatch);
        }

        self.confirm(
            Some(order_id),
            gateway_order_id,
            gateway_payment_id,
            Actor::Customer,
        )
        .await
    }

    async fn confirm(
        &self,
        expected_order: Option<OrderId>,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        actor: Actor,
    ) -> Result<Order, DomainError> {
        let payment = self
            .orders
            .payment_by_gateway_order_id(gateway_order_id)
            .await?
            .ok_or_else(|| DomainError::PaymentNotFound(gateway_order_id.to_string()))?;
        if let Some(order_id) = expected_order.filter(|id| *id != payment.order_id) {
            reject("order_mismatch");
            warn!(payment_order_id = %payment.order_id, "Intent belongs to another order");
            return Err(DomainError::Validation(format!(
                "intent {gateway_order_id} does not belong to order {order_id}"
            )));
        }
        let order_id = payment.order_id;

        if payment.gateway_payment_id.as_deref() == Some(gateway_payment_id)
            && self
                .ledger
                .is_applied(order_id, gateway_payment_id, PaymentStatus::Paid)
                .await?
        {
            info!(%order_id, "Verification already applied");
            return Ok(self.orders.require(order_id).await?);
        }

        let reported = timed("fetch_payment", self.gateway.fetch_payment(gateway_payment_id))
            .await
            .inspect_err(|e| error!(error = %e, "Gateway payment lookup failed"))?;
        if reported.order_id != gateway_order_id {
            reject("intent_mismatch");
            warn!(reported_intent = %reported.order_id, "Gateway payment belongs to another intent");
            return Err(DomainError::Validation(format!(
                "payment {gateway_payment_id} was not made against {gateway_order_id}"
            )));
        }
        // An authorization can still be voided; only a capture settles the order
        if reported.status != GatewayPaymentStatus::Captured {
            reject("not_captured");
            warn!(status = ?reported.status, "Gateway payment not captured");
            return Err(DomainError::Validation(format!(
                "payment {gateway_payment_id} is {:?} at the gateway",
                reported.status
            )));
        }

        let order = self.orders.require(order_id).await?;
        if !reported.currency.eq_ignore_ascii_case(order.currency()) {
            reject("currency_mismatch");
            warn!(
                %order_id,
                expected = order.currency(),
                actual = %reported.currency,
                amount = %reported.amount,
                "Gateway currency does not match order currency"
            );
            return Err(DomainError::CurrencyMismatch {
                expected: order.currency().to_string(),
                actual: reported.currency,
            });
        }
        if reported.amount != order.total() {
            reject("amount_mismatch");
            warn!(
                %order_id,
                expected = %order.total(),
                actual = %reported.amount,
                "Gateway amount does not match order total"
            );
            return Err(DomainError::AmountMismatch {
                expected: order.total(),
                actual: reported.amount,
            });
        }

        let result = self
            .handler
            .execute(order_id, |order, payments, now| {
                let current = find(payments, payment.id)?;
                if current.status == PaymentStatus::Paid
                    && current.gateway_payment_id.as_deref() == Some(gateway_payment_id)
                {
                    return Ok(None);
                }
                machine::confirm_payment(order, current, gateway_payment_id, actor.clone(), now)
                    .map(Some)
            })
            .await
            .inspect_err(|e| {
                if matches!(e, DomainError::InvalidStateTransition { .. }) {
                    reject("state");
                    error!(
                        %order_id,
                        gateway_payment_id,
                        error = %e,
                        "Captured payment could not be applied, needs manual reconciliation"
                    );
                }
            })?;

        if result.committed {
            metrics::counter!("payments_verified_total").increment(1);
            self.notifications
                .enqueue(Notification::PaymentSucceeded { order_id });
            info!(%order_id, gateway_payment_id, "Payment verified");
        }
        Ok(result.order)
    }

    /// Records a failed payment attempt reported by the client.
    ///
    /// The order moves to (or stays at) `confirmed` with payment status
    /// `failed`, from where a new intent may be opened.
    #[tracing::instrument(skip(self))]
    pub async fn report_failure(
        &self,
        order_id: OrderId,
        reason: &str,
        code: Option<&str>,
    ) -> Result<Order, DomainError> {
        let result = self
            .handler
            .execute(order_id, |order, payments, now| {
                let Some(open) = payments.iter().find(|p| p.is_open()) else {
                    return Err(DomainError::transition(
                        order.status(),
                        order.payment_status(),
                        "report payment failure for",
                    ));
                };
                machine::fail_payment(
                    order,
                    open,
                    reason,
                    code.map(str::to_string),
                    Actor::Customer,
                    None,
                    now,
                )
                .map(Some)
            })
            .await?;

        metrics::counter!("payments_failed_total").increment(1);
        self.notifications.enqueue(Notification::PaymentFailed {
            order_id,
            reason: reason.to_string(),
        });
        info!(reason, "Payment failure recorded");
        Ok(result.order)
    }

    /// Refunds a captured payment.
    ///
    /// The request is checked before the gateway is called; a gateway
    /// failure is returned and never retried.
    #[tracing::instrument(skip(self))]
    pub async fn refund(
        &self,
        gateway_payment_id: &str,
        amount: Money,
        reason: &str,
    ) -> Result<Order, DomainError> {
        let payment = self
            .orders
            .payment_by_gateway_payment_id(gateway_payment_id)
            .await?
            .ok_or_else(|| DomainError::PaymentNotFound(gateway_payment_id.to_string()))?;
        let order_id = payment.order_id;
        let order = self.orders.require(order_id).await?;
        machine::check_refund(&order, &payment, amount)?;

        let refund = timed(
            "create_refund",
            self.gateway.create_refund(gateway_payment_id, amount, reason),
        )
        .await
        .inspect_err(|e| error!(%order_id, error = %e, "Gateway refund failed"))?;

        let result = self
            .handler
            .execute(order_id, |order, payments, now| {
                let current = find(payments, payment.id)?;
                machine::refund(
                    order,
                    current,
                    &refund.id,
                    amount,
                    Actor::System,
                    reason,
                    now,
                )
                .map(Some)
            })
            .await
            .inspect_err(|e| {
                error!(
                    %order_id,
                    refund_id = %refund.id,
                    error = %e,
                    "Refund created at gateway but not recorded"
                );
            })?;

        metrics::counter!("refunds_total").increment(1);
        self.notifications.enqueue(Notification::OrderStatusChanged {
            order_id,
            status: result.order.status(),
            payment_status: result.order.payment_status(),
        });
        info!(%order_id, refund_id = %refund.id, %amount, "Payment refunded");
        Ok(result.order)
    }

    /// Checks a raw webhook body against its signature header.
    pub fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        let valid = self.gateway.verify_webhook_signature(body, signature);
        if !valid {
            reject("webhook_signature");
            warn!(len = body.len(), "Webhook signature mismatch");
        }
        valid
    }

    /// Applies an already-verified gateway webhook event.
    ///
    /// Captures go through the same amount cross-check as
    /// [`verify_payment`](Self::verify_payment). Replays are no-ops.
    #[tracing::instrument(skip(self))]
    pub async fn handle_gateway_event(&self, event: GatewayEvent) -> Result<Order, DomainError> {
        match event {
            GatewayEvent::PaymentCaptured {
                gateway_order_id,
                gateway_payment_id,
            } => {
                self.confirm(None, &gateway_order_id, &gateway_payment_id, Actor::Gateway)
                    .await
            }
            GatewayEvent::PaymentFailed {
                gateway_order_id,
                gateway_payment_id,
                reason,
                code,
            } => {
                self.apply_failure_event(&gateway_order_id, gateway_payment_id, &reason, code)
                    .await
            }
        }
    }

    async fn apply_failure_event(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: Option<String>,
        reason: &str,
        code: Option<String>,
    ) -> Result<Order, DomainError> {
        let payment = self
            .orders
            .payment_by_gateway_order_id(gateway_order_id)
            .await?
            .ok_or_else(|| DomainError::PaymentNotFound(gateway_order_id.to_string()))?;
        let order_id = payment.order_id;
        let reference = gateway_payment_id.unwrap_or_else(|| gateway_order_id.to_string());

        let result = self
            .handler
            .execute(order_id, |order, payments, now| {
                let current = find(payments, payment.id)?;
                // Already settled, either by this event or another attempt
                if !current.is_open() {
                    return Ok(None);
                }
                machine::fail_payment(
                    order,
                    current,
                    reason,
                    code.clone(),
                    Actor::Gateway,
                    Some(&reference),
                    now,
                )
                .map(Some)
            })
            .await?;

        if result.committed {
            metrics::counter!("payments_failed_total").increment(1);
            self.notifications.enqueue(Notification::PaymentFailed {
                order_id,
                reason: reason.to_string(),
            });
            info!(%order_id, %reference, "Gateway payment failure recorded");
        } else {
            info!(%order_id, %reference, "Gateway failure event ignored, payment already settled");
        }
        Ok(result.order)
    }
}
