//! Payment gateway port.
//!
//! Every outbound call to the payment provider goes through
//! [`PaymentGateway`]. Adapters translate provider failures into
//! [`GatewayError`] and never swallow them.

mod memory;
pub mod signature;

pub use memory::InMemoryGateway;

use async_trait::async_trait;
use common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by payment gateway adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway answered with a non-2xx status.
    #[error("Gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered 2xx with a body that could not be understood.
    #[error("Gateway response could not be decoded: {0}")]
    Decode(String),
}

/// Request to open a remote payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentRequest {
    pub amount: Money,
    pub currency: String,
    /// Stable, human-traceable receipt; the order number.
    pub receipt: String,
}

/// A provider-side payment object the shopper pays against.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayIntent {
    pub id: String,
    pub amount: Money,
    pub currency: String,
    pub receipt: String,
}

/// Status of a payment as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Created,
    Authorized,
    Captured,
    Refunded,
    Failed,
}

/// A payment as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    /// The intent this payment was made against.
    pub order_id: String,
    pub amount: Money,
    pub currency: String,
    pub status: GatewayPaymentStatus,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// A refund created at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: Money,
}

/// An already-parsed webhook event from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentCaptured {
        gateway_order_id: String,
        gateway_payment_id: String,
    },
    PaymentFailed {
        gateway_order_id: String,
        gateway_payment_id: Option<String>,
        reason: String,
        code: Option<String>,
    },
}

/// Outbound payment provider operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the publishable key the client uses to complete payment.
    fn public_key(&self) -> &str;

    /// Creates a remote payment intent.
    async fn open_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError>;

    /// Checks the proof the gateway hands the client after payment.
    ///
    /// HMAC-SHA256 over `gateway_order_id|gateway_payment_id` with the
    /// merchant secret, compared in constant time.
    fn verify_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool;

    /// Checks a webhook body against its signature header.
    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool;

    /// Looks up a payment; used to cross-check amounts.
    async fn fetch_payment(&self, gateway_payment_id: &str)
    -> Result<GatewayPayment, GatewayError>;

    /// Refunds part or all of a captured payment. Not retried on failure.
    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Money,
        reason: &str,
    ) -> Result<GatewayRefund, GatewayError>;
}
