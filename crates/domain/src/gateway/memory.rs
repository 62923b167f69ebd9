use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::Money;

use super::{
    GatewayError, GatewayIntent, GatewayPayment, GatewayPaymentStatus, GatewayRefund,
    IntentRequest, PaymentGateway, signature,
};

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    intents: HashMap<String, GatewayIntent>,
    payments: HashMap<String, GatewayPayment>,
    refunds: Vec<GatewayRefund>,
    next_id: u32,
    fail_on_intent: Option<GatewayError>,
    fail_on_fetch: Option<GatewayError>,
    fail_on_refund: Option<GatewayError>,
}

impl InMemoryGatewayState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:06}", self.next_id)
    }
}

/// In-memory payment gateway for testing.
///
/// Signs and verifies with real HMAC-SHA256, so signatures produced by
/// [`capture`](InMemoryGateway::capture) pass verification exactly like the
/// provider's would.
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    public_key: String,
    secret: Vec<u8>,
    webhook_secret: Vec<u8>,
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new("key_test", "test_secret", "test_webhook_secret")
    }
}

impl InMemoryGateway {
    /// Creates a gateway with the given credentials.
    pub fn new(public_key: &str, secret: &str, webhook_secret: &str) -> Self {
        Self {
            public_key: public_key.to_string(),
            secret: secret.as_bytes().to_vec(),
            webhook_secret: webhook_secret.as_bytes().to_vec(),
            state: Arc::default(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryGatewayState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryGatewayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes intent creation fail with `error` until reset with `None`.
    pub fn set_fail_on_intent(&self, error: Option<GatewayError>) {
        self.write().fail_on_intent = error;
    }

    pub fn set_fail_on_fetch(&self, error: Option<GatewayError>) {
        self.write().fail_on_fetch = error;
    }

    pub fn set_fail_on_refund(&self, error: Option<GatewayError>) {
        self.write().fail_on_refund = error;
    }

    /// Simulates the shopper paying the full amount of an intent.
    ///
    /// Returns the gateway payment id and the signature handed to the client.
    pub fn capture(&self, gateway_order_id: &str) -> Option<(String, String)> {
        let amount = self.read().intents.get(gateway_order_id)?.amount;
        self.capture_amount(gateway_order_id, amount)
    }

    /// Simulates a capture of an arbitrary amount against an intent.
    pub fn capture_amount(&self, gateway_order_id: &str, amount: Money) -> Option<(String, String)> {
        let currency = self.read().intents.get(gateway_order_id)?.currency.clone();
        self.record_payment(
            gateway_order_id,
            amount,
            &currency,
            GatewayPaymentStatus::Captured,
        )
    }

    /// Records a payment against an intent exactly as given, signed like a
    /// real one.
    pub fn record_payment(
        &self,
        gateway_order_id: &str,
        amount: Money,
        currency: &str,
        status: GatewayPaymentStatus,
    ) -> Option<(String, String)> {
        let mut state = self.write();
        if !state.intents.contains_key(gateway_order_id) {
            return None;
        }
        let payment_id = state.next_id("pay");
        state.payments.insert(
            payment_id.clone(),
            GatewayPayment {
                id: payment_id.clone(),
                order_id: gateway_order_id.to_string(),
                amount,
                currency: currency.to_string(),
                status,
                error_code: None,
                error_description: None,
            },
        );
        drop(state);

        let signature = self.sign(gateway_order_id, &payment_id)?;
        Some((payment_id, signature))
    }

    /// Signs a pair the way the provider does.
    pub fn sign(&self, gateway_order_id: &str, gateway_payment_id: &str) -> Option<String> {
        signature::sign_payment(&self.secret, gateway_order_id, gateway_payment_id)
    }

    /// Signs a webhook body the way the provider does.
    pub fn sign_webhook(&self, body: &[u8]) -> Option<String> {
        signature::sign(&self.webhook_secret, body)
    }

    /// Returns the number of intents opened.
    pub fn intent_count(&self) -> usize {
        self.read().intents.len()
    }

    /// Returns every refund created, oldest first.
    pub fn refunds(&self) -> Vec<GatewayRefund> {
        self.read().refunds.clone()
    }

    /// Returns the intent opened for a receipt, if any.
    pub fn intent_for_receipt(&self, receipt: &str) -> Option<GatewayIntent> {
        self.read()
            .intents
            .values()
            .find(|intent| intent.receipt == receipt)
            .cloned()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    async fn open_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let mut state = self.write();
        if let Some(error) = state.fail_on_intent.clone() {
            return Err(error);
        }

        let intent = GatewayIntent {
            id: state.next_id("order"),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: request.receipt.clone(),
        };
        state.intents.insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }

    fn verify_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool {
        signature::verify_payment(&self.secret, gateway_order_id, gateway_payment_id, signature)
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        signature::verify(&self.webhook_secret, body, signature)
    }

    async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        let state = self.read();
        if let Some(error) = state.fail_on_fetch.clone() {
            return Err(error);
        }
        state
            .payments
            .get(gateway_payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                body: format!("payment {gateway_payment_id} not found"),
            })
    }

    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Money,
        _reason: &str,
    ) -> Result<GatewayRefund, GatewayError> {
        let mut state = self.write();
        if let Some(error) = state.fail_on_refund.clone() {
            return Err(error);
        }

        let Some(payment) = state.payments.get_mut(gateway_payment_id) else {
            return Err(GatewayError::Status {
                status: 404,
                body: format!("payment {gateway_payment_id} not found"),
            });
        };
        if amount > payment.amount {
            return Err(GatewayError::Status {
                status: 400,
                body: "refund amount exceeds captured amount".to_string(),
            });
        }
        payment.status = GatewayPaymentStatus::Refunded;

        let refund = GatewayRefund {
            id: state.next_id("rfnd"),
            payment_id: gateway_payment_id.to_string(),
            amount,
        };
        state.refunds.push(refund.clone());
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> IntentRequest {
        IntentRequest {
            amount: Money::from_minor(2500),
            currency: "INR".to_string(),
            receipt: "ORD-20260101-ABC".to_string(),
        }
    }

    #[tokio::test]
    async fn capture_produces_verifiable_signature() {
        let gateway = InMemoryGateway::default();
        let intent = gateway.open_intent(&request()).await.unwrap();

        let (payment_id, signature) = gateway.capture(&intent.id).unwrap();

        assert!(gateway.verify_signature(&intent.id, &payment_id, &signature));
        let payment = gateway.fetch_payment(&payment_id).await.unwrap();
        assert_eq!(payment.amount, Money::from_minor(2500));
        assert_eq!(payment.order_id, intent.id);
    }

    #[tokio::test]
    async fn intent_failure_toggle() {
        let gateway = InMemoryGateway::default();
        gateway.set_fail_on_intent(Some(GatewayError::Timeout));

        assert_eq!(
            gateway.open_intent(&request()).await,
            Err(GatewayError::Timeout)
        );
        assert_eq!(gateway.intent_count(), 0);
    }

    #[tokio::test]
    async fn refund_cannot_exceed_capture() {
        let gateway = InMemoryGateway::default();
        let intent = gateway.open_intent(&request()).await.unwrap();
        let (payment_id, _) = gateway.capture(&intent.id).unwrap();

        let result = gateway
            .create_refund(&payment_id, Money::from_minor(2501), "too much")
            .await;
        assert!(matches!(result, Err(GatewayError::Status { status: 400, .. })));

        let refund = gateway
            .create_refund(&payment_id, Money::from_minor(2500), "damaged")
            .await
            .unwrap();
        assert_eq!(gateway.refunds(), vec![refund]);
    }

    #[test]
    fn webhook_signatures_use_webhook_secret() {
        let gateway = InMemoryGateway::default();
        let body = br#"{"event":"payment.captured"}"#;
        let signature = gateway.sign_webhook(body).unwrap();

        assert!(gateway.verify_webhook_signature(body, &signature));
        assert!(!gateway.verify_webhook_signature(b"{}", &signature));
    }
}
