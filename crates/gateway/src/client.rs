//! HTTP adapter for a Razorpay-shaped payment provider.

use std::sync::Arc;

use async_trait::async_trait;
use common::Money;
use domain::gateway::signature;
use domain::{
    GatewayError, GatewayIntent, GatewayPayment, GatewayRefund, IntentRequest, PaymentGateway,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::GatewayConfig;

#[derive(Serialize)]
struct RefundBody<'a> {
    amount: Money,
    notes: RefundNotes<'a>,
}

#[derive(Serialize)]
struct RefundNotes<'a> {
    reason: &'a str,
}

/// Payment gateway backed by the provider's REST API.
///
/// Every request uses basic auth with the key id and secret and is bounded
/// by the configured timeout. Requests are never retried here.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: SecretString,
    webhook_secret: Option<SecretString>,
}

impl HttpPaymentGateway {
    /// Builds the adapter.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                key_id: config.key_id,
                key_secret: config.key_secret,
                webhook_secret: config.webhook_secret,
            }),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.inner.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self
            .inner
            .client
            .get(self.url(path))
            .basic_auth(&self.inner.key_id, Some(self.inner.key_secret.expose_secret()))
            .send()
            .await
            .map_err(map_reqwest)?;
        handle_response(path, response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let response = self
            .inner
            .client
            .post(self.url(path))
            .basic_auth(&self.inner.key_id, Some(self.inner.key_secret.expose_secret()))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest)?;
        handle_response(path, response).await
    }
}

async fn handle_response<T: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(path, status = status.as_u16(), body = %body, "Gateway returned an error");
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await.map_err(map_reqwest)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        warn!(path, error = %e, "Gateway response could not be decoded");
        GatewayError::Decode(e.to_string())
    })
}

fn map_reqwest(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout
    } else if error.is_decode() {
        GatewayError::Decode(error.to_string())
    } else {
        GatewayError::Transport(error.to_string())
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    fn public_key(&self) -> &str {
        &self.inner.key_id
    }

    #[tracing::instrument(skip(self, request), fields(receipt = %request.receipt))]
    async fn open_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let intent: GatewayIntent = self.post("/v1/orders", request).await?;
        debug!(gateway_order_id = %intent.id, "Gateway intent created");
        Ok(intent)
    }

    fn verify_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool {
        signature::verify_payment(
            self.inner.key_secret.expose_secret().as_bytes(),
            gateway_order_id,
            gateway_payment_id,
            signature,
        )
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        match &self.inner.webhook_secret {
            Some(secret) => signature::verify(secret.expose_secret().as_bytes(), body, signature),
            None => {
                warn!("Webhook received but no webhook secret is configured");
                false
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        self.get(&format!("/v1/payments/{gateway_payment_id}")).await
    }

    #[tracing::instrument(skip(self))]
    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Money,
        reason: &str,
    ) -> Result<GatewayRefund, GatewayError> {
        let body = RefundBody {
            amount,
            notes: RefundNotes { reason },
        };
        let refund: GatewayRefund = self
            .post(&format!("/v1/payments/{gateway_payment_id}/refund"), &body)
            .await?;
        debug!(refund_id = %refund.id, "Gateway refund created");
        Ok(refund)
    }
}
