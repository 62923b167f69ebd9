//! HTTP payment gateway adapter.
//!
//! [`HttpPaymentGateway`] implements the domain's
//! [`PaymentGateway`](domain::PaymentGateway) port against a Razorpay-shaped
//! REST API; [`parse_webhook_event`] decodes the provider's webhook bodies.

pub mod client;
pub mod config;
pub mod webhook;

pub use client::HttpPaymentGateway;
pub use config::GatewayConfig;
pub use webhook::parse_webhook_event;
