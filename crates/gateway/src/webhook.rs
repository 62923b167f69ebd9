//! Decoding of provider webhook bodies into [`GatewayEvent`]s.
//!
//! Callers must check the body with
//! [`PaymentGateway::verify_webhook_signature`](domain::PaymentGateway::verify_webhook_signature)
//! before decoding it.

use domain::{GatewayError, GatewayEvent};
use serde::Deserialize;
use tracing::debug;

const DEFAULT_FAILURE_REASON: &str = "payment_failed";

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    payment: Option<Wrapped>,
}

#[derive(Deserialize)]
struct Wrapped {
    entity: PaymentEntity,
}

#[derive(Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Decodes a webhook body.
///
/// Returns `Ok(None)` for event types the core does not act on, and for
/// payment events that carry no intent id.
pub fn parse_webhook_event(body: &[u8]) -> Result<Option<GatewayEvent>, GatewayError> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| GatewayError::Decode(e.to_string()))?;

    let entity = envelope
        .payload
        .and_then(|payload| payload.payment)
        .map(|wrapped| wrapped.entity);

    let event = match (envelope.event.as_str(), entity) {
        ("payment.captured", Some(entity)) => entity.order_id.map(|gateway_order_id| {
            GatewayEvent::PaymentCaptured {
                gateway_order_id,
                gateway_payment_id: entity.id,
            }
        }),
        ("payment.failed", Some(entity)) => {
            entity.order_id.map(|gateway_order_id| GatewayEvent::PaymentFailed {
                gateway_order_id,
                gateway_payment_id: Some(entity.id),
                reason: entity
                    .error_description
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string()),
                code: entity.error_code,
            })
        }
        (name, _) => {
            debug!(event = name, "Ignoring webhook event");
            None
        }
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_captured_event() {
        let event = parse_webhook_event(&body(json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {
                "id": "pay_1", "order_id": "order_1", "status": "captured", "amount": 3000
            }}}
        })))
        .unwrap();

        assert_eq!(
            event,
            Some(GatewayEvent::PaymentCaptured {
                gateway_order_id: "order_1".to_string(),
                gateway_payment_id: "pay_1".to_string(),
            })
        );
    }

    #[test]
    fn test_failed_event_carries_reason_and_code() {
        let event = parse_webhook_event(&body(json!({
            "event": "payment.failed",
            "payload": {"payment": {"entity": {
                "id": "pay_2",
                "order_id": "order_2",
                "error_code": "BAD_REQUEST_ERROR",
                "error_description": "Card declined"
            }}}
        })))
        .unwrap();

        assert_eq!(
            event,
            Some(GatewayEvent::PaymentFailed {
                gateway_order_id: "order_2".to_string(),
                gateway_payment_id: Some("pay_2".to_string()),
                reason: "Card declined".to_string(),
                code: Some("BAD_REQUEST_ERROR".to_string()),
            })
        );
    }

    #[test]
    fn test_failed_event_without_description() {
        let event = parse_webhook_event(&body(json!({
            "event": "payment.failed",
            "payload": {"payment": {"entity": {"id": "pay_3", "order_id": "order_3"}}}
        })))
        .unwrap();

        assert!(matches!(
            event,
            Some(GatewayEvent::PaymentFailed { reason, code: None, .. }) if reason == DEFAULT_FAILURE_REASON
        ));
    }

    #[test]
    fn test_unhandled_events_are_ignored() {
        let event = parse_webhook_event(&body(json!({
            "event": "refund.processed",
            "payload": {"refund": {"entity": {"id": "rfnd_1"}}}
        })))
        .unwrap();
        assert_eq!(event, None);
    }

    #[test]
    fn test_payment_without_intent_is_ignored() {
        let event = parse_webhook_event(&body(json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_4", "order_id": null}}}
        })))
        .unwrap();
        assert_eq!(event, None);
    }

    #[test]
    fn test_malformed_body_is_a_decode_error() {
        assert!(matches!(
            parse_webhook_event(b"not json"),
            Err(GatewayError::Decode(_))
        ));
    }
}
