//! HMAC-SHA256 signatures used by the gateway.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn payment_payload(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    format!("{gateway_order_id}|{gateway_payment_id}")
}

/// Signs arbitrary bytes, returning a lowercase hex digest.
pub fn sign(secret: &[u8], payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex signature over `payload` in constant time.
pub fn verify(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Signs the `(gateway_order_id, gateway_payment_id)` pair.
pub fn sign_payment(secret: &[u8], gateway_order_id: &str, gateway_payment_id: &str) -> Option<String> {
    sign(secret, payment_payload(gateway_order_id, gateway_payment_id).as_bytes())
}

/// Verifies the proof over `(gateway_order_id, gateway_payment_id)`.
pub fn verify_payment(
    secret: &[u8],
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> bool {
    verify(
        secret,
        payment_payload(gateway_order_id, gateway_payment_id).as_bytes(),
        signature,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let signature = sign_payment(b"secret", "order_1", "pay_1").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_payment(b"secret", "order_1", "pay_1", &signature));
    }

    #[test]
    fn signature_binds_both_ids_and_secret() {
        let signature = sign_payment(b"secret", "order_1", "pay_1").unwrap();
        assert!(!verify_payment(b"secret", "order_1", "pay_2", &signature));
        assert!(!verify_payment(b"secret", "order_2", "pay_1", &signature));
        assert!(!verify_payment(b"other", "order_1", "pay_1", &signature));
    }

    #[test]
    fn separator_prevents_concatenation_collisions() {
        let signature = sign_payment(b"secret", "order_1", "2pay").unwrap();
        assert!(!verify_payment(b"secret", "order_12", "pay", &signature));
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        assert!(!verify_payment(b"secret", "order_1", "pay_1", "not-hex"));
        assert!(!verify_payment(b"secret", "order_1", "pay_1", ""));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let digest = sign(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
