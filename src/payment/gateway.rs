//! Payment gateway client and signature verification
//!
//! The gateway is a pluggable external capability: create a payable order,
//! refund a captured payment. Signature verification is deterministic
//! HMAC-SHA256 and lives here so both the verify endpoint and the webhook
//! share one constant-time implementation.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{ApiError, ApiResult};

type HmacSha256 = Hmac<Sha256>;

/// Compute the client-side payment signature: HMAC-SHA256 over
/// `"{order_ref}|{payment_ref}"`, hex-encoded.
pub fn payment_signature(order_ref: &str, payment_ref: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{}|{}", order_ref, payment_ref).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a client-supplied payment signature in constant time
pub fn verify_payment_signature(
    order_ref: &str,
    payment_ref: &str,
    signature: &str,
    secret: &str,
) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{}|{}", order_ref, payment_ref).as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Verify a webhook signature over the raw request body in constant time.
/// Uses a server-held secret distinct from the client-side one.
pub fn verify_webhook_signature(raw_body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(raw_body);
    mac.verify_slice(&provided).is_ok()
}

/// External payment gateway capability
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payable order; returns the gateway's opaque order reference
    async fn create_order(&self, amount: i64, currency: &str, receipt: &str)
        -> ApiResult<String>;

    /// Refund a captured payment in full; returns the refund reference
    async fn refund(&self, payment_ref: &str, amount: i64) -> ApiResult<String>;
}

#[derive(Debug, Deserialize)]
struct GatewayObjectResponse {
    id: String,
}

/// REST gateway client (Razorpay-style orders API, key id/secret basic auth)
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, key_id: String, key_secret: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url,
            key_id,
            key_secret,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> ApiResult<String> {
        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&serde_json::json!({
                "amount": amount,
                "currency": currency,
                "receipt": receipt,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::GatewayError(format!(
                "create order failed with {}: {}",
                status, body
            )));
        }

        let order: GatewayObjectResponse = response.json().await?;

        tracing::info!(order_ref = %order.id, amount, "Gateway order created");

        Ok(order.id)
    }

    async fn refund(&self, payment_ref: &str, amount: i64) -> ApiResult<String> {
        let response = self
            .http
            .post(format!("{}/payments/{}/refund", self.base_url, payment_ref))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&serde_json::json!({ "amount": amount }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::GatewayError(format!(
                "refund failed with {}: {}",
                status, body
            )));
        }

        let refund: GatewayObjectResponse = response.json().await?;

        tracing::info!(refund_ref = %refund.id, payment_ref = %payment_ref, "Gateway refund issued");

        Ok(refund.id)
    }
}

/// In-memory gateway test double: hands out sequenced references and never
/// talks to the network.
pub struct MockGateway {
    pub counter: std::sync::atomic::AtomicU64,
    pub fail_refunds: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            counter: std::sync::atomic::AtomicU64::new(1),
            fail_refunds: false,
        }
    }

    fn next(&self, prefix: &str) -> String {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{}_{:06}", prefix, n)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(
        &self,
        _amount: i64,
        _currency: &str,
        _receipt: &str,
    ) -> ApiResult<String> {
        Ok(self.next("order"))
    }

    async fn refund(&self, _payment_ref: &str, _amount: i64) -> ApiResult<String> {
        if self.fail_refunds {
            return Err(ApiError::GatewayError("refund rejected".to_string()));
        }
        Ok(self.next("rfnd"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_signature_roundtrip() {
        let sig = payment_signature("order_123", "pay_456", "client-secret");
        assert!(verify_payment_signature(
            "order_123",
            "pay_456",
            &sig,
            "client-secret"
        ));
    }

    #[test]
    fn test_payment_signature_rejects_tampering() {
        let sig = payment_signature("order_123", "pay_456", "client-secret");

        // Wrong payment ref
        assert!(!verify_payment_signature(
            "order_123",
            "pay_999",
            &sig,
            "client-secret"
        ));
        // Wrong secret
        assert!(!verify_payment_signature(
            "order_123",
            "pay_456",
            &sig,
            "other-secret"
        ));
        // Garbage signature
        assert!(!verify_payment_signature(
            "order_123",
            "pay_456",
            "not-hex",
            "client-secret"
        ));
    }

    #[test]
    fn test_webhook_signature_roundtrip() {
        let body = br#"{"event":"payment.captured"}"#;

        let mut mac = HmacSha256::new_from_slice(b"webhook-secret").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature(body, &sig, "webhook-secret"));
        assert!(!verify_webhook_signature(
            br#"{"event":"payment.failed"}"#,
            &sig,
            "webhook-secret"
        ));
        assert!(!verify_webhook_signature(body, &sig, "client-secret"));
    }

    #[test]
    fn test_client_and_webhook_secrets_are_independent() {
        let sig = payment_signature("order_1", "pay_1", "client-secret");
        assert!(!verify_webhook_signature(
            b"order_1|pay_1",
            &sig,
            "webhook-secret"
        ));
    }

    #[tokio::test]
    async fn test_mock_gateway_sequences_refs() {
        let gateway = MockGateway::new();
        let a = gateway.create_order(100, "INR", "r1").await.unwrap();
        let b = gateway.create_order(200, "INR", "r2").await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("order_"));

        let r = gateway.refund("pay_1", 100).await.unwrap();
        assert!(r.starts_with("rfnd_"));
    }

    #[tokio::test]
    async fn test_mock_gateway_refund_failure() {
        let gateway = MockGateway {
            fail_refunds: true,
            ..MockGateway::new()
        };
        assert!(gateway.refund("pay_1", 100).await.is_err());
    }
}
