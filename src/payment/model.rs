//! Payment reconciliation DTOs and webhook event shapes

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coupon::Coupon;
use crate::escrow::Transaction;

/// Request DTO for creating a gateway order. The coupon id is optional so a
/// missing field maps to MISSING_COUPON_ID rather than a deserialization
/// failure.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub coupon_id: Option<Uuid>,
}

/// Response DTO for order creation
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
}

/// Request DTO for the synchronous payment verify call
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub order_ref: Option<String>,
    pub payment_ref: Option<String>,
    pub signature: Option<String>,
}

/// Response DTO for a verified payment
#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub transaction: Transaction,
    pub coupon: Coupon,
}

/// Request DTO for a buyer-initiated refund
#[derive(Debug, Deserialize, Default)]
pub struct RefundRequest {
    pub reason: Option<String>,
}

/// Response DTO for a refund
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub refund_ref: String,
    pub amount: i64,
}

/// Webhook event envelope delivered by the gateway
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub payload: WebhookPayload,
}

/// Webhook payload references; presence varies by event kind
#[derive(Debug, Deserialize, Default)]
pub struct WebhookPayload {
    #[serde(default)]
    pub order_ref: Option<String>,
    #[serde(default)]
    pub payment_ref: Option<String>,
    #[serde(default)]
    pub refund_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_event_deserializes() {
        let raw = r#"{
            "event": "payment.captured",
            "payload": {"order_ref": "order_1", "payment_ref": "pay_1"}
        }"#;

        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, "payment.captured");
        assert_eq!(event.payload.order_ref.as_deref(), Some("order_1"));
        assert_eq!(event.payload.refund_ref, None);
    }

    #[test]
    fn test_create_order_request_tolerates_missing_coupon() {
        let req: CreateOrderRequest = serde_json::from_str("{}").unwrap();
        assert!(req.coupon_id.is_none());
    }
}
