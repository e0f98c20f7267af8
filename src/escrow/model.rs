//! Transaction models for the escrow state machine

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// The central escrow entity. Mutated only through the named transition
/// operations on `EscrowService`, never via ad-hoc field writes.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub coupon_id: Uuid,
    /// Amount in minor currency units, always > 0
    pub amount: i64,
    /// Opaque order id issued by the payment gateway
    pub external_order_ref: Option<String>,
    pub external_payment_ref: Option<String>,
    pub external_refund_ref: Option<String>,
    pub payment_status: PaymentStatus,
    pub buyer_confirmed: bool,
    pub dispute_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Transaction payment status
///
/// Pending/processing are the unfunded gateway-order entry states; holding is
/// the funded verification window of the direct escrow path. Released and
/// completed are the sold-equivalent success terminals of the two entry
/// paths. All of released/completed/refunded/failed are terminal.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Holding,
    Released,
    Completed,
    Refunded,
    Failed,
}

impl PaymentStatus {
    /// Non-terminal: the transaction still blocks other purchases of its
    /// coupon
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Holding
        )
    }

    /// Terminal: no further transition is permitted
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Sold-equivalent success terminal
    pub fn is_success(&self) -> bool {
        matches!(self, PaymentStatus::Released | PaymentStatus::Completed)
    }
}

/// Request DTO for the direct purchase endpoint
#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    pub coupon_id: Uuid,
}

/// Request DTO for disputing a holding transaction
#[derive(Debug, Deserialize, Validate)]
pub struct DisputeRequest {
    #[validate(length(min = 1, message = "disputeReason is required"))]
    pub dispute_reason: String,
}

/// Direct purchase response; the only place the coupon code is revealed
#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub transaction: Transaction,
    pub coupon_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses() {
        assert!(PaymentStatus::Pending.is_active());
        assert!(PaymentStatus::Processing.is_active());
        assert!(PaymentStatus::Holding.is_active());
        assert!(!PaymentStatus::Released.is_active());
        assert!(!PaymentStatus::Refunded.is_active());
    }

    #[test]
    fn test_terminal_statuses() {
        for status in [
            PaymentStatus::Released,
            PaymentStatus::Completed,
            PaymentStatus::Refunded,
            PaymentStatus::Failed,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_success_terminals() {
        assert!(PaymentStatus::Released.is_success());
        assert!(PaymentStatus::Completed.is_success());
        assert!(!PaymentStatus::Refunded.is_success());
        assert!(!PaymentStatus::Failed.is_success());
        assert!(!PaymentStatus::Holding.is_success());
    }
}
