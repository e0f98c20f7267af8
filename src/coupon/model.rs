//! Coupon models and purchase preconditions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Coupon model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Coupon {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    /// The redeemable code; revealed to the buyer only after purchase
    #[serde(skip_serializing)]
    pub code: String,
    /// Price in minor currency units
    pub price: i64,
    pub status: CouponStatus,
    pub is_sold: bool,
    pub buyer_id: Option<Uuid>,
    pub expiry_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Coupon lifecycle status
///
/// The listing/verification flow owns pending_verification, approved, and
/// rejected; the escrow machine is the sole writer of sold (and of the
/// revert back to approved on refund).
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "coupon_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus {
    PendingVerification,
    Approved,
    Rejected,
    Sold,
}

/// Check that a coupon can be purchased by `buyer_id` at `now`.
///
/// The check order is part of the API contract: status is checked before the
/// sold flag, so a sold coupon (status = sold) reports COUPON_NOT_APPROVED
/// even though is_sold is also true.
pub fn ensure_purchasable(
    coupon: &Coupon,
    buyer_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if coupon.status != CouponStatus::Approved {
        return Err(ApiError::CouponNotApproved);
    }
    if coupon.is_sold {
        return Err(ApiError::CouponAlreadySold);
    }
    if coupon.expiry_date <= now {
        return Err(ApiError::CouponExpired);
    }
    if coupon.seller_id == buyer_id {
        return Err(ApiError::CannotBuyOwnCoupon);
    }
    Ok(())
}
