//! Coupon availability writes performed during the payment lifecycle

use sqlx::PgPool;
use uuid::Uuid;

use crate::coupon::Coupon;
use crate::error::{ApiError, ApiResult};

/// Service owning the coupon availability flag during the payment lifecycle
#[derive(Clone)]
pub struct CouponService {
    db_pool: PgPool,
}

impl CouponService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Get a single coupon by ID
    pub async fn get_coupon(&self, id: Uuid) -> ApiResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(coupon)
    }

    /// Reserve the coupon for a buyer at purchase time (direct escrow path).
    /// Guarded on the sold flag so two racing purchases cannot both win.
    pub async fn reserve_for_buyer(&self, coupon_id: Uuid, buyer_id: Uuid) -> ApiResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET is_sold = TRUE, buyer_id = $2, updated_at = NOW()
            WHERE id = $1 AND is_sold = FALSE
            "#,
        )
        .bind(coupon_id)
        .bind(buyer_id)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::CouponAlreadySold);
        }

        Ok(())
    }

    /// Mark a reserved coupon as sold once the buyer confirms (or the sweep
    /// auto-confirms)
    pub async fn mark_status_sold(&self, coupon_id: Uuid) -> ApiResult<()> {
        sqlx::query("UPDATE coupons SET status = 'sold', updated_at = NOW() WHERE id = $1")
            .bind(coupon_id)
            .execute(&self.db_pool)
            .await?;

        Ok(())
    }

    /// Finalize a gateway-paid coupon in one step (verify / webhook path):
    /// sold flag, buyer reference, and status together.
    pub async fn finalize_sold(&self, coupon_id: Uuid, buyer_id: Uuid) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE coupons
            SET is_sold = TRUE, buyer_id = $2, status = 'sold', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(coupon_id)
        .bind(buyer_id)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    /// Revert a coupon to its pre-purchase state after a refund
    pub async fn revert_to_available(&self, coupon_id: Uuid) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE coupons
            SET is_sold = FALSE, buyer_id = NULL, status = 'approved', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(coupon_id)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}
