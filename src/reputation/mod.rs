//! Seller reputation service
//!
//! Trust score, warnings, and the ban flag, mutated by the escrow machine on
//! dispute/refund/release outcomes. Trust deltas are commutative clamped
//! increments; the ban check-and-set is a single atomic statement so a ban
//! transition cannot be lost under concurrent warning increments.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiResult;

/// Trust awarded to the seller on a confirmed or auto-confirmed sale
pub const TRUST_REWARD_ON_RELEASE: i32 = 5;

/// Trust deducted from the seller on a dispute or buyer-initiated refund
pub const TRUST_PENALTY_ON_DISPUTE: i32 = 50;

/// Warnings at which a seller is banned
const BAN_WARNING_THRESHOLD: i32 = 3;

/// Trust score below which a seller is banned
const BAN_TRUST_FLOOR: i32 = 20;

#[derive(Clone)]
pub struct ReputationService {
    db_pool: PgPool,
}

impl ReputationService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Raise a seller's trust score, capped at 100
    pub async fn increase_trust(&self, user_id: Uuid, amount: i32) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET trust_score = LEAST(trust_score + $2, 100), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    /// Lower a seller's trust score, floored at 0. Applies no ban of its
    /// own; banning happens only through [`record_warning`].
    ///
    /// [`record_warning`]: ReputationService::record_warning
    pub async fn decrease_trust(&self, user_id: Uuid, amount: i32) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET trust_score = GREATEST(trust_score - $2, 0), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    /// Record a warning against a seller and apply the ban rule
    /// (warnings >= 3 or trust < 20) in the same statement.
    ///
    /// Returns true when this warning newly banned the seller, so the caller
    /// can emit exactly one ban notification. Callers apply this BEFORE the
    /// same dispute's trust penalty; the ban rule sees the pre-penalty score.
    pub async fn record_warning(&self, user_id: Uuid) -> ApiResult<bool> {
        let row: Option<(bool, bool)> = sqlx::query_as(
            r#"
            WITH prev AS (
                SELECT is_banned FROM users WHERE id = $1
            )
            UPDATE users u
            SET warnings_count = u.warnings_count + 1,
                is_banned = u.is_banned
                    OR (u.warnings_count + 1 >= $2)
                    OR (u.trust_score < $3),
                updated_at = NOW()
            FROM prev
            WHERE u.id = $1
            RETURNING u.is_banned, prev.is_banned
            "#,
        )
        .bind(user_id)
        .bind(BAN_WARNING_THRESHOLD)
        .bind(BAN_TRUST_FLOOR)
        .fetch_optional(&self.db_pool)
        .await?;

        let newly_banned = match row {
            Some((banned_now, banned_before)) => banned_now && !banned_before,
            None => false,
        };

        if newly_banned {
            tracing::warn!(user_id = %user_id, "Seller banned after repeated warnings");
        }

        Ok(newly_banned)
    }
}
