//! Escrow service layer - the transaction state machine
//!
//! Every status transition is a guarded UPDATE on the current status
//! (compare-and-set); zero rows affected means a concurrent caller already
//! applied a terminal transition. Duplicate gateway deliveries resolve as
//! no-ops, actor-conflict races surface INVALID_STATUS to the loser.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::coupon::{ensure_purchasable, Coupon, CouponService};
use crate::error::{ApiError, ApiResult};
use crate::escrow::{PaymentStatus, Transaction};
use crate::notification::NotificationService;
use crate::reputation::{
    ReputationService, TRUST_PENALTY_ON_DISPUTE, TRUST_REWARD_ON_RELEASE,
};

/// Escrow service for managing the transaction lifecycle
pub struct EscrowService {
    db_pool: PgPool,
    coupons: CouponService,
    reputation: ReputationService,
    notifier: NotificationService,
    /// Buyer verification window for direct purchases, minutes
    verification_window_minutes: i64,
}

impl EscrowService {
    pub fn new(
        db_pool: PgPool,
        coupons: CouponService,
        reputation: ReputationService,
        notifier: NotificationService,
        verification_window_minutes: i64,
    ) -> Self {
        Self {
            db_pool,
            coupons,
            reputation,
            notifier,
            verification_window_minutes,
        }
    }

    /// Get a single transaction by ID
    pub async fn get_transaction(&self, id: Uuid) -> ApiResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(tx)
    }

    /// List transactions where the user is buyer or seller, newest first
    pub async fn list_for_user(&self, user_id: Uuid) -> ApiResult<Vec<Transaction>> {
        let txs = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE buyer_id = $1 OR seller_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(txs)
    }

    /// Find the open (pending/processing/holding) transaction for a coupon,
    /// if any
    pub async fn find_active_for_coupon(&self, coupon_id: Uuid) -> ApiResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE coupon_id = $1
              AND payment_status IN ('pending', 'processing', 'holding')
            LIMIT 1
            "#,
        )
        .bind(coupon_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(tx)
    }

    /// Reject a purchase when an open transaction exists for the coupon.
    ///
    /// An expired never-funded order (pending/processing past its window) is
    /// deleted instead, letting the buyer retry; that is the only case in
    /// which a transaction row is ever physically removed.
    pub(crate) async fn guard_no_active_transaction(
        &self,
        coupon_id: Uuid,
        buyer_id: Uuid,
    ) -> ApiResult<()> {
        let Some(active) = self.find_active_for_coupon(coupon_id).await? else {
            return Ok(());
        };

        let now = Utc::now();
        let never_funded = matches!(
            active.payment_status,
            PaymentStatus::Pending | PaymentStatus::Processing
        );

        if never_funded && active.expires_at <= now {
            sqlx::query("DELETE FROM transactions WHERE id = $1 AND payment_status = $2")
                .bind(active.id)
                .bind(active.payment_status)
                .execute(&self.db_pool)
                .await?;

            tracing::info!(
                transaction_id = %active.id,
                coupon_id = %coupon_id,
                "Superseded expired unfunded order"
            );
            return Ok(());
        }

        let message = if active.buyer_id == buyer_id {
            "You already have a payment in progress for this coupon"
        } else {
            "Another buyer is completing payment for this coupon"
        };
        Err(ApiError::PaymentInProgress(message.to_string()))
    }

    /// Direct escrow purchase: insert a holding transaction, reserve the
    /// coupon for the buyer, and open the verification window.
    pub async fn create_purchase(
        &self,
        buyer_id: Uuid,
        coupon_id: Uuid,
    ) -> ApiResult<(Transaction, Coupon)> {
        let coupon = self
            .get_coupon_checked(coupon_id)
            .await?;
        ensure_purchasable(&coupon, buyer_id, Utc::now())?;
        self.guard_no_active_transaction(coupon_id, buyer_id).await?;

        let expires_at = Utc::now() + Duration::minutes(self.verification_window_minutes);

        let tx = self
            .insert_transaction(
                buyer_id,
                &coupon,
                PaymentStatus::Holding,
                expires_at,
                None,
            )
            .await?;

        // Reserve the coupon; losing this guarded write means another
        // purchase won the race, so roll the fresh row back out.
        if let Err(e) = self.coupons.reserve_for_buyer(coupon_id, buyer_id).await {
            sqlx::query("DELETE FROM transactions WHERE id = $1")
                .bind(tx.id)
                .execute(&self.db_pool)
                .await?;
            return Err(e);
        }

        self.increment_lifetime_counters(buyer_id, coupon.seller_id)
            .await?;

        self.notifier
            .notify(
                buyer_id,
                "purchase",
                &format!(
                    "You purchased '{}'. Confirm the code works within {} minutes or it will be auto-confirmed.",
                    coupon.title, self.verification_window_minutes
                ),
            )
            .await;
        self.notifier
            .notify(
                coupon.seller_id,
                "sale",
                &format!("Your coupon '{}' was purchased. Funds are held in escrow.", coupon.title),
            )
            .await;

        tracing::info!(
            transaction_id = %tx.id,
            coupon_id = %coupon_id,
            buyer_id = %buyer_id,
            "Escrow purchase created"
        );

        Ok((tx, coupon))
    }

    /// Buyer confirms the coupon code works; funds release to the seller
    pub async fn confirm(&self, tx_id: Uuid, actor: Uuid) -> ApiResult<Transaction> {
        let tx = self.get_transaction_checked(tx_id).await?;

        if tx.buyer_id != actor {
            return Err(ApiError::Forbidden);
        }
        if tx.payment_status != PaymentStatus::Holding {
            return Err(ApiError::InvalidStatus);
        }
        if Utc::now() >= tx.expires_at {
            return Err(ApiError::TransactionExpired);
        }

        let released = self
            .release_holding(tx_id, true)
            .await?
            .ok_or(ApiError::InvalidStatus)?;

        self.apply_release_side_effects(&released, false).await?;

        Ok(released)
    }

    /// Buyer disputes a non-working code; funds refund and the seller is
    /// penalized
    pub async fn dispute(&self, tx_id: Uuid, actor: Uuid, reason: &str) -> ApiResult<Transaction> {
        if reason.trim().is_empty() {
            return Err(ApiError::ValidationError(
                "disputeReason is required".to_string(),
            ));
        }

        let tx = self.get_transaction_checked(tx_id).await?;

        if tx.buyer_id != actor {
            return Err(ApiError::Forbidden);
        }
        if tx.payment_status != PaymentStatus::Holding {
            return Err(ApiError::InvalidStatus);
        }
        if Utc::now() >= tx.expires_at {
            return Err(ApiError::TransactionExpired);
        }

        let refunded = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET payment_status = 'refunded', dispute_reason = $2, completed_at = NOW()
            WHERE id = $1 AND payment_status = 'holding'
            RETURNING *
            "#,
        )
        .bind(tx_id)
        .bind(reason)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(ApiError::InvalidStatus)?;

        self.apply_refund_side_effects(&refunded, true, "Your dispute was accepted and the payment refunded")
            .await?;

        tracing::info!(transaction_id = %tx_id, "Transaction disputed and refunded");

        Ok(refunded)
    }

    /// System-initiated release, invoked only by the expiry sweep once the
    /// verification window lapses. A miss on the status guard means a buyer
    /// action raced it; that is a silent no-op, never an error.
    pub async fn auto_confirm(&self, tx_id: Uuid) -> ApiResult<Option<Transaction>> {
        let Some(released) = self.release_holding(tx_id, false).await? else {
            tracing::debug!(
                transaction_id = %tx_id,
                "auto_confirm skipped: transaction no longer holding"
            );
            return Ok(None);
        };

        self.apply_release_side_effects(&released, true).await?;

        tracing::info!(transaction_id = %tx_id, "Transaction auto-confirmed after timeout");

        Ok(Some(released))
    }

    /// Gateway payment captured (verify call or webhook): pending order
    /// becomes a completed sale and the coupon is finalized. A miss on the
    /// status guard means this delivery is a duplicate.
    pub async fn complete_gateway_payment(
        &self,
        tx: &Transaction,
        payment_ref: &str,
    ) -> ApiResult<Transaction> {
        let completed = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET payment_status = 'completed', external_payment_ref = $2, completed_at = NOW()
            WHERE id = $1 AND payment_status IN ('pending', 'processing')
            RETURNING *
            "#,
        )
        .bind(tx.id)
        .bind(payment_ref)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(ApiError::AlreadyProcessed)?;

        self.coupons
            .finalize_sold(completed.coupon_id, completed.buyer_id)
            .await?;
        self.increment_lifetime_counters(completed.buyer_id, completed.seller_id)
            .await?;

        self.notifier
            .notify(
                completed.buyer_id,
                "purchase",
                "Payment received. Your coupon code is now available.",
            )
            .await;
        self.notifier
            .notify(completed.seller_id, "sale", "Your coupon was sold.")
            .await;

        tracing::info!(
            transaction_id = %completed.id,
            payment_ref = %payment_ref,
            "Gateway payment completed"
        );

        Ok(completed)
    }

    /// Gateway reported the payment failed: the order terminates and the
    /// coupon stays available (it was never finalized). No-op when the
    /// transaction already left the unfunded states.
    pub async fn fail_gateway_payment(&self, tx: &Transaction) -> ApiResult<Option<Transaction>> {
        let failed = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET payment_status = 'failed', completed_at = NOW()
            WHERE id = $1 AND payment_status IN ('pending', 'processing')
            RETURNING *
            "#,
        )
        .bind(tx.id)
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(failed) = &failed {
            self.notifier
                .notify(
                    failed.buyer_id,
                    "payment_failed",
                    "Your payment could not be completed. You were not charged.",
                )
                .await;
            tracing::info!(transaction_id = %failed.id, "Gateway payment failed");
        }

        Ok(failed)
    }

    /// Buyer-initiated refund confirmed by the gateway: refund the
    /// transaction WITH the seller trust penalty, mirroring a dispute.
    pub async fn refund_initiated(
        &self,
        tx: &Transaction,
        refund_ref: &str,
        reason: &str,
    ) -> ApiResult<Transaction> {
        let refunded = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET payment_status = 'refunded', external_refund_ref = $2,
                dispute_reason = $3, completed_at = NOW()
            WHERE id = $1 AND payment_status IN ('completed', 'released')
            RETURNING *
            "#,
        )
        .bind(tx.id)
        .bind(refund_ref)
        .bind(reason)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(ApiError::AlreadyRefunded)?;

        self.apply_refund_side_effects(&refunded, true, "Your refund was processed")
            .await?;

        tracing::info!(
            transaction_id = %refunded.id,
            refund_ref = %refund_ref,
            "Buyer-initiated refund applied"
        );

        Ok(refunded)
    }

    /// Refund driven by a gateway webhook event. Same data effect as a
    /// dispute but carries no human reason and applies no trust penalty.
    /// No-op when already refunded.
    pub async fn refund_via_gateway(
        &self,
        tx: &Transaction,
        refund_ref: &str,
    ) -> ApiResult<Option<Transaction>> {
        let refunded = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET payment_status = 'refunded', external_refund_ref = $2, completed_at = NOW()
            WHERE id = $1 AND payment_status IN ('pending', 'processing', 'holding', 'completed', 'released')
            RETURNING *
            "#,
        )
        .bind(tx.id)
        .bind(refund_ref)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some(refunded) = refunded else {
            tracing::debug!(
                transaction_id = %tx.id,
                "refund_via_gateway skipped: transaction already terminal"
            );
            return Ok(None);
        };

        self.apply_refund_side_effects(&refunded, false, "Your payment was refunded by the gateway")
            .await?;

        tracing::info!(
            transaction_id = %refunded.id,
            refund_ref = %refund_ref,
            "Gateway-initiated refund applied"
        );

        Ok(Some(refunded))
    }

    // ===== Sweep queries =====

    /// Holding transactions whose verification window ends within the
    /// lookahead (and is still in the future)
    pub async fn holding_expiring_within(
        &self,
        lookahead_minutes: i64,
    ) -> ApiResult<Vec<Transaction>> {
        let txs = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE payment_status = 'holding'
              AND expires_at > NOW()
              AND expires_at <= NOW() + ($1 * INTERVAL '1 minute')
            "#,
        )
        .bind(lookahead_minutes)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(txs)
    }

    /// Holding transactions whose verification window has already lapsed
    pub async fn holding_expired(&self) -> ApiResult<Vec<Transaction>> {
        let txs = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE payment_status = 'holding' AND expires_at <= NOW()",
        )
        .fetch_all(&self.db_pool)
        .await?;

        Ok(txs)
    }

    /// One-time pre-expiry warning to the buyer
    pub async fn warn_expiring(&self, tx: &Transaction) {
        let minutes_left = (tx.expires_at - Utc::now()).num_minutes().max(0);
        self.notifier
            .notify(
                tx.buyer_id,
                "expiry_warning",
                &format!(
                    "Your purchase will be auto-confirmed in about {} minute(s). Confirm or dispute it now.",
                    minutes_left
                ),
            )
            .await;
    }

    // ===== Helpers =====

    async fn get_coupon_checked(&self, coupon_id: Uuid) -> ApiResult<Coupon> {
        self.coupons
            .get_coupon(coupon_id)
            .await?
            .ok_or(ApiError::CouponNotFound)
    }

    async fn get_transaction_checked(&self, tx_id: Uuid) -> ApiResult<Transaction> {
        self.get_transaction(tx_id)
            .await?
            .ok_or(ApiError::TransactionNotFound)
    }

    /// Insert a new transaction row. A violation of the one-active-
    /// transaction-per-coupon index maps to PAYMENT_IN_PROGRESS.
    pub(crate) async fn insert_transaction(
        &self,
        buyer_id: Uuid,
        coupon: &Coupon,
        status: PaymentStatus,
        expires_at: DateTime<Utc>,
        external_order_ref: Option<&str>,
    ) -> ApiResult<Transaction> {
        let result = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (
                buyer_id, seller_id, coupon_id, amount,
                external_order_ref, payment_status, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(buyer_id)
        .bind(coupon.seller_id)
        .bind(coupon.id)
        .bind(coupon.price)
        .bind(external_order_ref)
        .bind(status)
        .bind(expires_at)
        .fetch_one(&self.db_pool)
        .await;

        result.map_err(|e| {
            let is_active_conflict = e
                .as_database_error()
                .and_then(|db| db.constraint())
                .map(|c| c == "idx_transactions_active_coupon")
                .unwrap_or(false);

            if is_active_conflict {
                ApiError::PaymentInProgress(
                    "Another buyer is completing payment for this coupon".to_string(),
                )
            } else {
                e.into()
            }
        })
    }

    /// CAS holding -> released
    async fn release_holding(
        &self,
        tx_id: Uuid,
        buyer_confirmed: bool,
    ) -> ApiResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET payment_status = 'released', buyer_confirmed = $2, completed_at = NOW()
            WHERE id = $1 AND payment_status = 'holding'
            RETURNING *
            "#,
        )
        .bind(tx_id)
        .bind(buyer_confirmed)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(tx)
    }

    /// Coupon finalization, seller reward, and notifications after a release
    async fn apply_release_side_effects(
        &self,
        tx: &Transaction,
        system_initiated: bool,
    ) -> ApiResult<()> {
        self.coupons.mark_status_sold(tx.coupon_id).await?;
        self.reputation
            .increase_trust(tx.seller_id, TRUST_REWARD_ON_RELEASE)
            .await?;

        if system_initiated {
            self.notifier
                .notify(
                    tx.buyer_id,
                    "auto_confirm",
                    "Your purchase was auto-confirmed due to timeout.",
                )
                .await;
            self.notifier
                .notify(
                    tx.seller_id,
                    "auto_confirm",
                    "A sale was auto-confirmed due to timeout. Funds have been released.",
                )
                .await;
        } else {
            self.notifier
                .notify(tx.buyer_id, "confirm", "Purchase confirmed. Enjoy your coupon!")
                .await;
            self.notifier
                .notify(
                    tx.seller_id,
                    "confirm",
                    "The buyer confirmed your coupon. Funds have been released.",
                )
                .await;
        }

        Ok(())
    }

    /// Coupon reversal, optional seller penalty, and notifications after a
    /// refund. The warning is recorded before the trust delta so the ban
    /// rule evaluates the pre-penalty score.
    async fn apply_refund_side_effects(
        &self,
        tx: &Transaction,
        penalize_seller: bool,
        buyer_message: &str,
    ) -> ApiResult<()> {
        self.coupons.revert_to_available(tx.coupon_id).await?;

        let mut newly_banned = false;
        if penalize_seller {
            newly_banned = self.reputation.record_warning(tx.seller_id).await?;
            self.reputation
                .decrease_trust(tx.seller_id, TRUST_PENALTY_ON_DISPUTE)
                .await?;
        }

        self.notifier.notify(tx.buyer_id, "refund", buyer_message).await;
        self.notifier
            .notify(
                tx.seller_id,
                "dispute",
                "A sale was refunded to the buyer and the coupon relisted.",
            )
            .await;

        if newly_banned {
            self.notifier
                .notify(
                    tx.seller_id,
                    "ban",
                    "Your account has been banned after repeated disputes.",
                )
                .await;
        }

        Ok(())
    }

    async fn increment_lifetime_counters(&self, buyer_id: Uuid, seller_id: Uuid) -> ApiResult<()> {
        sqlx::query(
            "UPDATE users SET total_purchases = total_purchases + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(buyer_id)
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "UPDATE users SET total_sales = total_sales + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(seller_id)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}
