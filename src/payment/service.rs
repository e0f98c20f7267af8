//! Payment reconciliation service
//!
//! Bridges the gateway's async order/callback world and the escrow state
//! machine: order creation, signature-verified completion (verify call and
//! webhook), and refund initiation. All transaction mutation is delegated to
//! the escrow service so the two entry paths share one set of legal
//! transitions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::coupon::{ensure_purchasable, CouponService};
use crate::error::{ApiError, ApiResult};
use crate::escrow::{EscrowService, PaymentStatus, Transaction};
use crate::payment::gateway::{
    verify_payment_signature, verify_webhook_signature, PaymentGateway,
};
use crate::payment::{
    CreateOrderResponse, RefundResponse, VerifyPaymentRequest, VerifyPaymentResponse,
    WebhookEvent,
};

/// Default dispute reason recorded for buyer-initiated refunds with no text
const DEFAULT_REFUND_REASON: &str = "Refund requested by buyer";

pub struct PaymentService {
    db_pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    escrow_service: Arc<EscrowService>,
    coupons: CouponService,
    currency: String,
    /// How long a created order may stay pending, minutes
    order_pending_window_minutes: i64,
    /// HMAC secret for the client-side verify signature
    client_secret: String,
    /// HMAC secret for webhook signatures (distinct from the client secret)
    webhook_secret: String,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        escrow_service: Arc<EscrowService>,
        coupons: CouponService,
        currency: String,
        order_pending_window_minutes: i64,
        client_secret: String,
        webhook_secret: String,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            escrow_service,
            coupons,
            currency,
            order_pending_window_minutes,
            client_secret,
            webhook_secret,
        }
    }

    /// Create a gateway order for a coupon purchase.
    ///
    /// The coupon is NOT reserved here; the active-transaction check guards
    /// it until verify time.
    pub async fn create_order(
        &self,
        buyer_id: Uuid,
        coupon_id: Option<Uuid>,
    ) -> ApiResult<CreateOrderResponse> {
        let coupon_id = coupon_id.ok_or(ApiError::MissingCouponId)?;

        let coupon = self
            .coupons
            .get_coupon(coupon_id)
            .await?
            .ok_or(ApiError::CouponNotFound)?;
        ensure_purchasable(&coupon, buyer_id, Utc::now())?;
        self.escrow_service
            .guard_no_active_transaction(coupon_id, buyer_id)
            .await?;

        let order_ref = self
            .gateway
            .create_order(coupon.price, &self.currency, &coupon_id.to_string())
            .await?;

        let expires_at = Utc::now() + Duration::minutes(self.order_pending_window_minutes);
        let tx = self
            .escrow_service
            .insert_transaction(
                buyer_id,
                &coupon,
                PaymentStatus::Pending,
                expires_at,
                Some(&order_ref),
            )
            .await?;

        tracing::info!(
            transaction_id = %tx.id,
            order_ref = %order_ref,
            coupon_id = %coupon_id,
            "Payment order created"
        );

        Ok(CreateOrderResponse {
            order_id: order_ref,
            amount: coupon.price,
            currency: self.currency.clone(),
        })
    }

    /// Synchronous payment verification from the client. Signature mismatch
    /// fails without touching state; duplicate calls on an already-settled
    /// order return ALREADY_PROCESSED.
    pub async fn verify_payment(
        &self,
        buyer_id: Uuid,
        request: VerifyPaymentRequest,
    ) -> ApiResult<VerifyPaymentResponse> {
        let (Some(order_ref), Some(payment_ref), Some(signature)) =
            (request.order_ref, request.payment_ref, request.signature)
        else {
            return Err(ApiError::MissingPaymentDetails);
        };

        if !verify_payment_signature(&order_ref, &payment_ref, &signature, &self.client_secret) {
            return Err(ApiError::InvalidSignature);
        }

        // Primary lookup by order ref; fall back to the buyer's newest
        // unfunded order in case the reference has not propagated yet.
        let tx = match self.find_by_order_ref(&order_ref).await? {
            Some(tx) => tx,
            None => self
                .find_newest_unfunded_for_buyer(buyer_id)
                .await?
                .ok_or(ApiError::TransactionNotFound)?,
        };

        if tx.payment_status.is_terminal() {
            return Err(ApiError::AlreadyProcessed);
        }
        if tx.buyer_id != buyer_id {
            return Err(ApiError::Unauthorized);
        }

        let completed = self
            .escrow_service
            .complete_gateway_payment(&tx, &payment_ref)
            .await?;

        let coupon = self
            .coupons
            .get_coupon(completed.coupon_id)
            .await?
            .ok_or(ApiError::CouponNotFound)?;

        Ok(VerifyPaymentResponse {
            transaction: completed,
            coupon,
        })
    }

    /// Process an inbound gateway webhook.
    ///
    /// Signature failures are client errors; after the signature passes,
    /// every internal processing error is swallowed and logged so the
    /// gateway always receives an acknowledgement.
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> ApiResult<()> {
        let signature = signature.ok_or(ApiError::MissingSignature)?;

        if !verify_webhook_signature(raw_body, signature, &self.webhook_secret) {
            return Err(ApiError::InvalidWebhookSignature);
        }

        let event: WebhookEvent = match serde_json::from_slice(raw_body) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Webhook payload failed to parse; acknowledging anyway");
                return Ok(());
            }
        };

        if let Err(e) = self.dispatch_webhook_event(&event).await {
            tracing::error!(
                event = %event.event,
                error = %e,
                "Webhook event processing failed; acknowledging anyway"
            );
        }

        Ok(())
    }

    /// Buyer-initiated refund of a settled gateway payment. No state is
    /// mutated until the gateway accepts the refund.
    pub async fn initiate_refund(
        &self,
        tx_id: Uuid,
        actor: Uuid,
        reason: Option<String>,
    ) -> ApiResult<RefundResponse> {
        let tx = self
            .escrow_service
            .get_transaction(tx_id)
            .await?
            .ok_or(ApiError::TransactionNotFound)?;

        if tx.buyer_id != actor {
            return Err(ApiError::Unauthorized);
        }
        if tx.payment_status == PaymentStatus::Refunded {
            return Err(ApiError::AlreadyRefunded);
        }
        if !tx.payment_status.is_success() {
            return Err(ApiError::InvalidTransactionStatus);
        }

        let payment_ref = tx
            .external_payment_ref
            .clone()
            .ok_or(ApiError::InvalidTransactionStatus)?;

        let refund_ref = self
            .gateway
            .refund(&payment_ref, tx.amount)
            .await
            .map_err(|e| ApiError::RefundError(e.to_string()))?;

        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REFUND_REASON.to_string());

        let refunded = self
            .escrow_service
            .refund_initiated(&tx, &refund_ref, &reason)
            .await?;

        Ok(RefundResponse {
            refund_ref,
            amount: refunded.amount,
        })
    }

    // ===== Webhook dispatch =====

    async fn dispatch_webhook_event(&self, event: &WebhookEvent) -> ApiResult<()> {
        match event.event.as_str() {
            "payment.captured" => self.on_payment_captured(event).await,
            "payment.failed" => self.on_payment_failed(event).await,
            "refund.processed" => self.on_refund_processed(event).await,
            other => {
                tracing::warn!(event = %other, "Ignoring unknown webhook event kind");
                Ok(())
            }
        }
    }

    async fn on_payment_captured(&self, event: &WebhookEvent) -> ApiResult<()> {
        let Some(tx) = self.find_event_transaction(event).await? else {
            tracing::warn!("payment.captured for unknown order; ignoring");
            return Ok(());
        };

        if tx.payment_status.is_terminal() {
            tracing::debug!(transaction_id = %tx.id, "payment.captured redelivery; no-op");
            return Ok(());
        }

        let Some(payment_ref) = event.payload.payment_ref.as_deref().filter(|r| !r.is_empty())
        else {
            tracing::warn!(
                transaction_id = %tx.id,
                "payment.captured without a payment ref; ignoring"
            );
            return Ok(());
        };

        match self
            .escrow_service
            .complete_gateway_payment(&tx, payment_ref)
            .await
        {
            Ok(_) => Ok(()),
            // Lost a race with the verify endpoint; the payment is settled.
            Err(ApiError::AlreadyProcessed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn on_payment_failed(&self, event: &WebhookEvent) -> ApiResult<()> {
        let Some(tx) = self.find_event_transaction(event).await? else {
            tracing::warn!("payment.failed for unknown order; ignoring");
            return Ok(());
        };

        self.escrow_service.fail_gateway_payment(&tx).await?;
        Ok(())
    }

    async fn on_refund_processed(&self, event: &WebhookEvent) -> ApiResult<()> {
        let Some(tx) = self.find_event_transaction(event).await? else {
            tracing::warn!("refund.processed for unknown order; ignoring");
            return Ok(());
        };

        let Some(refund_ref) = event.payload.refund_ref.as_deref().filter(|r| !r.is_empty())
        else {
            tracing::warn!(
                transaction_id = %tx.id,
                "refund.processed without a refund ref; ignoring"
            );
            return Ok(());
        };

        self.escrow_service
            .refund_via_gateway(&tx, refund_ref)
            .await?;
        Ok(())
    }

    // ===== Lookups =====

    async fn find_by_order_ref(&self, order_ref: &str) -> ApiResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE external_order_ref = $1",
        )
        .bind(order_ref)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(tx)
    }

    async fn find_newest_unfunded_for_buyer(
        &self,
        buyer_id: Uuid,
    ) -> ApiResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE buyer_id = $1 AND payment_status IN ('pending', 'processing')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(buyer_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(tx)
    }

    async fn find_event_transaction(
        &self,
        event: &WebhookEvent,
    ) -> ApiResult<Option<Transaction>> {
        if let Some(order_ref) = event.payload.order_ref.as_deref() {
            if let Some(tx) = self.find_by_order_ref(order_ref).await? {
                return Ok(Some(tx));
            }
        }

        if let Some(payment_ref) = event.payload.payment_ref.as_deref() {
            let tx = sqlx::query_as::<_, Transaction>(
                "SELECT * FROM transactions WHERE external_payment_ref = $1",
            )
            .bind(payment_ref)
            .fetch_optional(&self.db_pool)
            .await?;
            return Ok(tx);
        }

        Ok(None)
    }
}
