//! Payment reconciliation API handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::AuthenticatedUser;
use crate::payment::{
    CreateOrderRequest, CreateOrderResponse, RefundRequest, RefundResponse, VerifyPaymentRequest,
    VerifyPaymentResponse,
};
use crate::state::AppState;

/// Header carrying the webhook HMAC signature
const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Create a gateway order for a coupon purchase
pub async fn create_order(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<CreateOrderResponse>)> {
    let response = app_state
        .payment_service
        .create_order(user.user_id, request.coupon_id)
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Verify a client-reported payment against its gateway signature
pub async fn verify_payment(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<VerifyPaymentRequest>,
) -> ApiResult<Json<VerifyPaymentResponse>> {
    let response = app_state
        .payment_service
        .verify_payment(user.user_id, request)
        .await?;

    Ok(Json(response))
}

/// Inbound gateway webhook. Unauthenticated; trust comes from the HMAC
/// signature over the raw body. Responds 200 even when event processing
/// fails internally, so the gateway does not retry forever.
pub async fn payment_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    app_state
        .payment_service
        .handle_webhook(&body, signature)
        .await?;

    Ok(StatusCode::OK)
}

/// Buyer-initiated refund of a settled payment
pub async fn initiate_refund(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<Uuid>,
    request: Option<Json<RefundRequest>>,
) -> ApiResult<Json<RefundResponse>> {
    let reason = request.and_then(|Json(r)| r.reason);

    let response = app_state
        .payment_service
        .initiate_refund(transaction_id, user.user_id, reason)
        .await?;

    Ok(Json(response))
}
