//! Escrow transaction API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::escrow::{CreatePurchaseRequest, DisputeRequest, PurchaseResponse, Transaction};
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

/// Direct escrow purchase; reveals the coupon code and opens the
/// verification window
pub async fn create_transaction(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreatePurchaseRequest>,
) -> ApiResult<(StatusCode, Json<PurchaseResponse>)> {
    let (transaction, coupon) = app_state
        .escrow_service
        .create_purchase(user.user_id, request.coupon_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PurchaseResponse {
            transaction,
            coupon_code: coupon.code,
        }),
    ))
}

/// Buyer confirms the purchased code works
pub async fn confirm_transaction(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Transaction>> {
    let transaction = app_state.escrow_service.confirm(id, user.user_id).await?;

    Ok(Json(transaction))
}

/// Buyer disputes a non-working code
pub async fn dispute_transaction(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<DisputeRequest>,
) -> ApiResult<Json<Transaction>> {
    request.validate()?;

    let transaction = app_state
        .escrow_service
        .dispute(id, user.user_id, &request.dispute_reason)
        .await?;

    Ok(Json(transaction))
}

/// List the authenticated user's transactions, as buyer or seller
pub async fn list_transactions(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<Vec<Transaction>>> {
    let transactions = app_state
        .escrow_service
        .list_for_user(user.user_id)
        .await?;

    Ok(Json(transactions))
}
