//! Route definitions for the CouponBay API

use axum::{routing::post, Router};

use crate::handlers::*;
use crate::state::AppState;

// Payment reconciliation routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/create-order", post(create_order))
        .route("/api/payments/verify", post(verify_payment))
        .route("/api/payments/webhook", post(payment_webhook))
        .route("/api/payments/refund/:transaction_id", post(initiate_refund))
}

// Escrow transaction routes
pub fn transaction_routes() -> Router<AppState> {
    Router::new()
        .route("/api/transactions/create", post(create_transaction))
        .route("/api/transactions/confirm/:id", post(confirm_transaction))
        .route("/api/transactions/dispute/:id", post(dispute_transaction))
        .route("/api/transactions", axum::routing::get(list_transactions))
}
