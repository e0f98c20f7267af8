//! Centralized API error handling for CouponBay
//!
//! One error enum carries every stable machine-readable code the purchase,
//! payment, and refund flows can return, with HTTP status mapping and a JSON
//! response body. Clients branch on `error.code`, never on message text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    // --- validation (400, never mutates state) ---
    #[error("couponId is required")]
    MissingCouponId,

    #[error("orderRef, paymentRef and signature are required")]
    MissingPaymentDetails,

    #[error("Webhook signature header is required")]
    MissingSignature,

    #[error("Validation error: {0}")]
    ValidationError(String),

    // --- not found (404) ---
    #[error("Coupon not found")]
    CouponNotFound,

    #[error("Transaction not found")]
    TransactionNotFound,

    // --- conflict / state (400) ---
    #[error("Coupon is not approved for sale")]
    CouponNotApproved,

    #[error("Coupon has already been sold")]
    CouponAlreadySold,

    #[error("Coupon has expired")]
    CouponExpired,

    #[error("{0}")]
    PaymentInProgress(String),

    #[error("Payment has already been processed")]
    AlreadyProcessed,

    #[error("Transaction has already been refunded")]
    AlreadyRefunded,

    #[error("Transaction is not in a valid state for this operation")]
    InvalidStatus,

    #[error("Transaction is not in a refundable state")]
    InvalidTransactionStatus,

    #[error("Verification window has expired")]
    TransactionExpired,

    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("Invalid webhook signature")]
    InvalidWebhookSignature,

    // --- authorization ---
    #[error("You are not authorized to act on this transaction")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("You cannot buy your own coupon")]
    CannotBuyOwnCoupon,

    // --- upstream / internal ---
    #[error("Refund could not be processed: {0}")]
    RefundError(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Get the stable error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::MissingCouponId => "MISSING_COUPON_ID",
            ApiError::MissingPaymentDetails => "MISSING_PAYMENT_DETAILS",
            ApiError::MissingSignature => "MISSING_SIGNATURE",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::CouponNotFound => "COUPON_NOT_FOUND",
            ApiError::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            ApiError::CouponNotApproved => "COUPON_NOT_APPROVED",
            ApiError::CouponAlreadySold => "COUPON_ALREADY_SOLD",
            ApiError::CouponExpired => "COUPON_EXPIRED",
            ApiError::PaymentInProgress(_) => "PAYMENT_IN_PROGRESS",
            ApiError::AlreadyProcessed => "ALREADY_PROCESSED",
            ApiError::AlreadyRefunded => "ALREADY_REFUNDED",
            ApiError::InvalidStatus => "INVALID_STATUS",
            ApiError::InvalidTransactionStatus => "INVALID_TRANSACTION_STATUS",
            ApiError::TransactionExpired => "TRANSACTION_EXPIRED",
            ApiError::InvalidSignature => "INVALID_SIGNATURE",
            ApiError::InvalidWebhookSignature => "INVALID_WEBHOOK_SIGNATURE",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::CannotBuyOwnCoupon => "CANNOT_BUY_OWN_COUPON",
            ApiError::RefundError(_) => "REFUND_ERROR",
            ApiError::GatewayError(_) => "GATEWAY_ERROR",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingCouponId
            | ApiError::MissingPaymentDetails
            | ApiError::MissingSignature
            | ApiError::ValidationError(_)
            | ApiError::CouponNotApproved
            | ApiError::CouponAlreadySold
            | ApiError::CouponExpired
            | ApiError::PaymentInProgress(_)
            | ApiError::AlreadyProcessed
            | ApiError::AlreadyRefunded
            | ApiError::InvalidStatus
            | ApiError::InvalidTransactionStatus
            | ApiError::TransactionExpired
            | ApiError::InvalidSignature
            | ApiError::InvalidWebhookSignature => StatusCode::BAD_REQUEST,
            ApiError::CouponNotFound | ApiError::TransactionNotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden | ApiError::CannotBuyOwnCoupon => StatusCode::FORBIDDEN,
            ApiError::RefundError(_) | ApiError::GatewayError(_) => StatusCode::BAD_GATEWAY,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // Log server errors
        match &self {
            ApiError::InternalError(_)
            | ApiError::DatabaseError(_)
            | ApiError::GatewayError(_)
            | ApiError::RefundError(_) => {
                tracing::error!(error = %message, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

// Convenience conversions from common error types

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::TransactionNotFound,
            _ => ApiError::DatabaseError(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::GatewayError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::ValidationError(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;
