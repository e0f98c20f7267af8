//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::Config;
use crate::escrow::EscrowService;
use crate::payment::PaymentService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub escrow_service: Arc<EscrowService>,
    pub payment_service: Arc<PaymentService>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        escrow_service: Arc<EscrowService>,
        payment_service: Arc<PaymentService>,
    ) -> Self {
        Self {
            config,
            escrow_service,
            payment_service,
        }
    }
}

// Arc<Config> is pulled out by the auth extractor.
impl FromRef<AppState> for Arc<Config> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}
