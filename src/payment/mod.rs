//! Payment reconciliation module
//!
//! Gateway client, signature verification, and the service that translates
//! gateway order/webhook lifecycle into escrow transitions.

pub mod gateway;
mod model;
mod service;

pub use gateway::{HttpPaymentGateway, MockGateway, PaymentGateway};
pub use model::*;
pub use service::PaymentService;
