//! CouponBay Backend Library
//!
//! Exports the core modules for the CouponBay marketplace backend: the
//! escrow transaction state machine, the payment reconciliation layer, and
//! the expiry sweep, plus their collaborators.

pub mod auth;
pub mod config;
pub mod coupon;
pub mod db;
pub mod error;
pub mod escrow;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod payment;
pub mod reputation;
pub mod routes;
pub mod state;
