//! Coupon domain module
//!
//! The purchase-precondition checks and the availability writes the escrow
//! machine performs during the payment lifecycle. Listing, browsing, and
//! admin verification of coupons live in a separate surface.

mod model;
mod service;

pub use model::*;
pub use service::CouponService;
