//! API handlers for the CouponBay server

mod payments;
mod transactions;

pub use payments::*;
pub use transactions::*;
