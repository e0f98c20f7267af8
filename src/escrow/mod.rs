//! Escrow domain module
//!
//! The transaction state machine, its models, and the expiry sweep.

mod model;
mod service;
mod sweep;

pub use model::*;
pub use service::EscrowService;
pub use sweep::{expiry_sweep, sweep_tick, SweepConfig};
