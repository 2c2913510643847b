//! Per-key request counting with background expiry.

mod store;
mod sweep;

pub use store::ExpiringCounterStore;
pub use sweep::{SweepConfig, SweepHandle, SweepState};
