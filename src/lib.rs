//! Turnstile - Request Admission Control
//!
//! This crate provides two building blocks a service calls on its hot request
//! path: a [`MultiLimiter`] that enforces several rate windows at once by
//! chaining token buckets, and an [`ExpiringCounterStore`] that counts
//! requests per key and forgets idle keys through a background sweep.

pub mod config;
pub mod context;
pub mod error;
pub mod monitor;
pub mod ratelimit;

pub use context::WaitContext;
pub use error::{Result, TurnstileError};
pub use monitor::{ExpiringCounterStore, SweepConfig, SweepHandle, SweepState};
pub use ratelimit::{Limiter, LimiterSpec, MultiLimiter, Rate, TokenBucket};
