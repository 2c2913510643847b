//! Multi-window rate limiting built from token buckets.

mod backend;
mod bucket;
mod multi;
mod rate;

pub use backend::Limiter;
pub use bucket::TokenBucket;
pub use multi::MultiLimiter;
pub use rate::{LimiterSpec, Rate};
