//! Limiter trait for abstracting single buckets and composed chains.

use async_trait::async_trait;

use super::rate::Rate;
use crate::context::WaitContext;
use crate::error::Result;

/// A limiter that can block until a token is available and report its rate.
///
/// Implementations are responsible for their own thread-safety; `wait` may
/// be called concurrently by many tasks.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Wait until a token is granted, or fail with `Cancelled` /
    /// `DeadlineExceeded` once `ctx` is done.
    async fn wait(&self, ctx: &WaitContext) -> Result<()>;

    /// The configured rate of this limiter.
    fn limit(&self) -> Rate;
}
