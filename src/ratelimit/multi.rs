//! Multi-window rate limiter.
//!
//! Chains several limiters into one. A wait succeeds only once every limiter
//! in the chain has granted a token, so "5 per second AND 100 per hour" is
//! expressed as two token buckets behind one `MultiLimiter`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::Limiter;
use super::bucket::TokenBucket;
use super::rate::{LimiterSpec, Rate};
use crate::context::WaitContext;
use crate::error::{Result, TurnstileError};

/// A limiter that satisfies all of its constituent limiters.
///
/// Limiters are sorted by ascending rate when the chain is built and waited
/// on in that order. The most restrictive limiter goes first so a wait that
/// is going to block or be cancelled does so before any token is taken from
/// the looser limiters. Tokens already taken when a later limiter fails are
/// not given back.
pub struct MultiLimiter {
    /// Constituent limiters, most restrictive first
    limiters: Vec<Arc<dyn Limiter>>,
}

impl std::fmt::Debug for MultiLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiLimiter")
            .field("limits", &self.limits())
            .finish()
    }
}

impl MultiLimiter {
    /// Build a token bucket for each spec and chain them.
    ///
    /// Fails with `InvalidConfig` when `specs` is empty or any spec has a
    /// zero event count or window.
    pub fn new(specs: &[LimiterSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(TurnstileError::InvalidConfig(
                "at least one limiter spec is required".to_string(),
            ));
        }

        let limiters = specs
            .iter()
            .map(|spec| {
                spec.validate()?;
                let bucket = TokenBucket::new(spec.rate(), spec.burst)?;
                Ok(Arc::new(bucket) as Arc<dyn Limiter>)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_limiters(limiters)
    }

    /// Chain pre-built limiters.
    pub fn from_limiters(mut limiters: Vec<Arc<dyn Limiter>>) -> Result<Self> {
        if limiters.is_empty() {
            return Err(TurnstileError::InvalidConfig(
                "at least one limiter is required".to_string(),
            ));
        }

        limiters.sort_by_key(|limiter| limiter.limit());

        let multi = Self { limiters };
        debug!(
            limiters = multi.len(),
            effective_limit = %multi.limit(),
            "Created multi-window rate limiter"
        );
        Ok(multi)
    }

    /// Wait on each limiter in turn, most restrictive first.
    ///
    /// The first failure aborts the chain and is returned unchanged.
    pub async fn wait(&self, ctx: &WaitContext) -> Result<()> {
        for (position, limiter) in self.limiters.iter().enumerate() {
            trace!(
                position = position,
                limit = %limiter.limit(),
                "Waiting on limiter"
            );
            limiter.wait(ctx).await?;
        }
        Ok(())
    }

    /// The most restrictive rate in the chain.
    pub fn limit(&self) -> Rate {
        self.limiters[0].limit()
    }

    /// Rates of all limiters, in the order they are waited on.
    pub fn limits(&self) -> Vec<Rate> {
        self.limiters.iter().map(|limiter| limiter.limit()).collect()
    }

    /// Number of limiters in the chain.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Always `false`: a chain cannot be built empty.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[async_trait]
impl Limiter for MultiLimiter {
    async fn wait(&self, ctx: &WaitContext) -> Result<()> {
        MultiLimiter::wait(self, ctx).await
    }

    fn limit(&self) -> Rate {
        MultiLimiter::limit(self)
    }
}
