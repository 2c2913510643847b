//! Token bucket limiter.
//!
//! A single-window limiter: the bucket holds up to `burst` tokens and refills
//! continuously at its configured rate. Waiting callers reserve a token ahead
//! of time, which may drive the balance negative, and then sleep until their
//! reservation matures. Reservations are never refunded.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::Limiter;
use super::rate::Rate;
use crate::context::{far_future, WaitContext};
use crate::error::{Result, TurnstileError};

/// Mutable bucket state, guarded by the bucket's lock.
#[derive(Debug)]
struct BucketState {
    /// Token balance as of `last`; negative while reservations are pending
    tokens: f64,
    /// When `tokens` was last brought up to date
    last: Instant,
}

/// A thread-safe token bucket supporting blocking acquisition.
#[derive(Debug)]
pub struct TokenBucket {
    /// Refill rate
    rate: Rate,
    /// Configured burst size
    burst: u32,
    /// Bucket state
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket refilling at `rate` with room for `burst` tokens.
    ///
    /// A burst of 0 is treated as 1 so that the bucket can still admit
    /// events at its rate.
    pub fn new(rate: Rate, burst: u32) -> Result<Self> {
        if !rate.is_usable() {
            return Err(TurnstileError::InvalidConfig(format!(
                "token bucket rate must be positive and finite, got {}",
                rate
            )));
        }

        Ok(Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: f64::from(burst.max(1)),
                last: Instant::now(),
            }),
        })
    }

    /// The configured burst size.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// The configured refill rate.
    pub fn limit(&self) -> Rate {
        self.rate
    }

    /// Current token balance. Negative while waiters hold reservations.
    pub fn available(&self) -> f64 {
        let state = self.state.lock();
        self.advance(&state, Instant::now())
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let tokens = self.advance(&state, now);

        if tokens >= 1.0 {
            state.tokens = tokens - 1.0;
            state.last = now;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available.
    ///
    /// Fails immediately with `DeadlineExceeded` when the token could not be
    /// granted before `ctx`'s deadline; nothing is reserved in that case.
    pub async fn wait(&self, ctx: &WaitContext) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let ready_at = match self.reserve(ctx.deadline()) {
            Some(ready_at) => ready_at,
            None => {
                debug!(
                    rate = %self.rate,
                    "Token would not be available before the deadline"
                );
                return Err(TurnstileError::DeadlineExceeded);
            }
        };

        if ready_at <= Instant::now() {
            return Ok(());
        }

        trace!(
            rate = %self.rate,
            delay_ms = u64::try_from(ready_at.saturating_duration_since(Instant::now()).as_millis())
                .unwrap_or(u64::MAX),
            "Waiting for token"
        );

        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(ready_at) => Ok(()),
            err = ctx.done() => {
                debug!(rate = %self.rate, error = %err, "Token wait aborted");
                Err(err)
            }
        }
    }

    /// Reserve one token, returning when it may be used.
    ///
    /// Returns `None` without reserving if that moment is after `deadline`.
    fn reserve(&self, deadline: Option<Instant>) -> Option<Instant> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let tokens = self.advance(&state, now) - 1.0;

        let delay = if tokens < 0.0 {
            Duration::try_from_secs_f64(-tokens / self.rate.as_per_second())
                .unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        let ready_at = now.checked_add(delay).unwrap_or_else(far_future);

        if let Some(deadline) = deadline {
            if ready_at > deadline {
                return None;
            }
        }

        state.tokens = tokens;
        state.last = now;
        Some(ready_at)
    }

    /// Token balance at `now`, refilled since the last update.
    fn advance(&self, state: &BucketState, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        let refilled = state.tokens + elapsed * self.rate.as_per_second();
        refilled.min(self.capacity())
    }

    fn capacity(&self) -> f64 {
        f64::from(self.burst.max(1))
    }
}

#[async_trait]
impl Limiter for TokenBucket {
    async fn wait(&self, ctx: &WaitContext) -> Result<()> {
        TokenBucket::wait(self, ctx).await
    }

    fn limit(&self) -> Rate {
        self.rate
    }
}
