//! Rate values and limiter specifications.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// A throughput expressed as events per second.
///
/// Rates are totally ordered so limiters can be sorted by how restrictive
/// they are. Two rates are equal iff their per-second values are equal, so
/// `300 per minute` equals `5 per second`.
#[derive(Debug, Clone, Copy)]
pub struct Rate(f64);

impl Rate {
    /// `event_count` events every `window`.
    pub fn per(event_count: u32, window: Duration) -> Self {
        Self(f64::from(event_count) / window.as_secs_f64())
    }

    /// A rate of `events` per second.
    pub fn per_second(events: f64) -> Self {
        Self(events)
    }

    /// The rate in events per second.
    pub fn as_per_second(&self) -> f64 {
        self.0
    }

    /// Time between two consecutive events at this rate.
    ///
    /// Returns `Duration::MAX` for a rate that never admits anything.
    pub fn interval(&self) -> Duration {
        if self.0 <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64(1.0 / self.0).unwrap_or(Duration::MAX)
    }

    /// Whether this rate can drive a token bucket.
    pub(crate) fn is_usable(&self) -> bool {
        self.0.is_finite() && self.0 > 0.0
    }
}

impl PartialEq for Rate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Rate {}

impl PartialOrd for Rate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s", self.0)
    }
}

/// Describes one rate window: `event_count` events per `window`, admitting
/// at most `burst` events at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSpec {
    /// Events allowed per window
    pub event_count: u32,
    /// Length of the window
    pub window: Duration,
    /// Maximum instantaneous burst
    pub burst: u32,
}

impl LimiterSpec {
    /// Create a new limiter spec.
    pub fn new(event_count: u32, window: Duration, burst: u32) -> Self {
        Self {
            event_count,
            window,
            burst,
        }
    }

    /// Check that the event count and window are positive.
    pub fn validate(&self) -> Result<()> {
        if self.event_count == 0 {
            return Err(TurnstileError::InvalidConfig(
                "event_count must be greater than 0".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(TurnstileError::InvalidConfig(
                "window must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The rate this spec allows.
    pub fn rate(&self) -> Rate {
        Rate::per(self.event_count, self.window)
    }
}
