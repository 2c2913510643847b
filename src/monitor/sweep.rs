//! Background sweep configuration and lifecycle.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, TurnstileError};

/// Lifecycle of a store's background sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    /// No sweep has been started yet
    Created,
    /// A sweep is evicting stale entries
    Running,
    /// The sweep received its stop signal and exited
    Stopped,
}

/// How often the sweep runs and how long a key may sit idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    interval: Duration,
    stale_after: Duration,
}

impl SweepConfig {
    /// Create a sweep config.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if either duration is zero.
    pub fn new(interval: Duration, stale_after: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(TurnstileError::InvalidConfig(
                "sweep interval must be greater than 0".to_string(),
            ));
        }
        if stale_after.is_zero() {
            return Err(TurnstileError::InvalidConfig(
                "stale_after must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            interval,
            stale_after,
        })
    }

    /// Time between sweep passes.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Idle time after which an entry is evicted.
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }
}

/// Handle to a sweep running on a background task.
///
/// Dropping the handle stops the sweep.
#[derive(Debug)]
pub struct SweepHandle {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub(super) fn new(stop: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            stop,
            task: Some(task),
        }
    }

    /// Signal the sweep to stop. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Stop the sweep and wait for its task to exit.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Sweep task ended abnormally");
            }
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
