//! Configuration management for turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::monitor::SweepConfig;
use crate::ratelimit::{LimiterSpec, MultiLimiter};

/// Main configuration for turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Rate windows enforced together by one multi-limiter
    #[serde(default)]
    pub limits: Vec<LimitConfig>,

    /// Request counter configuration
    #[serde(default)]
    pub counters: CounterConfig,
}

/// One rate window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Events allowed per window
    pub event_count: u32,

    /// Window length in milliseconds
    pub window_ms: u64,

    /// Maximum instantaneous burst
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_burst() -> u32 {
    1
}

impl LimitConfig {
    /// Convert to a limiter spec.
    pub fn to_spec(&self) -> LimiterSpec {
        LimiterSpec::new(
            self.event_count,
            Duration::from_millis(self.window_ms),
            self.burst,
        )
    }
}

/// Request counter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Sweep interval in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Idle time before a counter is evicted, in milliseconds
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: u64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            stale_after_ms: default_stale_after(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60_000
}

fn default_stale_after() -> u64 {
    600_000
}

impl CounterConfig {
    /// Validated sweep settings.
    pub fn sweep_config(&self) -> Result<SweepConfig> {
        SweepConfig::new(
            Duration::from_millis(self.sweep_interval_ms),
            Duration::from_millis(self.stale_after_ms),
        )
    }
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading turnstile configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    /// Limiter specs for every configured window.
    pub fn limiter_specs(&self) -> Vec<LimiterSpec> {
        self.limits.iter().map(LimitConfig::to_spec).collect()
    }

    /// Build the multi-limiter described by `limits`.
    pub fn build_limiter(&self) -> Result<MultiLimiter> {
        MultiLimiter::new(&self.limiter_specs())
    }
}
