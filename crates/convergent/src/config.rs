//! Convergence defaults.
//!
//! Every new instance is seeded from a [`ConvergeConfig`]. Builder calls on
//! an instance override individual values afterwards.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::result::{ConvergeError, ConvergeResult};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default convergence budget (2 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default cadence between predicate invocations (10ms)
pub const DEFAULT_INTERVAL_MS: u64 = 10;

/// Default number of consecutive passing ticks required
pub const DEFAULT_RELIABILITY: u32 = 1;

/// Floor for the default window of a non-trailing `always` step
pub const MIN_ALWAYS_MS: u64 = 20;

/// Fraction of the total budget given to a non-trailing `always` step
pub const ALWAYS_DIVISOR: u32 = 10;

// =============================================================================
// CONFIG
// =============================================================================

/// Convergence configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergeConfig {
    /// Total budget in milliseconds
    pub timeout_ms: u64,
    /// Poll cadence in milliseconds
    pub interval_ms: u64,
    /// Consecutive passing ticks required before a `when` resolves
    pub reliability: u32,
    /// Minimum default window for `always` steps, in milliseconds
    pub min_always_ms: u64,
    /// Divisor applied to the budget for default `always` windows
    pub always_divisor: u32,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            interval_ms: DEFAULT_INTERVAL_MS,
            reliability: DEFAULT_RELIABILITY,
            min_always_ms: MIN_ALWAYS_MS,
            always_divisor: ALWAYS_DIVISOR,
        }
    }
}

impl ConvergeConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total budget
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the poll cadence
    #[must_use]
    pub const fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Set the reliability
    #[must_use]
    pub const fn with_reliability(mut self, reliability: u32) -> Self {
        self.reliability = reliability;
        self
    }

    /// Set the floor for default `always` windows
    #[must_use]
    pub const fn with_min_always(mut self, min_always_ms: u64) -> Self {
        self.min_always_ms = min_always_ms;
        self
    }

    /// Get the budget as a Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get the cadence as a Duration
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Window given to an `always` step with no explicit duration that is
    /// not the last step in its queue: `max(total / divisor, min_always)`.
    #[must_use]
    pub fn default_always_window(&self, total: Duration) -> Duration {
        let share = total / self.always_divisor.max(1);
        share.max(Duration::from_millis(self.min_always_ms))
    }

    /// Check the config for values the poll loop cannot work with
    pub fn validate(&self) -> ConvergeResult<()> {
        if self.interval_ms == 0 {
            return Err(ConvergeError::config("interval_ms must be greater than zero"));
        }
        if self.reliability == 0 {
            return Err(ConvergeError::config("reliability must be at least 1"));
        }
        if self.always_divisor == 0 {
            return Err(ConvergeError::config("always_divisor must be at least 1"));
        }
        Ok(())
    }

    /// Load a config from YAML; missing keys keep their defaults
    pub fn from_yaml(yaml: &str) -> ConvergeResult<Self> {
        let config: Self =
            serde_yaml_ng::from_str(yaml).map_err(|e| ConvergeError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the config to YAML
    pub fn to_yaml(&self) -> ConvergeResult<String> {
        serde_yaml_ng::to_string(self).map_err(|e| ConvergeError::config(e.to_string()))
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
