//! Per-key exponential backoff for failed reconciles.

use std::collections::HashMap;
use std::time::Duration;

use registrar_core::ObjectKey;
use serde::{Deserialize, Serialize};

use crate::config::serde_duration;
use crate::error::{Error, Result};

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    #[serde(with = "serde_duration::millis", default = "default_initial_delay")]
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    #[serde(with = "serde_duration::millis", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Add up to 25% random jitter.
    #[serde(default)]
    pub jitter: bool,
}

const fn default_initial_delay() -> Duration {
    Duration::from_millis(5)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(1000)
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Set the delay after the first failure.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check the policy is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero initial delay, a cap below
    /// the initial delay, or a multiplier below 1.
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("backoff.initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config(
                "backoff.max_delay must be >= backoff.initial_delay",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::invalid_config("backoff.multiplier must be >= 1.0"));
        }
        Ok(())
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// Zero failures means no delay.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let jittered = if self.jitter {
            base * (1.0 + simple_random() * 0.25)
        } else {
            base
        };
        let capped = jittered.min(self.max_delay.as_secs_f64());

        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}

/// Consecutive failure counts per key.
#[derive(Debug, Default)]
pub struct FailureTracker {
    failures: HashMap<ObjectKey, u32>,
}

impl FailureTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `key` and return the delay before its retry.
    pub fn record_failure(&mut self, key: &ObjectKey, policy: &BackoffPolicy) -> Duration {
        let count = self.failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        policy.delay_for(*count)
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Reset `key` after a success.
    pub fn forget(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }
}

/// Simple pseudo-random number generator for jitter.
/// Returns a value between 0.0 and 1.0.
#[allow(clippy::cast_precision_loss)]
fn simple_random() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::SystemTime;

    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash as f64) / (u64::MAX as f64)
}
