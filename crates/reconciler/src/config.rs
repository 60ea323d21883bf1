//! Controller configuration.
//!
//! Loaded from a TOML/YAML/JSON file, then overridden by `REGISTRAR_*`
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::controller::LoopConfig;
use crate::error::{Error, Result};
use crate::reconciler::ReconcilerConfig;

/// Environment variable overriding [`ControllerConfig::workers`].
pub const ENV_WORKERS: &str = "REGISTRAR_WORKERS";
/// Environment variable overriding [`ControllerConfig::reconcile_timeout`], in seconds.
pub const ENV_RECONCILE_TIMEOUT_SECS: &str = "REGISTRAR_RECONCILE_TIMEOUT_SECS";
/// Environment variable overriding [`ControllerConfig::resync_period`], in
/// seconds; `0` disables resync.
pub const ENV_RESYNC_SECS: &str = "REGISTRAR_RESYNC_SECS";

/// Settings shared by every controller the binary runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Concurrent reconciles per controller.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Budget for a single reconcile, including all store calls.
    #[serde(with = "serde_duration::secs", default = "default_reconcile_timeout")]
    pub reconcile_timeout: Duration,

    /// Reconcile every object again this long after a success.
    #[serde(with = "serde_duration::opt_secs", default)]
    pub resync_period: Option<Duration>,

    /// Retry policy for failed reconciles.
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

const fn default_workers() -> usize {
    2
}

const fn default_reconcile_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            reconcile_timeout: default_reconcile_timeout(),
            resync_period: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ControllerConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-reconcile timeout.
    #[must_use]
    pub const fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    /// Set the resync period.
    #[must_use]
    pub const fn with_resync_period(mut self, period: Option<Duration>) -> Self {
        self.resync_period = period;
        self
    }

    /// Set the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Load a config file; the format follows the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(registrar_core::config::load_file(path)?)
    }

    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for unparseable values.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `REGISTRAR_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for unparseable values.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.workers = parse_env(ENV_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_RECONCILE_TIMEOUT_SECS) {
            self.reconcile_timeout =
                Duration::from_secs(parse_env(ENV_RECONCILE_TIMEOUT_SECS, &value)?);
        }
        if let Some(value) = lookup(ENV_RESYNC_SECS) {
            let secs: u64 = parse_env(ENV_RESYNC_SECS, &value)?;
            self.resync_period = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(self)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.loop_config().validate()?;
        if self.resync_period.is_some_and(|period| period.is_zero()) {
            return Err(Error::invalid_config("resync_period must be > 0 when set"));
        }
        Ok(())
    }

    /// Settings for the worker loop.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            workers: self.workers,
            reconcile_timeout: self.reconcile_timeout,
            backoff: self.backoff.clone(),
        }
    }

    /// Settings for the reconciler.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            resync_period: self.resync_period,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::invalid_config(format!("{name}={value:?}: {e}")))
}

/// Serialization helpers for durations.
pub(crate) mod serde_duration {
    /// Duration as whole seconds.
    pub mod secs {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Duration,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            duration.as_secs().serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Duration, D::Error> {
            let secs = u64::deserialize(deserializer)?;
            Ok(Duration::from_secs(secs))
        }
    }

    /// Optional duration as whole seconds.
    pub mod opt_secs {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            duration.map(|d| d.as_secs()).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let secs = Option::<u64>::deserialize(deserializer)?;
            Ok(secs.map(Duration::from_secs))
        }
    }

    /// Duration as whole milliseconds.
    pub mod millis {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Duration,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            u64::try_from(duration.as_millis())
                .unwrap_or(u64::MAX)
                .serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Duration, D::Error> {
            let millis = u64::deserialize(deserializer)?;
            Ok(Duration::from_millis(millis))
        }
    }
}
