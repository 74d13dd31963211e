//! Scheduler and source timing configuration.
//!
//! Both types can be built in code with the `with_*` builders or deserialised with
//! serde. Durations are written in human-readable form (`"250ms"`, `"30s"`, `"5m"`).
//!
//! ```rust
//! use dashboard_provider::config::{SchedulerConfig, SourceTiming};
//! use std::time::Duration;
//!
//! let config: SchedulerConfig =
//!     serde_json::from_str(r#"{ "jitter_ratio": 0.1, "max_backoff_factor": 4 }"#).unwrap();
//! assert_eq!(config.max_backoff_factor(), 4);
//!
//! let timing: SourceTiming =
//!     serde_json::from_str(r#"{ "ttl": "5s", "refresh_interval": "10s" }"#).unwrap();
//! assert_eq!(timing.refresh_interval, Duration::from_secs(10));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default upper bound of the first-tick jitter, as a fraction of the refresh interval
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// Default backoff ceiling, as a multiple of the refresh interval
pub const DEFAULT_MAX_BACKOFF_FACTOR: u32 = 8;

/// Minimum interval for scheduled ticks to prevent busy spinning
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a [`PollingScheduler`](crate::scheduler::PollingScheduler)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    jitter_ratio: f64,
    max_backoff_factor: u32,
}

impl SchedulerConfig {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self {
            jitter_ratio: DEFAULT_JITTER_RATIO,
            max_backoff_factor: DEFAULT_MAX_BACKOFF_FACTOR,
        }
    }

    /// Set the first-tick jitter as a fraction of the refresh interval
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    /// Start every source immediately, with no jitter
    pub fn without_jitter(self) -> Self {
        self.with_jitter_ratio(0.0)
    }

    /// Cap backoff at `factor` times the refresh interval
    pub fn with_max_backoff_factor(mut self, factor: u32) -> Self {
        self.max_backoff_factor = factor;
        self
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    pub fn max_backoff_factor(&self) -> u32 {
        self.max_backoff_factor
    }

    /// Check that every value is within range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(ConfigError::JitterRatio(self.jitter_ratio.to_string()));
        }
        if self.max_backoff_factor == 0 {
            return Err(ConfigError::BackoffFactor);
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Freshness and refresh timing of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTiming {
    /// How long a fetched value stays fresh
    #[serde(with = "human_duration")]
    pub ttl: Duration,
    /// Base delay between refreshes
    #[serde(with = "human_duration")]
    pub refresh_interval: Duration,
    /// Deadline applied to each fetch
    #[serde(default, with = "human_duration_opt")]
    pub fetch_timeout: Option<Duration>,
}

impl SourceTiming {
    pub fn new(ttl: Duration, refresh_interval: Duration) -> Self {
        Self {
            ttl,
            refresh_interval,
            fetch_timeout: None,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Check that the timing can drive a scheduler
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "ttl" });
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "refresh_interval",
            });
        }
        if self.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroDuration {
                field: "fetch_timeout",
            });
        }
        Ok(())
    }

    /// A refresh interval shorter than the TTL means every tick finds a fresh value
    /// and does nothing; longer is the intended shape.
    pub fn refresh_outpaces_ttl(&self) -> bool {
        self.refresh_interval < self.ttl
    }
}

mod human_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod human_duration_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => super::human_duration::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
