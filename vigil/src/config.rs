//! Static configuration for samplers and the dashboard.
//!
//! Configuration is loaded once at startup, validated, and never mutated
//! after the scheduler starts. Each configured metric gets exactly one
//! [`SamplerConfig`]; a [`DashboardConfig`] groups them with the settings of
//! the render loop.
//!
//! Durations are written as fractional seconds in JSON:
//!
//! ```json
//! {
//!   "samplers": [
//!     { "metric": "cpu.percent", "interval": 1.0, "timeout": 0.5 },
//!     { "metric": "mem.used_bytes", "interval": 3.0, "history_capacity": 120 }
//!   ],
//!   "render_interval": 0.25
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, VigilError};
use crate::metric::MetricId;

/// Shortest accepted sampling or render interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Longest accepted sampling or render interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(3600);

/// Largest accepted history capacity per metric.
pub const MAX_HISTORY_CAPACITY: usize = 10_000;

/// Consecutive failures before a metric is reported as degraded.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Readings kept per metric when not configured.
pub const DEFAULT_HISTORY_CAPACITY: usize = 60;

/// Default interval between rendered frames.
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(250);

/// Default time in-flight samples get to finish at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Default capacity of the event channel feeding the event loop.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Longest accepted shutdown grace period.
const MAX_SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Returns the timeout used when none is configured: half the interval,
/// but never below [`MIN_INTERVAL`].
pub fn default_timeout(interval: Duration) -> Duration {
    (interval / 2).max(MIN_INTERVAL)
}

/// Sampling configuration for one metric.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use vigil::config::SamplerConfig;
/// use vigil::metric::MetricId;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cpu = SamplerConfig::new(
///     MetricId::new("cpu.percent")?,
///     Duration::from_secs(1),
///     Duration::from_millis(500),
///     3,
///     60,
/// )?;
/// assert_eq!(cpu.failure_threshold, 3);
///
/// // Zero intervals are rejected.
/// assert!(SamplerConfig::with_defaults(MetricId::new("mem.percent")?, Duration::ZERO).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSamplerConfig")]
pub struct SamplerConfig {
    /// The metric sampled by this configuration.
    pub metric: MetricId,

    /// Time between scheduled samples, measured from a fixed origin.
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// How long a single sample may take before it is reported as timed out.
    ///
    /// Must not exceed `interval`.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Consecutive failures after which the metric is reported degraded.
    pub failure_threshold: u32,

    /// Number of successful readings retained per metric.
    pub history_capacity: usize,
}

impl SamplerConfig {
    /// Creates a validated sampler configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any field is out of range (see
    /// [`SamplerConfig::validate`]).
    pub fn new(
        metric: MetricId,
        interval: Duration,
        timeout: Duration,
        failure_threshold: u32,
        history_capacity: usize,
    ) -> Result<Self> {
        let config = Self {
            metric,
            interval,
            timeout,
            failure_threshold,
            history_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Creates a validated configuration with the default timeout, failure
    /// threshold, and history capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInterval`] if the interval is out of range.
    pub fn with_defaults(metric: MetricId, interval: Duration) -> Result<Self> {
        Self::new(
            metric,
            interval,
            default_timeout(interval),
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_HISTORY_CAPACITY,
        )
    }

    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - the interval is outside `MIN_INTERVAL..=MAX_INTERVAL`
    /// - the timeout is zero or longer than the interval
    /// - the failure threshold is zero
    /// - the history capacity is zero or above [`MAX_HISTORY_CAPACITY`]
    pub fn validate(&self) -> Result<()> {
        let metric = self.metric.to_string();

        if self.interval < MIN_INTERVAL || self.interval > MAX_INTERVAL {
            return Err(ConfigError::InvalidInterval {
                metric,
                interval: self.interval,
                reason: format!("must be between {MIN_INTERVAL:?} and {MAX_INTERVAL:?}"),
            }
            .into());
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                metric,
                timeout: self.timeout,
                reason: "timeout cannot be zero".to_string(),
            }
            .into());
        }

        if self.timeout > self.interval {
            return Err(ConfigError::InvalidTimeout {
                metric,
                timeout: self.timeout,
                reason: format!("must not exceed the interval ({:?})", self.interval),
            }
            .into());
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold { metric }.into());
        }

        if self.history_capacity == 0 || self.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(ConfigError::InvalidHistoryCapacity {
                metric,
                capacity: self.history_capacity,
                max: MAX_HISTORY_CAPACITY,
            }
            .into());
        }

        Ok(())
    }
}

/// On-disk form of [`SamplerConfig`]; optional fields get defaults.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSamplerConfig {
    metric: MetricId,
    #[serde(with = "duration_serde")]
    interval: Duration,
    #[serde(default, with = "option_duration_serde")]
    timeout: Option<Duration>,
    #[serde(default)]
    failure_threshold: Option<u32>,
    #[serde(default)]
    history_capacity: Option<usize>,
}

impl TryFrom<RawSamplerConfig> for SamplerConfig {
    type Error = VigilError;

    fn try_from(raw: RawSamplerConfig) -> Result<Self> {
        Self::new(
            raw.metric,
            raw.interval,
            raw.timeout.unwrap_or_else(|| default_timeout(raw.interval)),
            raw.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            raw.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY),
        )
    }
}

/// Complete dashboard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// One entry per sampled metric, in display order.
    pub samplers: Vec<SamplerConfig>,

    /// Time between rendered frames, independent of sampling intervals.
    #[serde(default = "default_render_interval", with = "duration_serde")]
    pub render_interval: Duration,

    /// How long in-flight samples may run after a quit before being abandoned.
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,

    /// Capacity of the event channel feeding the event loop.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Title shown at the top of every frame.
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_render_interval() -> Duration {
    DEFAULT_RENDER_INTERVAL
}

fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_title() -> String {
    "vigil".to_string()
}

impl DashboardConfig {
    /// Creates a validated configuration with default render settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation fails (see [`DashboardConfig::validate`]).
    pub fn new(samplers: Vec<SamplerConfig>) -> Result<Self> {
        let config = Self {
            samplers,
            render_interval: DEFAULT_RENDER_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            title: default_title(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadFailed`] if the file cannot be read,
    /// [`ConfigError::ParseFailed`] if it is not a valid configuration, or
    /// any validation error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - no samplers are configured
    /// - a metric appears more than once
    /// - any sampler configuration is invalid
    /// - the render interval, grace period, or channel capacity is out of range
    pub fn validate(&self) -> Result<()> {
        if self.samplers.is_empty() {
            return Err(ConfigError::NoMetrics.into());
        }

        let mut seen = HashSet::with_capacity(self.samplers.len());
        for sampler in &self.samplers {
            sampler.validate()?;
            if !seen.insert(&sampler.metric) {
                return Err(ConfigError::DuplicateMetric {
                    metric: sampler.metric.to_string(),
                }
                .into());
            }
        }

        if self.render_interval < MIN_INTERVAL || self.render_interval > MAX_INTERVAL {
            return Err(ConfigError::InvalidSetting {
                field: "render_interval",
                reason: format!("must be between {MIN_INTERVAL:?} and {MAX_INTERVAL:?}"),
            }
            .into());
        }

        if self.shutdown_grace > MAX_SHUTDOWN_GRACE {
            return Err(ConfigError::InvalidSetting {
                field: "shutdown_grace",
                reason: format!("must not exceed {MAX_SHUTDOWN_GRACE:?}"),
            }
            .into());
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "channel_capacity",
                reason: "must be > 0".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Returns the configured metrics in display order.
    pub fn metrics(&self) -> impl Iterator<Item = &MetricId> {
        self.samplers.iter().map(|s| &s.metric)
    }
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}

/// Serde support for optional Duration fields, in the same format.
mod option_duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de::Error};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|seconds| Duration::try_from_secs_f64(seconds).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> MetricId {
        MetricId::new(name).unwrap()
    }

    #[test]
    fn test_sampler_config_validation() {
        let config = SamplerConfig::with_defaults(id("cpu.percent"), Duration::from_secs(1)).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.failure_threshold, DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);

        // Invalid: interval too short
        assert!(SamplerConfig::with_defaults(id("cpu.percent"), Duration::from_millis(1)).is_err());

        // Invalid: interval too long
        assert!(SamplerConfig::with_defaults(id("cpu.percent"), Duration::from_secs(7200)).is_err());

        // Invalid: timeout longer than interval
        let config = SamplerConfig::new(
            id("cpu.percent"),
            Duration::from_secs(1),
            Duration::from_secs(2),
            3,
            60,
        );
        assert!(config.is_err());

        // Invalid: zero timeout
        let config = SamplerConfig::new(id("cpu.percent"), Duration::from_secs(1), Duration::ZERO, 3, 60);
        assert!(config.is_err());

        // Invalid: zero threshold
        let config = SamplerConfig::new(
            id("cpu.percent"),
            Duration::from_secs(1),
            Duration::from_millis(100),
            0,
            60,
        );
        assert!(config.is_err());

        // Invalid: history capacity out of range
        for capacity in [0, MAX_HISTORY_CAPACITY + 1] {
            let config = SamplerConfig::new(
                id("cpu.percent"),
                Duration::from_secs(1),
                Duration::from_millis(100),
                3,
                capacity,
            );
            assert!(config.is_err(), "capacity {capacity} should be rejected");
        }
    }

    #[test]
    fn test_default_timeout_has_floor() {
        assert_eq!(default_timeout(Duration::from_secs(2)), Duration::from_secs(1));
        assert_eq!(default_timeout(Duration::from_millis(10)), MIN_INTERVAL);
    }

    #[test]
    fn test_dashboard_config_rejects_duplicates() {
        let cpu = SamplerConfig::with_defaults(id("cpu.percent"), Duration::from_secs(1)).unwrap();
        let err = DashboardConfig::new(vec![cpu.clone(), cpu]).unwrap_err();
        assert!(matches!(
            err,
            VigilError::Config(ConfigError::DuplicateMetric { ref metric }) if metric == "cpu.percent"
        ));
    }

    #[test]
    fn test_dashboard_config_rejects_empty() {
        let err = DashboardConfig::new(vec![]).unwrap_err();
        assert!(matches!(err, VigilError::Config(ConfigError::NoMetrics)));
    }

    #[test]
    fn test_dashboard_config_settings() {
        let cpu = SamplerConfig::with_defaults(id("cpu.percent"), Duration::from_secs(1)).unwrap();
        let mut config = DashboardConfig::new(vec![cpu]).unwrap();

        config.channel_capacity = 0;
        assert!(config.validate().is_err());
        config.channel_capacity = 1;

        config.render_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.render_interval = DEFAULT_RENDER_INTERVAL;

        config.shutdown_grace = Duration::from_secs(120);
        assert!(config.validate().is_err());
        config.shutdown_grace = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_defaults_applied() {
        let json = r#"{
            "samplers": [
                { "metric": "cpu.percent", "interval": 1.0 },
                { "metric": "mem.used_bytes", "interval": 3.0, "timeout": 0.25, "failure_threshold": 5, "history_capacity": 10 }
            ],
            "render_interval": 0.1
        }"#;

        let config: DashboardConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.samplers.len(), 2);
        assert_eq!(config.samplers[0].timeout, Duration::from_millis(500));
        assert_eq!(config.samplers[0].failure_threshold, DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(config.samplers[1].timeout, Duration::from_millis(250));
        assert_eq!(config.samplers[1].failure_threshold, 5);
        assert_eq!(config.samplers[1].history_capacity, 10);
        assert_eq!(config.render_interval, Duration::from_millis(100));
        assert_eq!(config.shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.title, "vigil");
    }

    #[test]
    fn test_json_invalid_sampler_rejected() {
        let json = r#"{ "samplers": [ { "metric": "cpu.percent", "interval": 0.0 } ] }"#;
        assert!(serde_json::from_str::<DashboardConfig>(json).is_err());

        let json = r#"{ "samplers": [ { "metric": "cpu.percent", "interval": -1.0 } ] }"#;
        assert!(serde_json::from_str::<DashboardConfig>(json).is_err());

        let json = r#"{ "samplers": [ { "metric": "cpu.percent", "interval": 1.0, "colour": "red" } ] }"#;
        assert!(serde_json::from_str::<DashboardConfig>(json).is_err());
    }

    #[test]
    fn test_json_roundtrip_preserves_config() {
        let cpu = SamplerConfig::with_defaults(id("cpu.percent"), Duration::from_secs(1)).unwrap();
        let config = DashboardConfig::new(vec![cpu]).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DashboardConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
