//! Error types for vigil.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all vigil operations.
///
/// Configuration and render errors are fatal at startup. Sampler errors are
/// normally recorded inside a [`Reading`](crate::metric::Reading) instead of
/// being returned, so they only surface here when a caller asks for them.
#[derive(Error, Debug)]
pub enum VigilError {
    /// Invalid static configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A sampler failed.
    #[error("sampler error: {0}")]
    Sampler(#[from] SamplerError),

    /// Sampler registration failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The terminal (or other frame sink) could not be used.
    #[error("render error: {0}")]
    Render(#[from] RenderError),
}

/// Errors that can occur while building or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A metric identifier is malformed.
    #[error("invalid metric id '{id}': {reason}")]
    InvalidMetricId {
        /// The rejected identifier.
        id: String,
        /// Why the identifier is invalid.
        reason: String,
    },

    /// A sampling interval is out of range.
    #[error("invalid interval {interval:?} for '{metric}': {reason}")]
    InvalidInterval {
        /// The metric the interval belongs to.
        metric: String,
        /// The rejected interval.
        interval: Duration,
        /// Why the interval is invalid.
        reason: String,
    },

    /// A sampling timeout is out of range.
    #[error("invalid timeout {timeout:?} for '{metric}': {reason}")]
    InvalidTimeout {
        /// The metric the timeout belongs to.
        metric: String,
        /// The rejected timeout.
        timeout: Duration,
        /// Why the timeout is invalid.
        reason: String,
    },

    /// The failure threshold must be at least one.
    #[error("invalid failure threshold for '{metric}': must be > 0")]
    InvalidFailureThreshold {
        /// The metric the threshold belongs to.
        metric: String,
    },

    /// History capacity is out of range.
    #[error("invalid history capacity {capacity} for '{metric}' (must be 1..={max})")]
    InvalidHistoryCapacity {
        /// The metric the capacity belongs to.
        metric: String,
        /// The rejected capacity.
        capacity: usize,
        /// The largest accepted capacity.
        max: usize,
    },

    /// A dashboard-level setting is invalid.
    #[error("invalid dashboard setting '{field}': {reason}")]
    InvalidSetting {
        /// The offending field name.
        field: &'static str,
        /// Why the value is invalid.
        reason: String,
    },

    /// The same metric was configured more than once.
    #[error("metric '{metric}' is configured more than once")]
    DuplicateMetric {
        /// The duplicated metric.
        metric: String,
    },

    /// No metrics were configured.
    #[error("at least one metric must be configured")]
    NoMetrics,

    /// A configured metric has no registered sampler.
    #[error("no sampler registered for metric '{metric}'")]
    MissingSampler {
        /// The metric without a sampler.
        metric: String,
    },

    /// A metric name does not match any built-in sampler.
    #[error("unknown metric '{metric}' (known: {known})")]
    UnknownMetric {
        /// The requested metric.
        metric: String,
        /// Comma-separated list of known metrics.
        known: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    ReadFailed {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for a dashboard config.
    #[error("failed to parse config file '{}': {source}", path.display())]
    ParseFailed {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors produced by a single sampling attempt.
///
/// These travel inside readings, so the type is `Clone` and compares by value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplerError {
    /// The sampler did not answer within its timeout.
    #[error("sampling '{metric}' timed out after {timeout:?}")]
    Timeout {
        /// The metric being sampled.
        metric: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The underlying metric source (usually an OS call) failed.
    #[error("sampling '{metric}' failed: {reason}")]
    Source {
        /// The metric being sampled.
        metric: String,
        /// Description of the failure.
        reason: String,
    },

    /// The sampler can no longer produce values (e.g. it panicked earlier).
    #[error("sampler for '{metric}' is unavailable: {reason}")]
    Unavailable {
        /// The metric being sampled.
        metric: String,
        /// Why the sampler is unavailable.
        reason: String,
    },
}

impl SamplerError {
    /// Returns `true` for [`SamplerError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors that can occur while registering samplers.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A sampler for this metric is already registered.
    #[error("a sampler for '{metric}' is already registered")]
    DuplicateSampler {
        /// The conflicting metric.
        metric: String,
    },
}

/// Errors raised by a frame sink.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The terminal could not be initialized or is not a terminal.
    #[error("terminal unavailable: {source}")]
    TerminalUnavailable {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a frame failed.
    #[error("failed to draw frame: {source}")]
    Draw {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for `Result<T, VigilError>`.
pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_metric() {
        let err = SamplerError::Timeout {
            metric: "cpu.percent".to_string(),
            timeout: Duration::from_millis(500),
        };
        assert_eq!(err.to_string(), "sampling 'cpu.percent' timed out after 500ms");
        assert!(err.is_timeout());

        let err = SamplerError::Source {
            metric: "mem.used_bytes".to_string(),
            reason: "no /proc".to_string(),
        };
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("mem.used_bytes"));
    }

    #[test]
    fn test_from_conversions() {
        let err: VigilError = ConfigError::NoMetrics.into();
        assert!(matches!(err, VigilError::Config(ConfigError::NoMetrics)));
        assert_eq!(err.to_string(), "config error: at least one metric must be configured");

        let err: VigilError = RegistryError::DuplicateSampler {
            metric: "cpu.percent".to_string(),
        }
        .into();
        assert!(matches!(err, VigilError::Registry(_)));
    }
}
