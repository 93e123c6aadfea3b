//! Metric identifiers, values, and readings.
//!
//! A [`Reading`] is the unit of data flowing from samplers to the aggregator:
//! one timestamped [`Value`] (or [`SamplerError`]) for one [`MetricId`].
//! Readings are immutable once produced.
//!
//! # Example
//!
//! ```rust
//! use vigil::metric::{MetricId, Reading, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cpu = MetricId::new("cpu.percent")?;
//! let reading = Reading::ok(cpu.clone(), Value::Percent(42.5), 1_700_000_000_000_000_000);
//!
//! assert_eq!(reading.metric(), &cpu);
//! assert_eq!(reading.value(), Some(Value::Percent(42.5)));
//! assert!(reading.error().is_none());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, SamplerError, VigilError};

/// Longest accepted metric identifier, in bytes.
pub const MAX_METRIC_ID_LEN: usize = 128;

/// Stable identifier naming one metric, e.g. `cpu.percent`.
///
/// Identifiers are validated on construction and are cheap to clone, so they
/// can be used freely as map keys and carried inside every reading.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricId(Arc<str>);

impl MetricId {
    /// Creates a validated metric identifier.
    ///
    /// Identifiers are non-empty ASCII made of alphanumerics, `.`, `_` and
    /// `-`, at most [`MAX_METRIC_ID_LEN`] bytes, and may not start or end
    /// with a `.`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMetricId`] if the identifier is malformed.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref();
        validate_id(id)?;
        Ok(Self(Arc::from(id)))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_id(id: &str) -> Result<()> {
    let invalid = |reason: &str| -> VigilError {
        ConfigError::InvalidMetricId {
            id: id.to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    if id.is_empty() {
        return Err(invalid("id cannot be empty"));
    }

    if id.len() > MAX_METRIC_ID_LEN {
        return Err(invalid("id is longer than 128 bytes"));
    }

    if id.starts_with('.') || id.ends_with('.') {
        return Err(invalid("id cannot start or end with '.'"));
    }

    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(invalid(&format!("character {c:?} is not allowed")));
    }

    Ok(())
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MetricId {
    type Error = VigilError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<MetricId> for String {
    fn from(id: MetricId) -> Self {
        id.0.to_string()
    }
}

impl AsRef<str> for MetricId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The payload of a successful reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A percentage in `0.0..=100.0`.
    Percent(f64),
    /// Bytes in use out of a total.
    Usage {
        /// Bytes in use.
        used: u64,
        /// Total bytes available.
        total: u64,
    },
    /// A plain number.
    Gauge(f64),
    /// A throughput in bytes per second.
    Rate(f64),
    /// A duration in whole seconds.
    Seconds(u64),
}

impl Value {
    /// Returns the scalar projection used for history statistics and trends.
    ///
    /// Usage values project to the used fraction in percent so that history
    /// stays comparable when the total changes.
    #[allow(clippy::cast_precision_loss)] // Display-only projection
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Percent(p) => p,
            Self::Usage { used, total } => {
                if total == 0 {
                    0.0
                } else {
                    used as f64 / total as f64 * 100.0
                }
            }
            Self::Gauge(v) | Self::Rate(v) => v,
            Self::Seconds(s) => s as f64,
        }
    }

    /// Returns the fill ratio in `0.0..=1.0` for values drawn as bars.
    ///
    /// Returns `None` for values that render as plain text.
    pub fn ratio(&self) -> Option<f64> {
        match self {
            Self::Percent(_) | Self::Usage { .. } => Some((self.as_f64() / 100.0).clamp(0.0, 1.0)),
            Self::Gauge(_) | Self::Rate(_) | Self::Seconds(_) => None,
        }
    }
}

/// A single timestamped value (or error) produced by a sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    metric: MetricId,
    timestamp_ns: u64,
    result: std::result::Result<Value, SamplerError>,
}

impl Reading {
    /// Creates a successful reading.
    pub fn ok(metric: MetricId, value: Value, timestamp_ns: u64) -> Self {
        Self {
            metric,
            timestamp_ns,
            result: Ok(value),
        }
    }

    /// Creates a failed reading. No value is synthesized.
    pub fn failed(metric: MetricId, error: SamplerError, timestamp_ns: u64) -> Self {
        Self {
            metric,
            timestamp_ns,
            result: Err(error),
        }
    }

    /// Creates a reading from a sampler result.
    pub fn from_result(
        metric: MetricId,
        result: std::result::Result<Value, SamplerError>,
        timestamp_ns: u64,
    ) -> Self {
        Self {
            metric,
            timestamp_ns,
            result,
        }
    }

    /// Returns the metric this reading belongs to.
    pub fn metric(&self) -> &MetricId {
        &self.metric
    }

    /// Returns the reading timestamp in nanoseconds since the Unix epoch.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Returns the value, or `None` for a failed reading.
    pub fn value(&self) -> Option<Value> {
        self.result.as_ref().ok().copied()
    }

    /// Returns the error, or `None` for a successful reading.
    pub fn error(&self) -> Option<&SamplerError> {
        self.result.as_ref().err()
    }

    /// Returns `true` if the reading carries a value.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Returns the current wall-clock time in nanoseconds since the Unix epoch.
///
/// Returns 0 if the system clock is set before the epoch.
#[allow(clippy::cast_possible_truncation)] // Current epoch nanos fit in u64 until year 2554
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
