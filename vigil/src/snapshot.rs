//! Immutable point-in-time views of aggregated metric state.
//!
//! A [`Snapshot`] is what the renderer sees. It shares the aggregator's state
//! map through an `Arc`; the aggregator copies that map before its next
//! mutation whenever a snapshot is still alive, so a snapshot never changes
//! after it has been handed out.
//!
//! # Example Usage
//!
//! ```rust
//! use std::time::Duration;
//! use vigil::aggregator::Aggregator;
//! use vigil::config::SamplerConfig;
//! use vigil::metric::{MetricId, Reading, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cpu = MetricId::new("cpu.percent")?;
//! let mut aggregator = Aggregator::new(&[SamplerConfig::with_defaults(cpu.clone(), Duration::from_secs(1))?]);
//!
//! let before = aggregator.snapshot();
//! aggregator.merge(Reading::ok(cpu.clone(), Value::Percent(12.0), 1));
//! let after = aggregator.snapshot();
//!
//! // The earlier snapshot is unaffected by the merge.
//! assert!(before.get(&cpu).is_none());
//! assert_eq!(after.get(&cpu).and_then(|s| s.last_value()), Some(Value::Percent(12.0)));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::aggregator::MetricState;
use crate::metric::MetricId;

/// Immutable view of every known metric state at one instant.
///
/// Two snapshots compare equal when they describe the same state, which is
/// always the case for two snapshots taken with no merge in between.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Configured metrics in display order.
    order: Arc<[MetricId]>,

    /// Per-metric state; metrics without a reading yet are absent.
    states: Arc<BTreeMap<MetricId, MetricState>>,

    /// Number of merges applied when the snapshot was taken.
    version: u64,

    /// Timestamp of the newest reading merged so far (0 if none).
    as_of_ns: u64,
}

impl Snapshot {
    pub(crate) fn new(
        order: Arc<[MetricId]>,
        states: Arc<BTreeMap<MetricId, MetricState>>,
        version: u64,
        as_of_ns: u64,
    ) -> Self {
        Self {
            order,
            states,
            version,
            as_of_ns,
        }
    }

    /// Returns the state of one metric, or `None` if it has no reading yet.
    pub fn get(&self, metric: &MetricId) -> Option<&MetricState> {
        self.states.get(metric)
    }

    /// Iterates over every configured metric in display order.
    ///
    /// Metrics that have not produced a reading yet are yielded with `None`.
    pub fn iter(&self) -> impl Iterator<Item = (&MetricId, Option<&MetricState>)> {
        self.order.iter().map(|id| (id, self.states.get(id)))
    }

    /// Returns the configured metrics in display order.
    pub fn metrics(&self) -> &[MetricId] {
        &self.order
    }

    /// Returns the number of metrics that have produced at least one reading.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns `true` if no metric has produced a reading yet.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Returns the number of merges applied when the snapshot was taken.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the timestamp of the newest merged reading, in nanoseconds.
    pub fn as_of_ns(&self) -> u64 {
        self.as_of_ns
    }

    /// Iterates over metrics that are currently degraded.
    pub fn degraded(&self) -> impl Iterator<Item = &MetricId> {
        self.iter()
            .filter(|(_, state)| state.is_some_and(MetricState::is_degraded))
            .map(|(id, _)| id)
    }
}
