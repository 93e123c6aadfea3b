//! Aggregated metric state.
//!
//! The [`Aggregator`] is the single owner of all mutable [`MetricState`]. It
//! is driven by the event loop, which calls [`Aggregator::merge`] once per
//! delivered reading, so merges are serialized by construction.
//!
//! # Design
//!
//! - State lives in an `Arc<BTreeMap>`; [`Aggregator::snapshot`] clones the
//!   `Arc`, and `merge` uses `Arc::make_mut`, which copies the map only when a
//!   snapshot still references it (copy-on-write)
//! - A `MetricState` is created lazily on the first reading for a metric
//! - Readings older than the latest reading of their metric are ignored, so a
//!   displayed value never regresses
//! - Merges for different metrics commute: the resulting snapshot does not
//!   depend on their relative order

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::SamplerConfig;
use crate::history::History;
use crate::metric::{MetricId, Reading, Value};
use crate::snapshot::Snapshot;

/// What a call to [`Aggregator::merge`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A successful reading was recorded.
    Applied,
    /// A successful reading ended a degraded streak.
    Recovered,
    /// A failed reading was recorded; the metric is not (newly) degraded.
    Failed {
        /// Failures in a row, including this one.
        consecutive_failures: u32,
    },
    /// A failed reading pushed the metric over its failure threshold.
    Degraded {
        /// Failures in a row, including this one.
        consecutive_failures: u32,
    },
    /// The reading is older than the latest one for its metric and was ignored.
    Outdated,
    /// The reading names a metric that is not configured and was ignored.
    UnknownMetric,
}

impl MergeOutcome {
    /// Returns `true` if the reading changed the aggregated state.
    pub fn is_applied(self) -> bool {
        !matches!(self, Self::Outdated | Self::UnknownMetric)
    }
}

/// Latest value, rolling history, and failure streak of one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricState {
    /// The most recent reading, successful or not.
    latest: Reading,
    /// Successful readings, oldest evicted first.
    history: History,
    /// Failed readings in a row since the last success.
    consecutive_failures: u32,
    /// Failures in a row at which the metric counts as degraded.
    failure_threshold: u32,
}

impl MetricState {
    fn new(first: &Reading, history_capacity: usize, failure_threshold: u32) -> Self {
        Self {
            latest: first.clone(),
            history: History::new(history_capacity),
            consecutive_failures: 0,
            failure_threshold,
        }
    }

    fn apply(&mut self, reading: Reading) -> MergeOutcome {
        let was_degraded = self.is_degraded();

        if reading.is_ok() {
            self.consecutive_failures = 0;
            self.history.push(reading.clone());
            self.latest = reading;
            return if was_degraded {
                MergeOutcome::Recovered
            } else {
                MergeOutcome::Applied
            };
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.latest = reading;
        let consecutive_failures = self.consecutive_failures;

        if !was_degraded && self.is_degraded() {
            MergeOutcome::Degraded { consecutive_failures }
        } else {
            MergeOutcome::Failed { consecutive_failures }
        }
    }

    /// Returns the most recent reading, which may carry an error.
    pub fn latest(&self) -> &Reading {
        &self.latest
    }

    /// Returns the history of successful readings.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Returns the number of failed readings since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns the configured failure threshold.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Returns `true` once the failure streak has reached the threshold.
    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures >= self.failure_threshold
    }

    /// Returns `true` if the latest reading is an error.
    pub fn has_error(&self) -> bool {
        !self.latest.is_ok()
    }

    /// Returns the most recent successful value, even if newer readings failed.
    pub fn last_value(&self) -> Option<Value> {
        self.history.newest().and_then(Reading::value)
    }
}

/// Per-metric limits taken from configuration.
#[derive(Debug, Clone, Copy)]
struct Limits {
    history_capacity: usize,
    failure_threshold: u32,
}

/// Owner of all metric state; merges readings and hands out snapshots.
///
/// # Thread Safety
///
/// The aggregator is not shared between threads. The event loop owns it and
/// is the only caller of `merge`.
#[derive(Debug)]
pub struct Aggregator {
    /// Limits for every configured metric.
    limits: HashMap<MetricId, Limits>,
    /// Configured metrics in display order.
    order: Arc<[MetricId]>,
    /// Current state, shared with outstanding snapshots.
    states: Arc<BTreeMap<MetricId, MetricState>>,
    /// Number of readings applied so far.
    version: u64,
    /// Timestamp of the newest applied reading.
    as_of_ns: u64,
}

impl Aggregator {
    /// Creates an aggregator for the given metric configurations.
    ///
    /// The configuration order becomes the display order of snapshots.
    pub fn new(configs: &[SamplerConfig]) -> Self {
        let limits = configs
            .iter()
            .map(|c| {
                (
                    c.metric.clone(),
                    Limits {
                        history_capacity: c.history_capacity,
                        failure_threshold: c.failure_threshold,
                    },
                )
            })
            .collect();

        let order: Arc<[MetricId]> = configs.iter().map(|c| c.metric.clone()).collect();

        Self {
            limits,
            order,
            states: Arc::new(BTreeMap::new()),
            version: 0,
            as_of_ns: 0,
        }
    }

    /// Merges one reading into the state of its metric.
    ///
    /// This is the only mutator of metric state. Failed readings increment
    /// the failure streak and keep the last successful value in history;
    /// successful readings reset the streak and are appended to history.
    pub fn merge(&mut self, reading: Reading) -> MergeOutcome {
        let Some(limits) = self.limits.get(reading.metric()).copied() else {
            warn!(metric = %reading.metric(), "ignoring reading for unconfigured metric");
            return MergeOutcome::UnknownMetric;
        };

        // Check before make_mut so an ignored reading never forces a copy.
        let latest_ns = self
            .states
            .get(reading.metric())
            .map(|state| state.latest.timestamp_ns());
        if let Some(latest_ns) = latest_ns.filter(|&ns| reading.timestamp_ns() < ns) {
            debug!(
                metric = %reading.metric(),
                timestamp_ns = reading.timestamp_ns(),
                latest_ns,
                "ignoring outdated reading"
            );
            return MergeOutcome::Outdated;
        }

        let timestamp_ns = reading.timestamp_ns();
        let states = Arc::make_mut(&mut self.states);
        let state = states.entry(reading.metric().clone()).or_insert_with(|| {
            MetricState::new(&reading, limits.history_capacity, limits.failure_threshold)
        });
        let outcome = state.apply(reading);

        self.version += 1;
        self.as_of_ns = self.as_of_ns.max(timestamp_ns);
        outcome
    }

    /// Returns an immutable snapshot of the current state.
    ///
    /// Never blocks and never copies metric state; the copy happens lazily on
    /// the next merge if the snapshot is still alive.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            Arc::clone(&self.order),
            Arc::clone(&self.states),
            self.version,
            self.as_of_ns,
        )
    }

    /// Returns the current state of one metric.
    pub fn state(&self, metric: &MetricId) -> Option<&MetricState> {
        self.states.get(metric)
    }

    /// Returns the number of readings applied so far.
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SamplerError;
    use std::time::Duration;

    fn config(name: &str, threshold: u32, capacity: usize) -> SamplerConfig {
        SamplerConfig::new(
            MetricId::new(name).unwrap(),
            Duration::from_secs(1),
            Duration::from_millis(500),
            threshold,
            capacity,
        )
        .unwrap()
    }

    fn cpu() -> MetricId {
        MetricId::new("cpu.percent").unwrap()
    }

    fn timeout(ts: u64) -> Reading {
        Reading::failed(
            cpu(),
            SamplerError::Timeout {
                metric: "cpu.percent".to_string(),
                timeout: Duration::from_millis(500),
            },
            ts,
        )
    }

    #[test]
    fn test_state_created_lazily() {
        let mut aggregator = Aggregator::new(&[config("cpu.percent", 3, 10)]);
        assert!(aggregator.state(&cpu()).is_none());
        assert!(aggregator.snapshot().is_empty());

        let outcome = aggregator.merge(Reading::ok(cpu(), Value::Percent(42.5), 1));
        assert_eq!(outcome, MergeOutcome::Applied);

        let state = aggregator.state(&cpu()).unwrap();
        assert_eq!(state.last_value(), Some(Value::Percent(42.5)));
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.consecutive_failures(), 0);
        assert!(!state.has_error());
    }

    #[test]
    fn test_failure_streak_and_recovery() {
        let mut aggregator = Aggregator::new(&[config("cpu.percent", 3, 10)]);

        assert_eq!(aggregator.merge(Reading::ok(cpu(), Value::Percent(42.5), 1)), MergeOutcome::Applied);
        assert_eq!(
            aggregator.merge(timeout(2)),
            MergeOutcome::Failed { consecutive_failures: 1 }
        );
        assert_eq!(
            aggregator.merge(timeout(3)),
            MergeOutcome::Failed { consecutive_failures: 2 }
        );
        assert_eq!(
            aggregator.merge(timeout(4)),
            MergeOutcome::Degraded { consecutive_failures: 3 }
        );
        // Further failures keep the metric degraded without re-announcing it
        assert_eq!(
            aggregator.merge(timeout(5)),
            MergeOutcome::Failed { consecutive_failures: 4 }
        );

        let state = aggregator.state(&cpu()).unwrap();
        assert!(state.is_degraded());
        assert!(state.has_error());
        assert_eq!(state.last_value(), Some(Value::Percent(42.5)));
        assert_eq!(state.history().len(), 1);

        assert_eq!(
            aggregator.merge(Reading::ok(cpu(), Value::Percent(10.0), 6)),
            MergeOutcome::Recovered
        );
        let state = aggregator.state(&cpu()).unwrap();
        assert!(!state.is_degraded());
        assert_eq!(state.consecutive_failures(), 0);
    }

    #[test]
    fn test_first_reading_can_fail() {
        let mut aggregator = Aggregator::new(&[config("cpu.percent", 1, 10)]);
        assert_eq!(
            aggregator.merge(timeout(1)),
            MergeOutcome::Degraded { consecutive_failures: 1 }
        );
        let state = aggregator.state(&cpu()).unwrap();
        assert!(state.history().is_empty());
        assert_eq!(state.last_value(), None);
    }

    #[test]
    fn test_outdated_reading_ignored() {
        let mut aggregator = Aggregator::new(&[config("cpu.percent", 3, 10)]);
        aggregator.merge(Reading::ok(cpu(), Value::Percent(50.0), 100));

        let before = aggregator.snapshot();
        let outcome = aggregator.merge(Reading::ok(cpu(), Value::Percent(1.0), 99));
        assert_eq!(outcome, MergeOutcome::Outdated);
        assert!(!outcome.is_applied());
        assert_eq!(aggregator.snapshot(), before);
        assert_eq!(
            aggregator.state(&cpu()).unwrap().last_value(),
            Some(Value::Percent(50.0))
        );

        // Equal timestamps are accepted
        assert_eq!(
            aggregator.merge(Reading::ok(cpu(), Value::Percent(60.0), 100)),
            MergeOutcome::Applied
        );
    }

    #[test]
    fn test_unknown_metric_ignored() {
        let mut aggregator = Aggregator::new(&[config("cpu.percent", 3, 10)]);
        let other = MetricId::new("gpu.percent").unwrap();
        let outcome = aggregator.merge(Reading::ok(other.clone(), Value::Percent(1.0), 1));
        assert_eq!(outcome, MergeOutcome::UnknownMetric);
        assert!(aggregator.state(&other).is_none());
        assert_eq!(aggregator.version(), 0);
    }

    #[test]
    fn test_history_bounded_by_config() {
        let mut aggregator = Aggregator::new(&[config("cpu.percent", 3, 4)]);
        for i in 0u32..20 {
            aggregator.merge(Reading::ok(cpu(), Value::Percent(f64::from(i)), u64::from(i) + 1));
            assert!(aggregator.state(&cpu()).unwrap().history().len() <= 4);
        }
        let values = aggregator.state(&cpu()).unwrap().history().values();
        assert_eq!(values, vec![16.0, 17.0, 18.0, 19.0]);
    }

    #[test]
    fn test_snapshot_is_copy_on_write() {
        let mut aggregator = Aggregator::new(&[config("cpu.percent", 3, 10)]);
        aggregator.merge(Reading::ok(cpu(), Value::Percent(1.0), 1));

        let first = aggregator.snapshot();
        let second = aggregator.snapshot();
        assert_eq!(first, second);

        aggregator.merge(Reading::ok(cpu(), Value::Percent(2.0), 2));
        assert_eq!(first.get(&cpu()).unwrap().last_value(), Some(Value::Percent(1.0)));
        assert_eq!(
            aggregator.snapshot().get(&cpu()).unwrap().last_value(),
            Some(Value::Percent(2.0))
        );
        assert_ne!(first, aggregator.snapshot());
    }
}
