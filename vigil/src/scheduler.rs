//! Per-metric sampling schedule.
//!
//! The [`Scheduler`] runs one tokio task per configured metric. Each task owns
//! its sampler and an interval timer anchored at a shared origin, so ticks for
//! every metric land on `origin + k * interval` regardless of how long
//! sampling takes.
//!
//! # Per-metric lifecycle
//!
//! ```text
//! Idle --tick--> Sampling --value--> (delivered) --> Idle
//!                         --error/timeout--> (failed) --> Idle
//! ```
//!
//! - A tick that comes due while a sample is still running is skipped, never
//!   queued; skipped ticks are counted in [`TickStats`]
//! - The configured timeout bounds each call; a timed-out call becomes a
//!   failed reading carrying [`SamplerError::Timeout`]
//! - Every completed call becomes exactly one [`Event::Reading`], sent in
//!   order, so readings for one metric arrive first-in first-out
//! - Crossing the failure threshold emits one [`StatusChange::Degraded`]; the
//!   next success emits [`StatusChange::Recovered`]
//!
//! # Shutdown
//!
//! [`Scheduler::shutdown`] cancels every task. In-flight samples get a grace
//! period to finish; their results are discarded. Tasks still running when
//! the grace period ends are aborted and reported as abandoned.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SamplerConfig;
use crate::error::{ConfigError, Result, SamplerError};
use crate::event::{Event, EventSender, StatusChange};
use crate::metric::{MetricId, Reading, now_ns};
use crate::sampler::{SampleContext, Sampler, SamplerRegistry};

/// What a metric's task is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the next tick.
    #[default]
    Idle,
    /// A sampler call is in flight.
    Sampling,
    /// The task has exited.
    Stopped,
}

/// Counters describing one metric's schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Current phase of the task.
    pub phase: Phase,
    /// Ticks that started a sample.
    pub ticks: u64,
    /// Ticks that came due while a sample was running and were dropped.
    pub skipped: u64,
    /// Successful readings sent to the event loop.
    pub delivered: u64,
    /// Failed readings sent to the event loop, timeouts included.
    pub failed: u64,
    /// Failed readings caused by the timeout.
    pub timeouts: u64,
}

/// Result of [`Scheduler::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that stopped within the grace period.
    pub finished: usize,
    /// Tasks that were still sampling when the grace period ended.
    pub abandoned: usize,
}

type SharedStats = Arc<Mutex<TickStats>>;

fn update(stats: &SharedStats, f: impl FnOnce(&mut TickStats)) {
    let mut guard = stats.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard);
}

/// Maps the tokio clock onto wall-clock nanoseconds.
///
/// Reading timestamps come from the monotonic clock, so they never go
/// backwards for one metric even if the system clock is adjusted.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin: Instant,
    origin_ns: u64,
}

impl Clock {
    fn start() -> Self {
        Self {
            origin: Instant::now(),
            origin_ns: now_ns(),
        }
    }

    #[allow(clippy::cast_possible_truncation)] // u64 nanoseconds cover 584 years of uptime
    fn now_ns(&self) -> u64 {
        let elapsed = self.origin.elapsed().as_nanos() as u64;
        self.origin_ns.saturating_add(elapsed)
    }
}

/// Owner of every sampling task.
#[derive(Debug)]
pub struct Scheduler {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    stats: BTreeMap<MetricId, SharedStats>,
}

impl Scheduler {
    /// Starts one sampling task per configuration.
    ///
    /// Each task takes its sampler out of `registry`. Samplers registered for
    /// metrics that are not configured are dropped. Cancelling `cancel` (or
    /// calling [`Scheduler::shutdown`]) stops every task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSampler`] if a configured metric has no
    /// registered sampler. No task is started in that case.
    pub fn start(
        configs: &[SamplerConfig],
        mut registry: SamplerRegistry,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if let Some(missing) = configs.iter().find(|c| !registry.contains(&c.metric)) {
            return Err(ConfigError::MissingSampler {
                metric: missing.metric.to_string(),
            }
            .into());
        }

        let clock = Clock::start();
        let mut tasks = JoinSet::new();
        let mut stats = BTreeMap::new();

        for config in configs {
            let Some(sampler) = registry.take(&config.metric) else {
                continue;
            };
            let shared = SharedStats::default();
            stats.insert(config.metric.clone(), Arc::clone(&shared));

            let task = MetricTask {
                config: config.clone(),
                sampler,
                events: events.clone(),
                cancel: cancel.clone(),
                stats: shared,
                clock,
            };
            tasks.spawn(task.run());
        }

        for unused in registry.metrics() {
            debug!(metric = %unused, "dropping sampler with no configuration");
        }

        info!(metrics = configs.len(), "scheduler started");

        Ok(Self {
            tasks,
            cancel,
            stats,
        })
    }

    /// Returns a copy of the counters of every metric.
    pub fn stats(&self) -> BTreeMap<MetricId, TickStats> {
        self.stats
            .iter()
            .map(|(id, shared)| {
                let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                (id.clone(), *guard)
            })
            .collect()
    }

    /// Returns the token that stops every task when cancelled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the number of tasks that have not been reaped yet.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Stops every task, waiting at most `grace` for in-flight samples.
    ///
    /// Results of samples that finish during the grace period are discarded.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        self.cancel.cancel();

        let deadline = Instant::now() + grace;
        let mut finished = 0;
        while let Ok(Some(joined)) = time::timeout_at(deadline, self.tasks.join_next()).await {
            if let Err(err) = joined {
                warn!(error = %err, "sampling task ended abnormally");
            }
            finished += 1;
        }

        let abandoned = self.tasks.len();
        if abandoned > 0 {
            for (metric, stats) in self.stats() {
                if stats.phase == Phase::Sampling {
                    warn!(metric = %metric, ?grace, "abandoning in-flight sample");
                }
            }
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        for shared in self.stats.values() {
            update(shared, |s| s.phase = Phase::Stopped);
        }

        info!(finished, abandoned, "scheduler stopped");
        ShutdownReport { finished, abandoned }
    }
}

/// State owned by one metric's task.
struct MetricTask {
    config: SamplerConfig,
    sampler: Box<dyn Sampler>,
    events: EventSender,
    cancel: CancellationToken,
    stats: SharedStats,
    clock: Clock,
}

impl MetricTask {
    async fn run(mut self) {
        let metric = self.config.metric.clone();
        let interval = self.config.interval;
        let mut ticker = time::interval_at(self.clock.origin, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut next_index: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            let due = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                due = ticker.tick() => due,
            };

            let index = tick_index(self.clock.origin, due, interval);
            let skipped = index.saturating_sub(next_index);
            next_index = index + 1;
            if skipped > 0 {
                debug!(metric = %metric, skipped, "skipped ticks while sampling");
            }
            update(&self.stats, |s| {
                s.ticks += 1;
                s.skipped += skipped;
                s.phase = Phase::Sampling;
            });

            let reading = self.sample_once().await;
            update(&self.stats, |s| s.phase = Phase::Idle);

            if self.cancel.is_cancelled() {
                debug!(metric = %metric, "discarding reading finished after shutdown");
                break;
            }

            let timed_out = reading.error().is_some_and(SamplerError::is_timeout);
            let status = match reading.error() {
                None => {
                    let recovered = consecutive_failures >= self.config.failure_threshold;
                    consecutive_failures = 0;
                    recovered.then(|| StatusChange::Recovered {
                        metric: metric.clone(),
                    })
                }
                Some(err) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(metric = %metric, error = %err, consecutive_failures, "sample failed");
                    (consecutive_failures == self.config.failure_threshold).then(|| {
                        StatusChange::Degraded {
                            metric: metric.clone(),
                            consecutive_failures,
                        }
                    })
                }
            };

            let ok = reading.is_ok();
            if !deliver(&self.events, &self.cancel, Event::Reading(reading)).await {
                break;
            }
            update(&self.stats, |s| {
                if ok {
                    s.delivered += 1;
                } else {
                    s.failed += 1;
                    s.timeouts += u64::from(timed_out);
                }
            });

            if let Some(change) = status {
                if !deliver(&self.events, &self.cancel, Event::Status(change)).await {
                    break;
                }
            }
        }

        update(&self.stats, |s| s.phase = Phase::Stopped);
        debug!(metric = %metric, "sampling task stopped");
    }

    /// Runs one sampler call under the configured timeout.
    async fn sample_once(&mut self) -> Reading {
        let metric = self.config.metric.clone();
        let timeout = self.config.timeout;
        let ctx = SampleContext::new(metric.clone(), timeout, self.cancel.child_token());

        let result = match time::timeout(timeout, self.sampler.sample(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(SamplerError::Timeout {
                metric: metric.to_string(),
                timeout,
            }),
        };

        debug!(metric = %metric, ok = result.is_ok(), "sample complete");
        Reading::from_result(metric, result, self.clock.now_ns())
    }
}

/// Sends an event unless shutdown starts first. Returns `false` if the task
/// should stop.
async fn deliver(events: &EventSender, cancel: &CancellationToken, event: Event) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

#[allow(clippy::cast_possible_truncation)] // Tick counts fit in u64
fn tick_index(origin: Instant, due: Instant, interval: Duration) -> u64 {
    let elapsed = due.saturating_duration_since(origin).as_nanos();
    let period = interval.as_nanos().max(1);
    (elapsed / period) as u64
}
