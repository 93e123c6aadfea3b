//! Wiring of the whole pipeline.
//!
//! A [`Dashboard`] connects the scheduler, render timer, input source and
//! event loop through one bounded channel, runs until the loop exits, then
//! shuts the scheduler down within the configured grace period.
//!
//! ```text
//! Scheduler ──Reading/Status──┐
//! render timer ──Tick─────────┼──> channel ──> EventLoop ──Frame──> FrameSink
//! input source ──Input────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use std::time::Duration;
//! use vigil::{Dashboard, DashboardConfig, SamplerConfig, SamplerRegistry, TextSink};
//! use vigil::event::{Event, InputEvent};
//! use vigil::metric::{MetricId, Value};
//! use vigil::sampler::{FnSampler, SampleContext};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cpu = MetricId::new("cpu.percent")?;
//! let config = DashboardConfig::new(vec![SamplerConfig::with_defaults(cpu.clone(), Duration::from_millis(100))?])?;
//!
//! let mut registry = SamplerRegistry::new();
//! registry.register(cpu, FnSampler::new(|_: &SampleContext| Ok(Value::Percent(12.5))))?;
//!
//! let summary = Dashboard::new(config, registry)?
//!     .run(TextSink::new(std::io::sink()), |events, _cancel| {
//!         tokio::spawn(async move {
//!             tokio::time::sleep(Duration::from_millis(350)).await;
//!             let _ = events.send(Event::Input(InputEvent::Quit)).await;
//!         });
//!     })
//!     .await?;
//! assert!(summary.frames_rendered >= 1);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::config::DashboardConfig;
use crate::error::{ConfigError, Result};
use crate::event::{self, Event, EventSender};
use crate::event_loop::{EventLoop, ExitReason};
use crate::metric::MetricId;
use crate::render::{FrameSink, HostInfo, Renderer};
use crate::sampler::SamplerRegistry;
use crate::scheduler::{Scheduler, ShutdownReport, TickStats};
use crate::snapshot::Snapshot;

/// Outcome of [`Dashboard::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Why the event loop stopped.
    pub exit: ExitReason,
    /// Frames drawn to the sink.
    pub frames_rendered: u64,
    /// How the scheduler shut down.
    pub shutdown: ShutdownReport,
    /// Per-metric schedule counters at the time the loop stopped.
    pub stats: BTreeMap<MetricId, TickStats>,
    /// Aggregated state at the time the loop stopped.
    pub snapshot: Snapshot,
}

/// A configured, not yet running dashboard.
#[derive(Debug)]
pub struct Dashboard {
    config: DashboardConfig,
    registry: SamplerRegistry,
    host: Option<HostInfo>,
}

impl Dashboard {
    /// Creates a dashboard from a configuration and its samplers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or a
    /// configured metric has no sampler in `registry`.
    pub fn new(config: DashboardConfig, registry: SamplerRegistry) -> Result<Self> {
        config.validate()?;
        if let Some(missing) = config.metrics().find(|m| !registry.contains(m)) {
            return Err(ConfigError::MissingSampler {
                metric: missing.to_string(),
            }
            .into());
        }
        Ok(Self {
            config,
            registry,
            host: None,
        })
    }

    /// Shows `host` under the title of every frame.
    #[must_use]
    pub fn with_host_info(mut self, host: HostInfo) -> Self {
        self.host = Some(host);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Runs until the user quits, a shutdown event arrives, or every event
    /// sender is gone.
    ///
    /// `input` is called once with a sender into the event channel and the
    /// run's cancellation token; it should start whatever produces
    /// [`Event::Input`] and [`Event::Shutdown`] events and return promptly.
    /// The token is cancelled when the run ends.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`](crate::error::RenderError) if the sink fails.
    /// The scheduler is shut down before the error is returned.
    pub async fn run<S, F>(self, sink: S, input: F) -> Result<RunSummary>
    where
        S: FrameSink,
        F: FnOnce(EventSender, CancellationToken),
    {
        let Self {
            config,
            registry,
            host,
        } = self;
        let (tx, mut rx) = event::channel(config.channel_capacity);
        let cancel = CancellationToken::new();

        let scheduler = Scheduler::start(&config.samplers, registry, tx.clone(), cancel.clone())?;
        let ticker = tokio::spawn(render_ticks(tx.clone(), config.render_interval, cancel.clone()));
        input(tx.clone(), cancel.clone());
        drop(tx);

        info!(
            metrics = config.samplers.len(),
            render_interval = ?config.render_interval,
            "dashboard running"
        );

        let mut renderer = Renderer::new(config.title.clone());
        if let Some(host) = host {
            renderer = renderer.with_host(host);
        }
        let mut event_loop = EventLoop::new(Aggregator::new(&config.samplers), renderer, sink);
        let exit = event_loop.run(&mut rx).await;

        cancel.cancel();
        drop(rx);
        let stats = scheduler.stats();
        let shutdown = scheduler.shutdown(config.shutdown_grace).await;
        ticker.abort();

        let exit = exit?;
        let frames_rendered = event_loop.frames_rendered();
        let snapshot = event_loop.snapshot();
        info!(?exit, frames_rendered, ?shutdown, "dashboard stopped");

        Ok(RunSummary {
            exit,
            frames_rendered,
            shutdown,
            stats,
            snapshot,
        })
    }
}

/// Sends a tick every `period`. Ticks are dropped, not queued, while the
/// channel is full.
async fn render_ticks(events: EventSender, period: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => match events.try_send(Event::Tick) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("event channel full, dropping tick"),
                Err(TrySendError::Closed(_)) => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerConfig;
    use crate::error::VigilError;
    use crate::metric::Value;
    use crate::render::TextSink;
    use crate::sampler::{FnSampler, SampleContext};

    fn config(names: &[&str]) -> DashboardConfig {
        DashboardConfig::new(
            names
                .iter()
                .map(|n| SamplerConfig::with_defaults(MetricId::new(n).unwrap(), Duration::from_secs(1)).unwrap())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_requires_samplers() {
        let err = Dashboard::new(config(&["cpu.percent"]), SamplerRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            VigilError::Config(ConfigError::MissingSampler { ref metric }) if metric == "cpu.percent"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_event_stops_run() {
        let mut registry = SamplerRegistry::new();
        registry
            .register(
                MetricId::new("cpu.percent").unwrap(),
                FnSampler::new(|_: &SampleContext| Ok(Value::Percent(1.0))),
            )
            .unwrap();

        let dashboard = Dashboard::new(config(&["cpu.percent"]), registry).unwrap();
        let summary = dashboard
            .run(TextSink::new(Vec::new()), |events, _cancel| {
                tokio::spawn(async move {
                    time::sleep(Duration::from_secs(5)).await;
                    let _ = events.send(Event::Shutdown).await;
                });
            })
            .await
            .unwrap();

        assert_eq!(summary.exit, ExitReason::Shutdown);
        assert!(summary.frames_rendered >= 1);
        assert_eq!(summary.shutdown.abandoned, 0);
        let stats = summary.stats[&MetricId::new("cpu.percent").unwrap()];
        assert!((5..=6).contains(&stats.ticks), "{stats:?}");
    }
}
