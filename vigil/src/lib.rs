//! # vigil
//!
//! Pluggable telemetry sampling and rendering core for live terminal
//! dashboards.
//!
//! vigil polls any number of metric sources on independent schedules, merges
//! their readings into one consistent state, and renders that state into
//! frames at its own pace. A slow or failing source delays only itself: its
//! ticks are skipped, its failures are counted and shown, and every other
//! metric keeps updating.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - At most one sample in flight per metric; late ticks are skipped, never queued
//! - Per-sample timeouts and failure thresholds; failures never stop the loop
//! - One serialized consumer merges readings and draws frames
//! - Immutable, cheaply shared snapshots (copy-on-write state)
//! - Rendering decoupled from sampling rates
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use vigil::{Aggregator, MetricId, Reading, Renderer, SamplerConfig, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cpu = MetricId::new("cpu.percent")?;
//! let mut aggregator = Aggregator::new(&[SamplerConfig::with_defaults(cpu.clone(), Duration::from_secs(1))?]);
//!
//! aggregator.merge(Reading::ok(cpu, Value::Percent(42.5), 1_700_000_000_000_000_000));
//!
//! let frame = Renderer::new("vigil").render(&aggregator.snapshot());
//! assert!(frame.to_text(10).contains("42.5%"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Sampler`] — One metric source, polled on demand
//! - [`Scheduler`] — One task per metric, fixed-origin ticks, timeouts, graceful shutdown
//! - [`Aggregator`] — Latest value, rolling history and failure streak per metric
//! - [`Snapshot`] — Immutable view handed to the renderer
//! - [`Renderer`] — `Snapshot -> Frame`, pure
//! - [`EventLoop`] — Serializes ticks, readings and input
//! - [`Dashboard`] — Wires everything together
//!
//! ## Modules
//!
//! - [`metric`] — Metric ids, values and readings
//! - [`config`] — Sampler and dashboard configuration
//! - [`history`] — Bounded rolling history and window statistics
//! - [`sampler`] — Sampler trait, adapters, registry and built-in OS samplers
//! - [`scheduler`] — Per-metric sampling tasks
//! - [`aggregator`] — State merging
//! - [`snapshot`] — Point-in-time views
//! - [`event`] — Event types and channel
//! - [`event_loop`] — The event loop
//! - [`render`] — Frames, primitives and sinks
//! - [`dashboard`] — Pipeline wiring
//! - [`error`] — Error types

pub mod aggregator;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod history;
pub mod metric;
pub mod render;
pub mod sampler;
pub mod scheduler;
pub mod snapshot;

// Re-export primary API types at crate root for convenience.
pub use aggregator::{Aggregator, MergeOutcome, MetricState};
pub use config::{DashboardConfig, SamplerConfig};
pub use dashboard::{Dashboard, RunSummary};
pub use error::{Result, VigilError};
pub use event::{Event, InputEvent, StatusChange};
pub use event_loop::{EventLoop, ExitReason};
pub use history::{History, Statistic};
pub use metric::{MetricId, Reading, Value};
pub use render::{Frame, FrameSink, Health, HostInfo, Primitive, Renderer, TextSink};
pub use sampler::{Blocking, BlockingSample, FnSampler, SampleContext, Sampler, SamplerRegistry};
pub use scheduler::{Scheduler, ShutdownReport, TickStats};
pub use snapshot::Snapshot;
