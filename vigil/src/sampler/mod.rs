//! Sampler interface and adapters.
//!
//! A [`Sampler`] wraps exactly one metric source and produces one [`Value`]
//! per call. The scheduler owns every sampler, calls it at most once at a time
//! per metric, and enforces the configured timeout around each call; the
//! sampler itself never sees a timeout as anything but its future being
//! dropped.
//!
//! # Adapters
//!
//! - [`FnSampler`] turns a closure into a sampler
//! - [`Blocking`] runs a synchronous [`BlockingSample`] source (typically an
//!   OS call) on the blocking thread pool
//!
//! # Example
//!
//! ```rust
//! use vigil::error::SamplerError;
//! use vigil::metric::Value;
//! use vigil::sampler::{FnSampler, SamplerRegistry};
//! use vigil::metric::MetricId;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = SamplerRegistry::new();
//! let mut calls = 0.0;
//! registry.register(
//!     MetricId::new("demo.counter")?,
//!     FnSampler::new(move |_ctx| {
//!         calls += 1.0;
//!         Ok::<_, SamplerError>(Value::Gauge(calls))
//!     }),
//! )?;
//! assert_eq!(registry.len(), 1);
//! # Ok(())
//! # }
//! ```

mod registry;
#[cfg(feature = "system")]
pub mod system;

pub use registry::SamplerRegistry;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SamplerError;
use crate::metric::{MetricId, Value};

/// A source of readings for one metric.
///
/// Implementations may suspend (`await`) freely. The scheduler drops the
/// returned future when the timeout elapses, so implementations must not rely
/// on running to completion.
#[async_trait]
pub trait Sampler: Send + 'static {
    /// Produces one value for the metric described by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`SamplerError`] when the underlying source fails. Errors are
    /// recorded as failed readings; they never stop the scheduler.
    async fn sample(&mut self, ctx: &SampleContext) -> Result<Value, SamplerError>;
}

#[async_trait]
impl Sampler for Box<dyn Sampler> {
    async fn sample(&mut self, ctx: &SampleContext) -> Result<Value, SamplerError> {
        (**self).sample(ctx).await
    }
}

/// Per-call context handed to a [`Sampler`].
#[derive(Debug, Clone)]
pub struct SampleContext {
    metric: MetricId,
    timeout: Duration,
    cancel: CancellationToken,
}

impl SampleContext {
    /// Creates a context for one sampling call.
    pub fn new(metric: MetricId, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            metric,
            timeout,
            cancel,
        }
    }

    /// Returns the metric being sampled.
    pub fn metric(&self) -> &MetricId {
        &self.metric
    }

    /// Returns how long the caller waits before reporting a timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns `true` once shutdown has started.
    ///
    /// Long-running samplers may poll this to stop early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the cancellation token for this call.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Builds a [`SamplerError::Source`] for this metric.
    pub fn source_error(&self, reason: impl Into<String>) -> SamplerError {
        SamplerError::Source {
            metric: self.metric.to_string(),
            reason: reason.into(),
        }
    }
}

/// A sampler backed by a synchronous closure.
///
/// Useful for tests and for embedding cheap in-process sources. The closure
/// must not block; wrap blocking sources in [`Blocking`] instead.
pub struct FnSampler<F> {
    f: F,
}

impl<F> FnSampler<F>
where
    F: FnMut(&SampleContext) -> Result<Value, SamplerError> + Send + 'static,
{
    /// Creates a sampler that calls `f` once per sample.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnSampler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSampler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Sampler for FnSampler<F>
where
    F: FnMut(&SampleContext) -> Result<Value, SamplerError> + Send + 'static,
{
    async fn sample(&mut self, ctx: &SampleContext) -> Result<Value, SamplerError> {
        (self.f)(ctx)
    }
}

/// A synchronous metric source, such as an OS query.
pub trait BlockingSample: Send + 'static {
    /// Reads one value. May block the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`SamplerError`] if the source cannot be read.
    fn sample_blocking(&mut self, metric: &MetricId) -> Result<Value, SamplerError>;
}

/// Runs a [`BlockingSample`] on tokio's blocking thread pool.
///
/// A blocking call cannot be interrupted. When the scheduler gives up on a
/// call after its timeout, the call keeps running and the adapter keeps its
/// join handle; the next [`Sampler::sample`] first waits for that call to
/// return and discards its stale value. At most one call per source is ever
/// running.
///
/// If the blocking call panics, the source is lost and every later call
/// returns [`SamplerError::Unavailable`].
pub struct Blocking<S> {
    /// The source, present while no call is running.
    source: Option<S>,
    /// The running (or abandoned) call, which hands the source back.
    running: Option<JoinHandle<(S, Result<Value, SamplerError>)>>,
}

impl<S: BlockingSample> Blocking<S> {
    /// Wraps a blocking source.
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
            running: None,
        }
    }

    /// Waits for the running call and takes the source back.
    ///
    /// Returns the call's own result, or [`SamplerError::Unavailable`] if it
    /// panicked.
    async fn join(&mut self, metric: &MetricId) -> Result<Value, SamplerError> {
        let Some(handle) = self.running.as_mut() else {
            return Err(lost(metric));
        };

        // Awaiting through `&mut` keeps the handle in place if this future is
        // dropped on timeout.
        let joined = handle.await;
        self.running = None;

        match joined {
            Ok((source, result)) => {
                self.source = Some(source);
                result
            }
            Err(err) => Err(SamplerError::Unavailable {
                metric: metric.to_string(),
                reason: format!("blocking call failed: {err}"),
            }),
        }
    }
}

fn lost(metric: &MetricId) -> SamplerError {
    SamplerError::Unavailable {
        metric: metric.to_string(),
        reason: "blocking source was lost".to_string(),
    }
}

impl<S> fmt::Debug for Blocking<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blocking")
            .field("idle", &self.source.is_some())
            .field("running", &self.running.is_some())
            .finish()
    }
}

#[async_trait]
impl<S: BlockingSample> Sampler for Blocking<S> {
    async fn sample(&mut self, ctx: &SampleContext) -> Result<Value, SamplerError> {
        let metric = ctx.metric();

        if self.running.is_some() {
            debug!(metric = %metric, "waiting for abandoned blocking call");
            // Its result belongs to a tick that was already reported.
            let _stale = self.join(metric).await;
        }

        let mut source = self.source.take().ok_or_else(|| lost(metric))?;
        let owned = metric.clone();
        self.running = Some(tokio::task::spawn_blocking(move || {
            let result = source.sample_blocking(&owned);
            (source, result)
        }));

        self.join(metric).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(name: &str) -> SampleContext {
        SampleContext::new(
            MetricId::new(name).unwrap(),
            Duration::from_millis(100),
            CancellationToken::new(),
        )
    }

    struct SlowSource {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
        calls: u32,
    }

    impl BlockingSample for SlowSource {
        fn sample_blocking(&mut self, _metric: &MetricId) -> Result<Value, SamplerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls += 1;
            Ok(Value::Gauge(f64::from(self.calls)))
        }
    }

    struct PanickingSource;

    impl BlockingSample for PanickingSource {
        fn sample_blocking(&mut self, _metric: &MetricId) -> Result<Value, SamplerError> {
            panic!("source exploded");
        }
    }

    #[tokio::test]
    async fn test_fn_sampler() {
        let mut sampler = FnSampler::new(|ctx: &SampleContext| {
            if ctx.is_cancelled() {
                Err(ctx.source_error("cancelled"))
            } else {
                Ok(Value::Percent(12.5))
            }
        });
        assert_eq!(sampler.sample(&ctx("cpu.percent")).await, Ok(Value::Percent(12.5)));
    }

    #[tokio::test]
    async fn test_boxed_sampler_delegates() {
        let mut sampler: Box<dyn Sampler> = Box::new(FnSampler::new(|_: &SampleContext| Ok(Value::Gauge(1.0))));
        assert_eq!(sampler.sample(&ctx("demo.gauge")).await, Ok(Value::Gauge(1.0)));
    }

    #[tokio::test]
    async fn test_blocking_returns_value() {
        let mut sampler = Blocking::new(SlowSource {
            in_flight: Arc::default(),
            peak: Arc::default(),
            delay: Duration::ZERO,
            calls: 0,
        });
        let ctx = ctx("demo.gauge");
        assert_eq!(sampler.sample(&ctx).await, Ok(Value::Gauge(1.0)));
        assert_eq!(sampler.sample(&ctx).await, Ok(Value::Gauge(2.0)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_never_overlaps_after_timeout() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut sampler = Blocking::new(SlowSource {
            in_flight: Arc::clone(&in_flight),
            peak: Arc::clone(&peak),
            delay: Duration::from_millis(50),
            calls: 0,
        });
        let ctx = ctx("demo.gauge");

        // Abandon the first call well before it returns.
        let abandoned = tokio::time::timeout(Duration::from_millis(5), sampler.sample(&ctx)).await;
        assert!(abandoned.is_err());

        // The next call waits for the abandoned one and discards its value.
        assert_eq!(sampler.sample(&ctx).await, Ok(Value::Gauge(2.0)));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blocking_panic_makes_sampler_unavailable() {
        let mut sampler = Blocking::new(PanickingSource);
        let ctx = ctx("demo.gauge");

        let first = sampler.sample(&ctx).await;
        assert!(matches!(first, Err(SamplerError::Unavailable { .. })));

        let second = sampler.sample(&ctx).await;
        assert!(matches!(second, Err(SamplerError::Unavailable { ref reason, .. }) if reason.contains("lost")));
    }
}
