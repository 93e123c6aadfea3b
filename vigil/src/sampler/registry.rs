//! Sampler registration.
//!
//! The [`SamplerRegistry`] maps each [`MetricId`] to the one sampler that owns
//! it. The scheduler consumes the registry at start-up and takes ownership of
//! every sampler.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RegistryError, Result};
use crate::metric::MetricId;

use super::Sampler;

/// Registry of samplers, one per metric.
///
/// # Thread Safety
///
/// The registry is built on one thread before the scheduler starts and is
/// moved into it; it is never shared.
#[derive(Default)]
pub struct SamplerRegistry {
    samplers: BTreeMap<MetricId, Box<dyn Sampler>>,
}

impl SamplerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the sampler owning `metric`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateSampler`] if `metric` already has a
    /// sampler. The existing registration is kept.
    pub fn register(&mut self, metric: MetricId, sampler: impl Sampler) -> Result<()> {
        self.register_boxed(metric, Box::new(sampler))
    }

    /// Registers an already boxed sampler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateSampler`] if `metric` already has a
    /// sampler.
    pub fn register_boxed(&mut self, metric: MetricId, sampler: Box<dyn Sampler>) -> Result<()> {
        if self.samplers.contains_key(&metric) {
            return Err(RegistryError::DuplicateSampler {
                metric: metric.to_string(),
            }
            .into());
        }
        self.samplers.insert(metric, sampler);
        Ok(())
    }

    /// Returns `true` if `metric` has a sampler.
    pub fn contains(&self, metric: &MetricId) -> bool {
        self.samplers.contains_key(metric)
    }

    /// Removes and returns the sampler for `metric`.
    pub fn take(&mut self, metric: &MetricId) -> Option<Box<dyn Sampler>> {
        self.samplers.remove(metric)
    }

    /// Iterates over the registered metrics in sorted order.
    pub fn metrics(&self) -> impl Iterator<Item = &MetricId> {
        self.samplers.keys()
    }

    /// Returns the number of registered samplers.
    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    /// Returns `true` if no sampler is registered.
    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }
}

impl fmt::Debug for SamplerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplerRegistry")
            .field("metrics", &self.samplers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VigilError;
    use crate::metric::Value;
    use crate::sampler::{FnSampler, SampleContext};

    fn constant(value: f64) -> Box<dyn Sampler> {
        Box::new(FnSampler::new(move |_: &SampleContext| Ok(Value::Gauge(value))))
    }

    #[test]
    fn test_register_and_take() {
        let mut registry = SamplerRegistry::new();
        assert!(registry.is_empty());

        let cpu = MetricId::new("cpu.percent").unwrap();
        let mem = MetricId::new("mem.percent").unwrap();
        registry.register_boxed(mem.clone(), constant(1.0)).unwrap();
        registry.register(cpu.clone(), constant(2.0)).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&cpu));
        let metrics: Vec<_> = registry.metrics().map(MetricId::as_str).collect();
        assert_eq!(metrics, vec!["cpu.percent", "mem.percent"]);

        assert!(registry.take(&cpu).is_some());
        assert!(registry.take(&cpu).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = SamplerRegistry::new();
        let cpu = MetricId::new("cpu.percent").unwrap();
        registry.register(cpu.clone(), constant(1.0)).unwrap();

        let err = registry.register(cpu, constant(2.0)).unwrap_err();
        assert!(matches!(
            err,
            VigilError::Registry(RegistryError::DuplicateSampler { ref metric }) if metric == "cpu.percent"
        ));
        assert_eq!(registry.len(), 1);
    }
}
