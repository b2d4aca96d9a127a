//! Resource utilization models.

use dyn_clone::{clone_trait_object, DynClone};
use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::core::error::ConfigError;

/// A utilization model is a function, which defines the fraction of resource capacity used by a cloudlet at the
/// given simulation time. Returned values are always within `[0, 1]`.
pub trait UtilizationModel: DynClone {
    fn utilization(&self, time: f64) -> f64;
}

clone_trait_object!(UtilizationModel);

/// Cloudlet always uses the whole resource.
#[derive(Clone, Default)]
pub struct FullUtilization;

impl FullUtilization {
    pub fn new() -> Self {
        Default::default()
    }
}

impl UtilizationModel for FullUtilization {
    fn utilization(&self, _time: f64) -> f64 {
        1.
    }
}

/// Cloudlet never uses the resource.
#[derive(Clone, Default)]
pub struct NullUtilization;

impl NullUtilization {
    pub fn new() -> Self {
        Default::default()
    }
}

impl UtilizationModel for NullUtilization {
    fn utilization(&self, _time: f64) -> f64 {
        0.
    }
}

/// Constant utilization.
#[derive(Clone)]
pub struct ConstantUtilization {
    load: f64,
}

impl ConstantUtilization {
    pub fn new(load: f64) -> Self {
        Self {
            load: load.clamp(0., 1.),
        }
    }
}

impl UtilizationModel for ConstantUtilization {
    fn utilization(&self, _time: f64) -> f64 {
        self.load
    }
}

/// Uniformly distributed random utilization.
///
/// The value depends only on the seed and the time, so repeated queries for the same time return the same value.
#[derive(Clone)]
pub struct StochasticUtilization {
    seed: u64,
}

impl StochasticUtilization {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl UtilizationModel for StochasticUtilization {
    fn utilization(&self, time: f64) -> f64 {
        let mut rng = Pcg64::seed_from_u64(self.seed ^ time.to_bits());
        rng.gen_range(0.0..=1.0)
    }
}

/// Utilization replayed from a trace sampled at a fixed interval.
///
/// Values between samples are linearly interpolated, the last sample is used after the end of the trace.
#[derive(Clone)]
pub struct TraceUtilization {
    interval: f64,
    samples: Vec<f64>,
}

impl TraceUtilization {
    pub fn new(interval: f64, samples: Vec<f64>) -> Result<Self, ConfigError> {
        if !(interval > 0.) {
            return Err(ConfigError::InvalidTrace {
                reason: format!("sampling interval must be positive, got {}", interval),
            });
        }
        if samples.is_empty() {
            return Err(ConfigError::InvalidTrace {
                reason: "trace has no samples".to_string(),
            });
        }
        let samples = samples.into_iter().map(|s| s.clamp(0., 1.)).collect();
        Ok(Self { interval, samples })
    }
}

impl UtilizationModel for TraceUtilization {
    fn utilization(&self, time: f64) -> f64 {
        let last = self.samples.len() - 1;
        let position = time.max(0.) / self.interval;
        if position >= last as f64 {
            return self.samples[last];
        }
        let index = (position.floor() as usize).min(last - 1);
        let fraction = position - index as f64;
        self.samples[index] + (self.samples[index + 1] - self.samples[index]) * fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_is_interpolated_between_samples() {
        let model = TraceUtilization::new(300., vec![0.2, 0.6, 1.4]).unwrap();
        assert_eq!(model.utilization(0.), 0.2);
        assert!((model.utilization(150.) - 0.4).abs() < 1e-12);
        assert_eq!(model.utilization(600.), 1.);
        assert_eq!(model.utilization(10_000.), 1.);
    }

    #[test]
    fn trace_handles_huge_times() {
        let model = TraceUtilization::new(300., vec![0.2, 0.6]).unwrap();
        assert_eq!(model.utilization(f64::INFINITY), 0.6);
        assert_eq!(model.utilization(f64::MAX), 0.6);
        assert_eq!(model.utilization(1e300), 0.6);

        let single = TraceUtilization::new(1., vec![0.3]).unwrap();
        assert_eq!(single.utilization(0.), 0.3);
        assert_eq!(single.utilization(f64::INFINITY), 0.3);
    }

    #[test]
    fn stochastic_utilization_is_stable_for_same_time() {
        let model = StochasticUtilization::new(123);
        let value = model.utilization(42.);
        assert!((0. ..=1.).contains(&value));
        assert_eq!(model.utilization(42.), value);
    }

    #[test]
    fn empty_trace_is_rejected() {
        assert!(TraceUtilization::new(1., vec![]).is_err());
        assert!(TraceUtilization::new(0., vec![0.5]).is_err());
    }
}
