//! Probabilistic and deterministic sampling

use crate::error::{Result, ShipError};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the sampler decides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    /// Uniform draw against the sample rate
    #[default]
    Random,
    /// Exactly every `round(1 / rate)`-th call
    Fixed,
}

/// Admission gate keeping a fraction of entries
#[derive(Debug, Clone)]
pub struct Sampler {
    rate: f64,
    strategy: SamplingStrategy,
    /// Calls seen so far; never reset by admission decisions
    counter: u64,
    /// 0 = admit nothing
    interval: u64,
}

impl Sampler {
    /// Fails when `rate` is outside `[0, 1]` (or NaN)
    pub fn new(rate: f64, strategy: SamplingStrategy) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ShipError::ConfigValidation {
                field: "sample_rate",
                reason: format!("{} is outside [0, 1]", rate),
            });
        }
        let interval = if rate == 0.0 {
            0
        } else {
            (1.0 / rate).round() as u64
        };
        Ok(Self {
            rate,
            strategy,
            counter: 0,
            interval,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn strategy(&self) -> SamplingStrategy {
        self.strategy
    }

    /// Decide whether the next entry is kept
    pub fn should_sample(&mut self) -> bool {
        match self.strategy {
            SamplingStrategy::Random => {
                if self.rate >= 1.0 {
                    return true;
                }
                if self.rate <= 0.0 {
                    return false;
                }
                rand::thread_rng().gen::<f64>() < self.rate
            }
            SamplingStrategy::Fixed => {
                self.counter = self.counter.wrapping_add(1);
                self.interval != 0 && self.counter % self.interval == 0
            }
        }
    }
}
