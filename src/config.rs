//! Configuration for data simulation, optimization and training.
//!
//! Every section has tutorial defaults and a `validate()` that rejects
//! out-of-domain hyperparameters before any work starts.

use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};

/// Full experiment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Number of simulated samples
    pub samples: usize,
    /// Width of every hidden block
    pub hidden_width: usize,
    /// Number of `[affine, ReLU, normalize]` blocks before the output stage
    pub hidden_blocks: usize,
    /// Seed for data simulation and parameter initialization
    pub seed: u64,
    /// Synthetic data parameters
    pub simulation: SimulationConfig,
    /// Adam hyperparameters
    pub adam: AdamConfig,
    /// Training loop settings
    pub training: TrainingConfig,
}

/// Synthetic regression data: `target = slope * state + noise`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Coefficient applied to the standard-normal state
    pub slope: f64,
    /// Standard deviation of the additive Gaussian noise
    pub noise_std: f64,
}

/// Adam optimizer hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    /// Step size (alpha)
    pub learning_rate: f64,
    /// Decay rate of the first moment estimate
    pub beta1: f64,
    /// Decay rate of the second moment estimate
    pub beta2: f64,
    /// Numerical stability constant
    pub epsilon: f64,
}

/// Training loop settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of full-batch epochs to run
    pub epochs: usize,
    /// Record and log the loss every N completed epochs
    pub log_every: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            samples: 1000,
            hidden_width: 32,
            hidden_blocks: 2,
            seed: 42,
            simulation: SimulationConfig::default(),
            adam: AdamConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            slope: 0.5,
            noise_std: 0.25,
        }
    }
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            log_every: 100,
        }
    }
}

impl ExperimentConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        if self.samples == 0 {
            return Err(NnError::InvalidSampleCount(self.samples));
        }
        if self.hidden_width == 0 {
            return Err(NnError::config("hidden_width must be positive"));
        }
        self.simulation.validate()?;
        self.adam.validate()?;
        self.training.validate()
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.slope.is_finite() {
            return Err(NnError::config(format!("slope must be finite, got {}", self.slope)));
        }
        if !self.noise_std.is_finite() || self.noise_std < 0.0 {
            return Err(NnError::config(format!(
                "noise_std must be finite and non-negative, got {}",
                self.noise_std
            )));
        }
        Ok(())
    }
}

impl AdamConfig {
    /// Adam with default decay rates and the given learning rate
    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(NnError::config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(NnError::config(format!("{name} must be in [0, 1), got {beta}")));
            }
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(NnError::config(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

impl TrainingConfig {
    pub fn new(epochs: usize, log_every: usize) -> Self {
        Self { epochs, log_every }
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_every == 0 {
            return Err(NnError::config("log_every must be positive"));
        }
        Ok(())
    }

    /// Number of loss records a full run produces
    pub fn expected_records(&self) -> usize {
        if self.log_every == 0 {
            0
        } else {
            self.epochs / self.log_every
        }
    }
}
