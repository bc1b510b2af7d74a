//! Synthetic sample batches for regression experiments.
//!
//! The simulator draws `state ~ N(0, 1)` and `target = slope * state + noise`
//! with `noise ~ N(0, noise_std)`. Seeded simulators are deterministic; an
//! entropy-seeded one reproduces the unseeded behaviour of the tutorial.

use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Normal, StandardNormal};

use crate::config::SimulationConfig;
use crate::error::{NnError, Result};

/// Paired inputs `(N, in_width)` and targets `(N, out_width)`
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    inputs: Array2<f64>,
    targets: Array2<f64>,
}

impl SampleBatch {
    /// Pair inputs with targets; both need the same positive row count and
    /// only finite values
    pub fn new(inputs: Array2<f64>, targets: Array2<f64>) -> Result<Self> {
        if inputs.nrows() != targets.nrows() {
            return Err(NnError::dimension(
                &[inputs.nrows(), targets.ncols()],
                targets.shape(),
            ));
        }
        if inputs.nrows() == 0 {
            return Err(NnError::InvalidSampleCount(0));
        }
        for (name, values) in [("inputs", &inputs), ("targets", &targets)] {
            if let Some(row) = values
                .outer_iter()
                .position(|row| row.iter().any(|v| !v.is_finite()))
            {
                return Err(NnError::NonFiniteValue(format!("{name} row {row}")));
            }
        }
        Ok(Self { inputs, targets })
    }

    pub fn inputs(&self) -> &Array2<f64> {
        &self.inputs
    }

    pub fn targets(&self) -> &Array2<f64> {
        &self.targets
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn input_width(&self) -> usize {
        self.inputs.ncols()
    }

    pub fn target_width(&self) -> usize {
        self.targets.ncols()
    }

    pub fn into_parts(self) -> (Array2<f64>, Array2<f64>) {
        (self.inputs, self.targets)
    }
}

/// Random source for synthetic regression data
#[derive(Debug, Clone)]
pub struct DataSimulator {
    config: SimulationConfig,
    noise: Normal<f64>,
    rng: StdRng,
}

impl DataSimulator {
    /// Deterministic simulator for the given seed
    pub fn new(config: SimulationConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    /// Simulator seeded from OS entropy; repeated runs differ
    pub fn from_entropy(config: SimulationConfig) -> Result<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    fn with_rng(config: SimulationConfig, rng: StdRng) -> Result<Self> {
        config.validate()?;
        let noise = Normal::new(0.0, config.noise_std)
            .map_err(|e| NnError::config(format!("noise distribution: {e}")))?;
        Ok(Self { config, noise, rng })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// `n` samples of `target = slope * state + noise`, both `(n, 1)`
    pub fn linear_targets(&mut self, n: usize) -> Result<SampleBatch> {
        if n == 0 {
            return Err(NnError::InvalidSampleCount(n));
        }
        let state: Array2<f64> = Array2::random_using((n, 1), StandardNormal, &mut self.rng);
        let noise: Array2<f64> = Array2::random_using((n, 1), self.noise, &mut self.rng);
        let target = &state * self.config.slope + noise;
        SampleBatch::new(state, target)
    }

    /// Standard-normal inputs and targets of arbitrary widths
    pub fn gaussian_batch(
        &mut self,
        n: usize,
        in_width: usize,
        out_width: usize,
    ) -> Result<SampleBatch> {
        if n == 0 {
            return Err(NnError::InvalidSampleCount(n));
        }
        if in_width == 0 || out_width == 0 {
            return Err(NnError::config(format!(
                "batch widths must be positive, got {in_width} -> {out_width}"
            )));
        }
        let inputs = Array2::random_using((n, in_width), StandardNormal, &mut self.rng);
        let targets = Array2::random_using((n, out_width), StandardNormal, &mut self.rng);
        SampleBatch::new(inputs, targets)
    }
}

/// Simulate `n` linear-target samples with a fresh seeded simulator
pub fn simulate(n: usize, config: SimulationConfig, seed: u64) -> Result<SampleBatch> {
    DataSimulator::new(config, seed)?.linear_targets(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_shapes() {
        let batch = simulate(100, SimulationConfig::default(), 1).unwrap();
        assert_eq!(batch.len(), 100);
        assert_eq!(batch.inputs().dim(), (100, 1));
        assert_eq!(batch.targets().dim(), (100, 1));
    }

    #[test]
    fn test_same_seed_same_data() {
        let a = simulate(50, SimulationConfig::default(), 7).unwrap();
        let b = simulate(50, SimulationConfig::default(), 7).unwrap();
        let c = simulate(50, SimulationConfig::default(), 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_zero_samples_rejected() {
        assert_eq!(
            simulate(0, SimulationConfig::default(), 1),
            Err(NnError::InvalidSampleCount(0))
        );
        let mut sim = DataSimulator::new(SimulationConfig::default(), 1).unwrap();
        assert!(sim.gaussian_batch(0, 4, 2).is_err());
        assert!(sim.gaussian_batch(3, 0, 2).is_err());
    }

    #[test]
    fn test_noise_free_targets_are_exact() {
        let config = SimulationConfig {
            slope: 0.5,
            noise_std: 0.0,
        };
        let batch = simulate(20, config, 3).unwrap();
        for (x, y) in batch.inputs().iter().zip(batch.targets().iter()) {
            assert_abs_diff_eq!(*y, 0.5 * x, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_residual_statistics() {
        let batch = simulate(20_000, SimulationConfig::default(), 11).unwrap();
        let residuals: Vec<f64> = batch
            .inputs()
            .iter()
            .zip(batch.targets().iter())
            .map(|(x, y)| y - 0.5 * x)
            .collect();
        let n = residuals.len() as f64;
        let mean = residuals.iter().sum::<f64>() / n;
        let std = (residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
        assert!(mean.abs() < 0.01, "residual mean {mean} too far from 0");
        assert!((std - 0.25).abs() < 0.01, "residual std {std} too far from 0.25");

        let state_mean = batch.inputs().mean().unwrap_or(0.0);
        assert!(state_mean.abs() < 0.03, "state mean {state_mean} too far from 0");
    }

    #[test]
    fn test_negative_noise_rejected() {
        let config = SimulationConfig {
            slope: 0.5,
            noise_std: -0.1,
        };
        assert!(matches!(
            DataSimulator::new(config, 0),
            Err(NnError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sample_batch_validation() {
        let err = SampleBatch::new(Array2::zeros((3, 4)), Array2::zeros((2, 2))).unwrap_err();
        assert!(matches!(err, NnError::DimensionMismatch { .. }));
        assert_eq!(
            SampleBatch::new(Array2::zeros((0, 4)), Array2::zeros((0, 2))),
            Err(NnError::InvalidSampleCount(0))
        );
    }

    #[test]
    fn test_non_finite_samples_rejected() {
        let err = SampleBatch::new(array![[f64::NAN], [1.0]], array![[0.0], [0.5]]).unwrap_err();
        assert_eq!(err, NnError::NonFiniteValue("inputs row 0".to_string()));

        let err = SampleBatch::new(array![[0.0], [1.0]], array![[0.0], [f64::INFINITY]]).unwrap_err();
        assert_eq!(err, NnError::NonFiniteValue("targets row 1".to_string()));
    }

    #[test]
    fn test_gaussian_batch_widths() {
        let mut sim = DataSimulator::new(SimulationConfig::default(), 5).unwrap();
        let batch = sim.gaussian_batch(16, 4, 2).unwrap();
        assert_eq!(batch.input_width(), 4);
        assert_eq!(batch.target_width(), 2);
        assert_eq!(batch.len(), 16);
    }
}
