//! Full-batch training loop.
//!
//! A [`TrainingSession`] owns a model together with the optimizer bound to
//! its parameters. Each epoch records the forward pass on a fresh tape,
//! differentiates the MSE loss, applies one optimizer step and drops the tape.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::autograd::Tape;
use crate::config::{AdamConfig, TrainingConfig};
use crate::data::SampleBatch;
use crate::error::{NnError, Result};
use crate::nn::model::Model;
use crate::nn::optimizer::{Adam, Optimizer};

/// Loss observed at a logged epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    /// 1-indexed epoch within the `fit` call that produced it
    pub epoch: usize,
    pub loss: f64,
}

/// Ordered loss history returned to the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    records: Vec<LossRecord>,
}

impl LossHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, epoch: usize, loss: f64) {
        self.records.push(LossRecord { epoch, loss });
    }

    pub fn records(&self) -> &[LossRecord] {
        &self.records
    }

    /// Loss values in recording order
    pub fn losses(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.loss).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<&LossRecord> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&LossRecord> {
        self.records.last()
    }

    /// Relative improvement from the first to the last record
    pub fn improvement(&self) -> Option<f64> {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) if first.loss > 0.0 => {
                Some((first.loss - last.loss) / first.loss)
            }
            _ => None,
        }
    }
}

/// A model and the optimizer bound to its parameters
#[derive(Debug, Clone)]
pub struct TrainingSession<O: Optimizer = Adam> {
    model: Model,
    optimizer: O,
    epochs_completed: usize,
}

impl TrainingSession<Adam> {
    /// Session with a fresh Adam optimizer bound to `model`
    pub fn with_adam(model: Model, config: AdamConfig) -> Result<Self> {
        let optimizer = Adam::for_model(config, &model)?;
        Ok(Self::new(model, optimizer))
    }
}

impl<O: Optimizer> TrainingSession<O> {
    pub fn new(model: Model, optimizer: O) -> Self {
        debug!(
            parameters = model.num_parameters(),
            learning_rate = optimizer.learning_rate(),
            "created training session"
        );
        Self {
            model,
            optimizer,
            epochs_completed: 0,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }

    /// Epochs run across every `step`/`fit` call on this session
    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    pub fn into_parts(self) -> (Model, O) {
        (self.model, self.optimizer)
    }

    /// Run one full-batch epoch and return the loss before the update
    pub fn step(&mut self, batch: &SampleBatch) -> Result<f64> {
        let mut tape = Tape::new();
        let input = tape.leaf(batch.inputs().clone());
        let recorded = self.model.record(&mut tape, input)?;
        let loss = tape.mse(recorded.output, batch.targets())?;
        let loss_value = tape.scalar(loss);

        let mut gradients = tape.backward(loss);
        let shapes = self.model.parameter_shapes();
        let grads: Vec<_> = recorded
            .parameters
            .iter()
            .zip(shapes)
            .map(|(&var, shape)| gradients.take_or_zeros(var, shape))
            .collect();
        drop(tape);

        let mut params = self.model.parameters_mut();
        self.optimizer.step(&mut params, &grads)?;
        self.epochs_completed += 1;
        Ok(loss_value)
    }

    /// Train for exactly `config.epochs` epochs
    pub fn fit(&mut self, batch: &SampleBatch, config: &TrainingConfig) -> Result<LossHistory> {
        self.run(batch, config, None)
    }

    /// Like [`fit`](Self::fit), but stops early once `stop` is set.
    ///
    /// The flag is polled between epochs only; an epoch in progress always
    /// completes.
    pub fn fit_until(
        &mut self,
        batch: &SampleBatch,
        config: &TrainingConfig,
        stop: &AtomicBool,
    ) -> Result<LossHistory> {
        self.run(batch, config, Some(stop))
    }

    fn run(
        &mut self,
        batch: &SampleBatch,
        config: &TrainingConfig,
        stop: Option<&AtomicBool>,
    ) -> Result<LossHistory> {
        config.validate()?;
        if batch.target_width() != self.model.out_width() {
            return Err(NnError::dimension(
                &[batch.len(), self.model.out_width()],
                batch.targets().shape(),
            ));
        }

        let mut history = LossHistory::new();
        for epoch in 1..=config.epochs {
            if stop.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                info!(epoch = epoch - 1, "training stopped");
                break;
            }

            let loss = self.step(batch)?;
            if epoch % config.log_every == 0 {
                info!(epoch, loss, "epoch {}/{}: loss = {:.6}", epoch, config.epochs, loss);
                history.push(epoch, loss);
            }
        }

        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::data::{simulate, DataSimulator};
    use crate::nn::model::ModelSpec;
    use crate::nn::optimizer::Sgd;

    fn small_session(seed: u64) -> TrainingSession {
        let model = Model::build(&ModelSpec::regression(1, &[8], 1), seed).unwrap();
        TrainingSession::with_adam(model, AdamConfig::default()).unwrap()
    }

    #[test]
    fn test_history_length_follows_log_interval() {
        let batch = simulate(64, SimulationConfig::default(), 0).unwrap();
        let mut session = small_session(0);
        let history = session.fit(&batch, &TrainingConfig::new(25, 5)).unwrap();

        assert_eq!(history.len(), 5);
        let epochs: Vec<usize> = history.records().iter().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![5, 10, 15, 20, 25]);
        assert_eq!(session.epochs_completed(), 25);
        assert_eq!(session.optimizer().steps(), 25);
    }

    #[test]
    fn test_zero_epochs_leaves_parameters_untouched() {
        let model = Model::build(&ModelSpec::new().affine(4, 2), 3).unwrap();
        let initial = model.clone();
        let mut sim = DataSimulator::new(SimulationConfig::default(), 3).unwrap();
        let batch = sim.gaussian_batch(10, 4, 2).unwrap();

        let mut session = TrainingSession::with_adam(model, AdamConfig::default()).unwrap();
        let history = session.fit(&batch, &TrainingConfig::new(0, 100)).unwrap();

        assert!(history.is_empty());
        assert_eq!(session.model(), &initial);
        assert_eq!(session.optimizer().steps(), 0);
    }

    #[test]
    fn test_refit_continues_from_current_parameters() {
        let batch = simulate(64, SimulationConfig::default(), 1).unwrap();
        let mut session = small_session(1);
        session.fit(&batch, &TrainingConfig::new(10, 10)).unwrap();
        let after_first = session.model().clone();

        session.fit(&batch, &TrainingConfig::new(10, 10)).unwrap();
        assert_ne!(session.model(), &after_first);
        assert_eq!(session.epochs_completed(), 20);
        assert_eq!(session.optimizer().steps(), 20);
    }

    #[test]
    fn test_step_reduces_loss_for_small_learning_rate() {
        let batch = simulate(128, SimulationConfig::default(), 2).unwrap();
        let mut decreased = 0;
        let trials = 20;

        for seed in 0..trials {
            let model = Model::build(&ModelSpec::regression(1, &[16, 16], 1), seed).unwrap();
            let mut session =
                TrainingSession::with_adam(model, AdamConfig::with_learning_rate(1e-6)).unwrap();
            let before = session.step(&batch).unwrap();
            let after = crate::nn::loss::mse(
                &session.model().forward(batch.inputs()).unwrap(),
                batch.targets(),
            )
            .unwrap();
            if after <= before {
                decreased += 1;
            }
        }

        assert!(decreased >= 18, "loss decreased in only {decreased}/{trials} trials");
    }

    #[test]
    fn test_stop_flag_checked_between_epochs() {
        let batch = simulate(32, SimulationConfig::default(), 4).unwrap();
        let mut session = small_session(4);

        let stop = AtomicBool::new(true);
        let history = session
            .fit_until(&batch, &TrainingConfig::new(50, 1), &stop)
            .unwrap();
        assert!(history.is_empty());
        assert_eq!(session.epochs_completed(), 0);

        stop.store(false, Ordering::Relaxed);
        let history = session
            .fit_until(&batch, &TrainingConfig::new(3, 1), &stop)
            .unwrap();
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_mismatched_batch_is_rejected() {
        let mut session = small_session(5);
        let mut sim = DataSimulator::new(SimulationConfig::default(), 5).unwrap();

        let wide_inputs = sim.gaussian_batch(8, 3, 1).unwrap();
        assert!(matches!(
            session.fit(&wide_inputs, &TrainingConfig::new(1, 1)),
            Err(NnError::ShapeMismatch { .. })
        ));

        let wide_targets = sim.gaussian_batch(8, 1, 2).unwrap();
        assert!(matches!(
            session.fit(&wide_targets, &TrainingConfig::new(1, 1)),
            Err(NnError::DimensionMismatch { .. })
        ));
        assert_eq!(session.epochs_completed(), 0);
    }

    #[test]
    fn test_zero_log_interval_rejected() {
        let batch = simulate(8, SimulationConfig::default(), 6).unwrap();
        let mut session = small_session(6);
        assert!(matches!(
            session.fit(&batch, &TrainingConfig::new(10, 0)),
            Err(NnError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sgd_session_trains() {
        let batch = simulate(128, SimulationConfig::default(), 7).unwrap();
        let model = Model::build(&ModelSpec::regression(1, &[8], 1), 7).unwrap();
        let optimizer = Sgd::for_model(0.05, &model).unwrap();
        let mut session = TrainingSession::new(model, optimizer);

        let history = session.fit(&batch, &TrainingConfig::new(200, 50)).unwrap();
        let losses = history.losses();
        assert_eq!(losses.len(), 4);
        assert!(losses[3] < losses[0]);
    }

    #[test]
    fn test_improvement() {
        let mut history = LossHistory::new();
        assert_eq!(history.improvement(), None);
        history.push(1, 2.0);
        history.push(2, 0.5);
        assert_eq!(history.improvement(), Some(0.75));
    }
}
