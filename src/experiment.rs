//! End-to-end regression experiment: simulate, build, train.

use tracing::info;

use crate::config::ExperimentConfig;
use crate::data::{simulate, SampleBatch};
use crate::error::Result;
use crate::nn::loss::mse;
use crate::nn::model::{Model, ModelSpec};
use crate::training::{LossHistory, TrainingSession};

/// Outcome of [`run`]
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub history: LossHistory,
    pub session: TrainingSession,
    pub batch: SampleBatch,
}

impl ExperimentReport {
    /// Loss of the trained model on the training batch
    pub fn final_loss(&self) -> Result<f64> {
        let prediction = self.session.model().forward(self.batch.inputs())?;
        mse(&prediction, self.batch.targets())
    }
}

/// `hidden_blocks` x `[affine, ReLU, normalize]` followed by an affine head,
/// mapping one input feature to one target.
pub fn regression_spec(config: &ExperimentConfig) -> ModelSpec {
    let hidden = vec![config.hidden_width; config.hidden_blocks];
    ModelSpec::regression(1, &hidden, 1)
}

/// Seed for the data simulator
pub fn data_seed(seed: u64) -> u64 {
    seed
}

/// Seed for parameter initialization, distinct from the data stream
pub fn model_seed(seed: u64) -> u64 {
    seed.wrapping_add(1)
}

/// Simulate data, build the model and train it with Adam
pub fn run(config: &ExperimentConfig) -> Result<ExperimentReport> {
    config.validate()?;

    let batch = simulate(config.samples, config.simulation, data_seed(config.seed))?;
    let model = Model::build(&regression_spec(config), model_seed(config.seed))?;
    info!(
        samples = batch.len(),
        parameters = model.num_parameters(),
        epochs = config.training.epochs,
        "starting experiment"
    );

    let mut session = TrainingSession::with_adam(model, config.adam)?;
    let history = session.fit(&batch, &config.training)?;

    if let (Some(first), Some(last)) = (history.first(), history.last()) {
        info!(
            first = first.loss,
            last = last.loss,
            "training complete: {:.6} -> {:.6}",
            first.loss,
            last.loss
        );
    }

    Ok(ExperimentReport {
        history,
        session,
        batch,
    })
}
