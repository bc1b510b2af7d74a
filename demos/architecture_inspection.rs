//! Build models from stage descriptors and inspect their parameters.
//!
//! Run with: `cargo run --example architecture_inspection`

use anyhow::Result;
use rust_nn_approximator::{
    experiment::regression_spec, AdamConfig, DataSimulator, ExperimentConfig, Model, ModelSpec,
    SimulationConfig, TrainingConfig, TrainingSession,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Tutorial architecture
    let spec = regression_spec(&ExperimentConfig::default());
    let model = Model::build(&spec, 42)?;
    println!("{model}\n");

    for (name, param) in model.named_parameters() {
        println!("{:<12} {:?}", name, param.dim());
    }

    // A single affine stage trained for zero epochs keeps its parameters
    let linear = Model::build(&ModelSpec::new().affine(4, 2), 7)?;
    let mut simulator = DataSimulator::new(SimulationConfig::default(), 7)?;
    let batch = simulator.gaussian_batch(16, 4, 2)?;

    let mut session = TrainingSession::with_adam(linear.clone(), AdamConfig::default())?;
    let history = session.fit(&batch, &TrainingConfig::new(0, 100))?;
    info!(
        records = history.len(),
        unchanged = session.model() == &linear,
        "zero-epoch run"
    );

    // Mismatched widths are rejected at build time
    let broken = ModelSpec::new().affine(4, 8).normalize(6);
    match Model::build(&broken, 0) {
        Ok(_) => println!("unexpectedly built {broken:?}"),
        Err(e) => println!("\nRejected invalid spec: {e}"),
    }

    Ok(())
}
