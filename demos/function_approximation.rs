//! Fit a small feed-forward network to noisy linear data.
//!
//! Run with: `cargo run --example function_approximation`

use anyhow::Result;
use rust_nn_approximator::{experiment, ExperimentConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ExperimentConfig::default();
    info!("=== Function Approximation ===");
    info!(
        "target = {} * state + N(0, {})",
        config.simulation.slope, config.simulation.noise_std
    );

    let report = experiment::run(&config)?;

    println!("\n{}\n", report.session.model());
    println!("{:>8} {:>12}", "Epoch", "Loss");
    for record in report.history.records() {
        println!("{:>8} {:>12.6}", record.epoch, record.loss);
    }

    if let Some(improvement) = report.history.improvement() {
        println!("\nLoss reduced by {:.1}%", improvement * 100.0);
    }
    println!("Final training loss: {:.6}", report.final_loss()?);

    // The noise floor is noise_std^2
    println!(
        "Irreducible noise:   {:.6}",
        config.simulation.noise_std.powi(2)
    );

    Ok(())
}
