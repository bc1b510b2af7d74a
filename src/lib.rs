//! # Rust NN Approximator
//!
//! Feed-forward neural networks used as function approximators, the building
//! block behind value and policy networks in deep reinforcement learning.
//!
//! ## Modules
//!
//! - `data` - Synthetic regression data simulator
//! - `nn` - Stages, sequential models, MSE loss and optimizers (Adam, SGD)
//! - `autograd` - Reverse-mode differentiation tape used during training
//! - `training` - Full-batch training session and loss history
//! - `experiment` - End-to-end simulate, build and train pipeline
//! - `config` - Hyperparameter sections with defaults and validation
//! - `error` - Error type shared by every module

pub mod autograd;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod nn;
pub mod training;

pub use config::{AdamConfig, ExperimentConfig, SimulationConfig, TrainingConfig};
pub use data::{simulate, DataSimulator, SampleBatch};
pub use error::{NnError, Result};
pub use experiment::{regression_spec, run, ExperimentReport};
pub use nn::{mse, ActivationKind, Adam, Model, ModelSpec, Optimizer, Sgd, Stage, StageSpec};
pub use training::{LossHistory, LossRecord, TrainingSession};
