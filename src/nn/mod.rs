//! Neural network building blocks: stages, models, loss and optimizers.

pub mod loss;
pub mod model;
pub mod optimizer;
pub mod stage;

pub use loss::{mse, mse_grad};
pub use model::{Model, ModelSpec, RecordedForward};
pub use optimizer::{Adam, Optimizer, Sgd};
pub use stage::{ActivationKind, Affine, LayerNorm, Stage, StageSpec, LAYER_NORM_EPS};
