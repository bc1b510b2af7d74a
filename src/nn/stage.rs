//! Model stages and their numeric kernels.
//!
//! A stage is one of three variants: an affine map `x · W + b`, a
//! parameter-free activation, or a layer normalization with learned
//! per-feature scale and shift. Parameters are stored as `Array2` so a
//! single optimizer code path serves every tensor; vectors are `(1, width)`
//! rows that broadcast over the batch.

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Variance floor used by layer normalization
pub const LAYER_NORM_EPS: f64 = 1e-5;

/// Parameter-free elementwise non-linearities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    /// Rectified Linear Unit: max(0, x)
    Relu,
}

impl ActivationKind {
    /// Apply the activation to a batch; NaN propagates
    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Relu => x.mapv(|v| if v > 0.0 || v.is_nan() { v } else { 0.0 }),
        }
    }

    /// Elementwise derivative evaluated at the activation input
    pub fn derivative(&self, x: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Relu => x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relu => write!(f, "ReLU"),
        }
    }
}

/// Descriptor of a single stage, used to build a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageSpec {
    /// Learned linear map plus bias
    Affine { in_width: usize, out_width: usize },
    /// Elementwise non-linearity
    Activation(ActivationKind),
    /// Per-sample normalization over `width` features
    Normalize { width: usize },
}

/// Dense affine stage: `output = input · weight + bias`
#[derive(Debug, Clone, PartialEq)]
pub struct Affine {
    /// Weight matrix (in_width x out_width)
    pub weight: Array2<f64>,
    /// Bias row (1 x out_width)
    pub bias: Array2<f64>,
}

impl Affine {
    /// Xavier/Glorot uniform weights, zero bias
    pub fn new<R: Rng + ?Sized>(in_width: usize, out_width: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (in_width + out_width) as f64).sqrt();
        let weight = Array2::random_using((in_width, out_width), Uniform::new(-limit, limit), rng);
        let bias = Array2::zeros((1, out_width));
        Self { weight, bias }
    }

    pub fn in_width(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_width(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weight) + &self.bias
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Layer normalization with learned scale (gamma) and shift (beta)
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNorm {
    /// Scale row (1 x width), starts at one
    pub gamma: Array2<f64>,
    /// Shift row (1 x width), starts at zero
    pub beta: Array2<f64>,
    pub eps: f64,
}

impl LayerNorm {
    pub fn new(width: usize) -> Self {
        Self {
            gamma: Array2::ones((1, width)),
            beta: Array2::zeros((1, width)),
            eps: LAYER_NORM_EPS,
        }
    }

    pub fn width(&self) -> usize {
        self.gamma.ncols()
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let (normalized, _) = normalize_rows(input, self.eps);
        &normalized * &self.gamma + &self.beta
    }

    pub fn num_parameters(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }
}

/// A built stage owning its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Affine(Affine),
    Activation(ActivationKind),
    Normalize(LayerNorm),
}

impl Stage {
    /// Inference forward pass for this stage
    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Affine(affine) => affine.forward(input),
            Self::Activation(kind) => kind.forward(input),
            Self::Normalize(norm) => norm.forward(input),
        }
    }

    /// Descriptor this stage was built from
    pub fn spec(&self) -> StageSpec {
        match self {
            Self::Affine(affine) => StageSpec::Affine {
                in_width: affine.in_width(),
                out_width: affine.out_width(),
            },
            Self::Activation(kind) => StageSpec::Activation(*kind),
            Self::Normalize(norm) => StageSpec::Normalize { width: norm.width() },
        }
    }

    pub fn num_parameters(&self) -> usize {
        match self {
            Self::Affine(affine) => affine.num_parameters(),
            Self::Activation(_) => 0,
            Self::Normalize(norm) => norm.num_parameters(),
        }
    }

    /// Parameters with their local names, in canonical order
    pub fn named_parameters(&self) -> Vec<(&'static str, &Array2<f64>)> {
        match self {
            Self::Affine(affine) => vec![("weight", &affine.weight), ("bias", &affine.bias)],
            Self::Activation(_) => Vec::new(),
            Self::Normalize(norm) => vec![("gamma", &norm.gamma), ("beta", &norm.beta)],
        }
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Array2<f64>> {
        match self {
            Self::Affine(affine) => vec![&mut affine.weight, &mut affine.bias],
            Self::Activation(_) => Vec::new(),
            Self::Normalize(norm) => vec![&mut norm.gamma, &mut norm.beta],
        }
    }
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Affine { in_width, out_width } => write!(f, "Affine({in_width} -> {out_width})"),
            Self::Activation(kind) => write!(f, "{kind}"),
            Self::Normalize { width } => write!(f, "LayerNorm({width})"),
        }
    }
}

/// Normalize every row to zero mean and unit variance.
///
/// Returns the normalized rows and the per-row `1 / sqrt(var + eps)`, which
/// the backward rule reuses. Variance is the biased (population) estimate.
pub fn normalize_rows(input: &Array2<f64>, eps: f64) -> (Array2<f64>, Array1<f64>) {
    let width = input.ncols() as f64;
    let mut normalized = input.clone();
    let mut inv_std = Array1::zeros(input.nrows());

    for (mut row, inv) in normalized.axis_iter_mut(Axis(0)).zip(inv_std.iter_mut()) {
        let mean = row.sum() / width;
        let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / width;
        *inv = 1.0 / (var + eps).sqrt();
        let scale = *inv;
        row.mapv_inplace(|v| (v - mean) * scale);
    }

    (normalized, inv_std)
}

/// Gradient of layer normalization with respect to its input.
///
/// `grad_normalized` is the upstream gradient already multiplied by gamma.
/// Per row: `dx = inv_std / D * (D * dx̂ - Σ dx̂ - x̂ * Σ (dx̂ · x̂))`.
pub fn normalize_rows_backward(
    grad_normalized: &Array2<f64>,
    normalized: &Array2<f64>,
    inv_std: &Array1<f64>,
) -> Array2<f64> {
    let width = normalized.ncols() as f64;
    let mut grad_input = Array2::zeros(normalized.raw_dim());

    for (((mut out, dxhat), xhat), &inv) in grad_input
        .axis_iter_mut(Axis(0))
        .zip(grad_normalized.axis_iter(Axis(0)))
        .zip(normalized.axis_iter(Axis(0)))
        .zip(inv_std.iter())
    {
        let sum_dxhat = dxhat.sum();
        let sum_dxhat_xhat = dxhat.dot(&xhat);
        for ((o, &d), &x) in out.iter_mut().zip(dxhat.iter()).zip(xhat.iter()) {
            *o = inv / width * (width * d - sum_dxhat - x * sum_dxhat_xhat);
        }
    }

    grad_input
}
