//! Mean squared error loss and its gradient

use ndarray::Array2;

use crate::error::{NnError, Result};

/// Mean Squared Error: `(1 / (N * D)) * Σ (target - prediction)²`
pub fn mse(prediction: &Array2<f64>, target: &Array2<f64>) -> Result<f64> {
    check_shapes(prediction, target)?;
    let diff = target - prediction;
    Ok((&diff * &diff).sum() / prediction.len() as f64)
}

/// Gradient of MSE w.r.t. predictions: `(2 / (N * D)) * (prediction - target)`
pub fn mse_grad(prediction: &Array2<f64>, target: &Array2<f64>) -> Result<Array2<f64>> {
    check_shapes(prediction, target)?;
    let n = prediction.len() as f64;
    Ok((prediction - target) * (2.0 / n))
}

fn check_shapes(prediction: &Array2<f64>, target: &Array2<f64>) -> Result<()> {
    if prediction.shape() != target.shape() {
        return Err(NnError::dimension(target.shape(), prediction.shape()));
    }
    if prediction.is_empty() {
        return Err(NnError::InvalidSampleCount(0));
    }
    Ok(())
}
