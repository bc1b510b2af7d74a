//! Optimization Algorithms
//!
//! - Adam (Adaptive Moment Estimation)
//! - SGD with optional momentum
//!
//! Both validate every parameter and gradient shape before touching any
//! state, so a rejected step leaves parameters and moments unchanged.

use ndarray::Array2;

use super::model::Model;
use crate::config::AdamConfig;
use crate::error::{NnError, Result};

/// Optimizer trait for parameter updates
pub trait Optimizer {
    /// Apply one update using one gradient per parameter, in the same order
    fn step(&mut self, params: &mut [&mut Array2<f64>], grads: &[Array2<f64>]) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, learning_rate: f64);

    /// Number of successful steps taken
    fn steps(&self) -> u64;
}

/// Check params and grads against the shapes an optimizer was bound to
fn check_shapes(
    bound: &[(usize, usize)],
    params: &[&mut Array2<f64>],
    grads: &[Array2<f64>],
) -> Result<()> {
    if params.len() != bound.len() {
        return Err(NnError::shape("parameter count", &[bound.len()], &[params.len()]));
    }
    if grads.len() != bound.len() {
        return Err(NnError::shape("gradient count", &[bound.len()], &[grads.len()]));
    }
    for (index, ((&shape, param), grad)) in bound.iter().zip(params).zip(grads).enumerate() {
        let expected = [shape.0, shape.1];
        if param.dim() != shape {
            return Err(NnError::shape(format!("parameter {index}"), &expected, param.shape()));
        }
        if grad.dim() != shape {
            return Err(NnError::shape(format!("gradient {index}"), &expected, grad.shape()));
        }
    }
    Ok(())
}

/// Adam optimizer with per-parameter moment estimates
#[derive(Debug, Clone)]
pub struct Adam {
    pub config: AdamConfig,
    t: u64,
    m: Vec<Array2<f64>>,
    v: Vec<Array2<f64>>,
}

impl Adam {
    /// Bind zeroed moments to parameters of the given shapes
    pub fn new(config: AdamConfig, shapes: &[(usize, usize)]) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            t: 0,
            m: shapes.iter().map(|&shape| Array2::zeros(shape)).collect(),
            v: shapes.iter().map(|&shape| Array2::zeros(shape)).collect(),
        })
    }

    /// Bind to every parameter of `model`
    pub fn for_model(config: AdamConfig, model: &Model) -> Result<Self> {
        Self::new(config, &model.parameter_shapes())
    }

    pub fn first_moments(&self) -> &[Array2<f64>] {
        &self.m
    }

    pub fn second_moments(&self) -> &[Array2<f64>] {
        &self.v
    }

    /// Zero the moments and the step counter
    pub fn reset(&mut self) {
        self.t = 0;
        self.m.iter_mut().for_each(|m| m.fill(0.0));
        self.v.iter_mut().for_each(|v| v.fill(0.0));
    }

    fn bound_shapes(&self) -> Vec<(usize, usize)> {
        self.m.iter().map(Array2::dim).collect()
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Array2<f64>], grads: &[Array2<f64>]) -> Result<()> {
        check_shapes(&self.bound_shapes(), params, grads)?;
        self.t += 1;

        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let exponent = i32::try_from(self.t).unwrap_or(i32::MAX);
        let bias_correction1 = 1.0 - beta1.powi(exponent);
        let bias_correction2 = 1.0 - beta2.powi(exponent);

        for (((param, grad), m), v) in params
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            // m <- b1*m + (1-b1)*g ; v <- b2*v + (1-b2)*g^2
            m.zip_mut_with(grad, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
            v.zip_mut_with(grad, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

            ndarray::Zip::from(&mut **param)
                .and(&*m)
                .and(&*v)
                .for_each(|p, &m_t, &v_t| {
                    let m_hat = m_t / bias_correction1;
                    let v_hat = v_t / bias_correction2;
                    *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
                });
        }

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.config.learning_rate = learning_rate;
    }

    fn steps(&self) -> u64 {
        self.t
    }
}

/// Stochastic Gradient Descent with optional momentum
#[derive(Debug, Clone)]
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    t: u64,
    velocity: Vec<Array2<f64>>,
}

impl Sgd {
    /// Plain SGD; the learning rate must be finite and positive
    pub fn new(learning_rate: f64, shapes: &[(usize, usize)]) -> Result<Self> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(NnError::config(format!(
                "learning_rate must be positive, got {learning_rate}"
            )));
        }
        Ok(Self {
            learning_rate,
            momentum: 0.0,
            t: 0,
            velocity: shapes.iter().map(|&shape| Array2::zeros(shape)).collect(),
        })
    }

    pub fn for_model(learning_rate: f64, model: &Model) -> Result<Self> {
        Self::new(learning_rate, &model.parameter_shapes())
    }

    /// Momentum coefficient in `[0, 1)`
    pub fn with_momentum(mut self, momentum: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&momentum) {
            return Err(NnError::config(format!("momentum must be in [0, 1), got {momentum}")));
        }
        self.momentum = momentum;
        Ok(self)
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut Array2<f64>], grads: &[Array2<f64>]) -> Result<()> {
        let shapes: Vec<(usize, usize)> = self.velocity.iter().map(Array2::dim).collect();
        check_shapes(&shapes, params, grads)?;
        self.t += 1;

        let (lr, momentum) = (self.learning_rate, self.momentum);
        for ((param, grad), velocity) in params.iter_mut().zip(grads).zip(self.velocity.iter_mut()) {
            if momentum > 0.0 {
                velocity.zip_mut_with(grad, |v, &g| *v = momentum * *v - lr * g);
                **param += &*velocity;
            } else {
                param.scaled_add(-lr, grad);
            }
        }

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    fn steps(&self) -> u64 {
        self.t
    }
}
