//! Reverse-mode automatic differentiation over an explicit tape.
//!
//! Each forward operation appends a node holding its value and an op record
//! naming its inputs. `Tape::backward` replays the records in reverse creation
//! order and accumulates adjoints into every leaf. A tape belongs to a single
//! training step and is dropped when the step ends.

use ndarray::{Array1, Array2, Axis};

use crate::error::{NnError, Result};
use crate::nn::loss::mse;
use crate::nn::stage::{normalize_rows, normalize_rows_backward, ActivationKind};

/// Handle to a node on a tape, valid only for the tape that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var(usize);

impl Var {
    /// Position of the node in creation order
    pub fn index(self) -> usize {
        self.0
    }
}

/// Operation that produced a node
#[derive(Debug, Clone)]
enum Op {
    Leaf,
    MatMul {
        lhs: Var,
        rhs: Var,
    },
    /// Adds a `(1, cols)` row to every row of the input
    AddRow {
        input: Var,
        row: Var,
    },
    Activation {
        input: Var,
        kind: ActivationKind,
    },
    LayerNorm {
        input: Var,
        gamma: Var,
        beta: Var,
        normalized: Array2<f64>,
        inv_std: Array1<f64>,
    },
    Mse {
        prediction: Var,
        target: Array2<f64>,
    },
}

#[derive(Debug)]
struct Node {
    value: Array2<f64>,
    op: Op,
}

/// Ordered record of the forward computation
#[derive(Debug, Default)]
pub struct Tape {
    nodes: Vec<Node>,
}

/// Adjoints produced by a backward sweep, indexed by node
#[derive(Debug)]
pub struct Gradients {
    adjoints: Vec<Option<Array2<f64>>>,
}

impl Gradients {
    /// Gradient for `var`, `None` if it did not influence the output
    pub fn get(&self, var: Var) -> Option<&Array2<f64>> {
        self.adjoints.get(var.0).and_then(Option::as_ref)
    }

    /// Move the gradient out, falling back to zeros of `shape`
    pub fn take_or_zeros(&mut self, var: Var, shape: (usize, usize)) -> Array2<f64> {
        self.adjoints
            .get_mut(var.0)
            .and_then(Option::take)
            .unwrap_or_else(|| Array2::zeros(shape))
    }
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Value computed for `var`
    ///
    /// # Panics
    ///
    /// Panics if `var` was created by a different tape.
    pub fn value(&self, var: Var) -> &Array2<f64> {
        &self.nodes[var.0].value
    }

    /// Scalar value of a 1x1 node such as a loss
    ///
    /// # Panics
    ///
    /// Panics if `var` was created by a different tape.
    pub fn scalar(&self, var: Var) -> f64 {
        self.value(var)[[0, 0]]
    }

    fn push(&mut self, value: Array2<f64>, op: Op) -> Var {
        let index = self.nodes.len();
        self.nodes.push(Node { value, op });
        Var(index)
    }

    /// Record an input or parameter
    pub fn leaf(&mut self, value: Array2<f64>) -> Var {
        self.push(value, Op::Leaf)
    }

    /// Matrix product `lhs · rhs`
    pub fn matmul(&mut self, lhs: Var, rhs: Var) -> Result<Var> {
        let (a, b) = (self.value(lhs), self.value(rhs));
        if a.ncols() != b.nrows() {
            return Err(NnError::shape("matmul", &[a.ncols()], &[b.nrows()]));
        }
        let value = a.dot(b);
        Ok(self.push(value, Op::MatMul { lhs, rhs }))
    }

    /// Broadcast-add a `(1, cols)` row to each row of `input`
    pub fn add_row(&mut self, input: Var, row: Var) -> Result<Var> {
        let (x, r) = (self.value(input), self.value(row));
        if r.nrows() != 1 || r.ncols() != x.ncols() {
            return Err(NnError::shape("add_row", &[1, x.ncols()], r.shape()));
        }
        let value = x + r;
        Ok(self.push(value, Op::AddRow { input, row }))
    }

    pub fn activation(&mut self, input: Var, kind: ActivationKind) -> Var {
        let value = kind.forward(self.value(input));
        self.push(value, Op::Activation { input, kind })
    }

    /// Layer normalization of each row followed by `gamma * x̂ + beta`
    pub fn layer_norm(&mut self, input: Var, gamma: Var, beta: Var, eps: f64) -> Result<Var> {
        let x = self.value(input);
        let width = x.ncols();
        for (name, var) in [("layer_norm gamma", gamma), ("layer_norm beta", beta)] {
            let param = self.value(var);
            if param.dim() != (1, width) {
                return Err(NnError::shape(name, &[1, width], param.shape()));
            }
        }

        let (normalized, inv_std) = normalize_rows(x, eps);
        let value = &normalized * self.value(gamma) + self.value(beta);
        Ok(self.push(
            value,
            Op::LayerNorm {
                input,
                gamma,
                beta,
                normalized,
                inv_std,
            },
        ))
    }

    /// Mean squared error between `prediction` and a constant target
    pub fn mse(&mut self, prediction: Var, target: &Array2<f64>) -> Result<Var> {
        let loss = mse(self.value(prediction), target)?;
        Ok(self.push(
            Array2::from_elem((1, 1), loss),
            Op::Mse {
                prediction,
                target: target.clone(),
            },
        ))
    }

    /// Reverse sweep from `output`, seeding its adjoint with ones
    ///
    /// # Panics
    ///
    /// Panics if `output` was created by a different tape.
    pub fn backward(&self, output: Var) -> Gradients {
        let mut adjoints: Vec<Option<Array2<f64>>> = vec![None; self.nodes.len()];
        adjoints[output.0] = Some(Array2::ones(self.nodes[output.0].value.raw_dim()));

        for index in (0..=output.0).rev() {
            let node = &self.nodes[index];
            // leaves keep their adjoints for the caller
            if matches!(node.op, Op::Leaf) {
                continue;
            }
            let Some(grad) = adjoints[index].take() else {
                continue;
            };

            match &node.op {
                Op::Leaf => {}
                Op::MatMul { lhs, rhs } => {
                    let grad_lhs = grad.dot(&self.value(*rhs).t());
                    let grad_rhs = self.value(*lhs).t().dot(&grad);
                    accumulate(&mut adjoints, *lhs, grad_lhs);
                    accumulate(&mut adjoints, *rhs, grad_rhs);
                }
                Op::AddRow { input, row } => {
                    let grad_row = grad.sum_axis(Axis(0)).insert_axis(Axis(0));
                    accumulate(&mut adjoints, *row, grad_row);
                    accumulate(&mut adjoints, *input, grad);
                }
                Op::Activation { input, kind } => {
                    let local = kind.derivative(self.value(*input));
                    accumulate(&mut adjoints, *input, grad * local);
                }
                Op::LayerNorm {
                    input,
                    gamma,
                    beta,
                    normalized,
                    inv_std,
                } => {
                    let grad_gamma = (&grad * normalized).sum_axis(Axis(0)).insert_axis(Axis(0));
                    let grad_beta = grad.sum_axis(Axis(0)).insert_axis(Axis(0));
                    let grad_normalized = &grad * self.value(*gamma);
                    let grad_input = normalize_rows_backward(&grad_normalized, normalized, inv_std);
                    accumulate(&mut adjoints, *gamma, grad_gamma);
                    accumulate(&mut adjoints, *beta, grad_beta);
                    accumulate(&mut adjoints, *input, grad_input);
                }
                Op::Mse { prediction, target } => {
                    // shapes were checked when the node was recorded
                    let pred = self.value(*prediction);
                    let local = (pred - target) * (2.0 / pred.len() as f64);
                    accumulate(&mut adjoints, *prediction, local * grad[[0, 0]]);
                }
            }
        }

        Gradients { adjoints }
    }
}

fn accumulate(adjoints: &mut [Option<Array2<f64>>], var: Var, contribution: Array2<f64>) {
    let slot = &mut adjoints[var.0];
    match slot.as_mut() {
        Some(existing) => *existing += &contribution,
        None => *slot = Some(contribution),
    }
}
