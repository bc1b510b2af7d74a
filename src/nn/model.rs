//! Sequential model built from stage descriptors
//!
//! Widths are validated when the model is built, never on the first forward
//! call. The same model can run a plain inference pass or record itself on a
//! [`Tape`] for training.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::stage::{ActivationKind, Affine, LayerNorm, Stage, StageSpec};
use crate::autograd::{Tape, Var};
use crate::error::{NnError, Result};

/// Ordered list of stage descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    stages: Vec<StageSpec>,
}

impl ModelSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stages(stages: Vec<StageSpec>) -> Self {
        Self { stages }
    }

    /// Append an affine stage
    pub fn affine(mut self, in_width: usize, out_width: usize) -> Self {
        self.stages.push(StageSpec::Affine { in_width, out_width });
        self
    }

    /// Append a ReLU activation
    pub fn relu(mut self) -> Self {
        self.stages.push(StageSpec::Activation(ActivationKind::Relu));
        self
    }

    /// Append a layer normalization over `width` features
    pub fn normalize(mut self, width: usize) -> Self {
        self.stages.push(StageSpec::Normalize { width });
        self
    }

    /// `[affine, ReLU, normalize]` per hidden width, then a bare affine head
    pub fn regression(input: usize, hidden: &[usize], output: usize) -> Self {
        let mut spec = Self::new();
        let mut width = input;
        for &size in hidden {
            spec = spec.affine(width, size).relu().normalize(size);
            width = size;
        }
        spec.affine(width, output)
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Check adjacent widths; returns `(in_width, out_width)` of the stack
    pub fn validate(&self) -> Result<(usize, usize)> {
        if self.stages.is_empty() {
            return Err(NnError::EmptyModel);
        }

        let mut input_width: Option<usize> = None;
        let mut current: Option<usize> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let (stage_in, stage_out) = match *stage {
                StageSpec::Affine { in_width, out_width } => (Some(in_width), Some(out_width)),
                StageSpec::Activation(_) => (None, None),
                StageSpec::Normalize { width } => (Some(width), Some(width)),
            };

            if let Some(width) = stage_in {
                if width == 0 || stage_out == Some(0) {
                    return Err(NnError::shape(
                        format!("stage {index} ({stage})"),
                        &[1],
                        &[0],
                    ));
                }
                match current {
                    Some(flowing) if flowing != width => {
                        return Err(NnError::shape(
                            format!("stage {index} ({stage})"),
                            &[flowing],
                            &[width],
                        ));
                    }
                    Some(_) => {}
                    None => input_width = Some(width),
                }
            }
            if stage_out.is_some() {
                current = stage_out;
            }
        }

        match (input_width, current) {
            (Some(input), Some(output)) => Ok((input, output)),
            _ => Err(NnError::shape("model without affine or normalize stage", &[1], &[0])),
        }
    }
}

/// Stage outputs recorded on a tape during a training forward pass
#[derive(Debug, Clone)]
pub struct RecordedForward {
    /// Model output node
    pub output: Var,
    /// Parameter leaves in canonical order
    pub parameters: Vec<Var>,
}

/// Sequential stack of stages
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    stages: Vec<Stage>,
    in_width: usize,
    out_width: usize,
}

impl Model {
    /// Validate `spec` and initialize parameters from `seed`
    pub fn build(spec: &ModelSpec, seed: u64) -> Result<Self> {
        let (in_width, out_width) = spec.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);

        let stages: Vec<Stage> = spec
            .stages()
            .iter()
            .map(|stage| match *stage {
                StageSpec::Affine { in_width, out_width } => {
                    Stage::Affine(Affine::new(in_width, out_width, &mut rng))
                }
                StageSpec::Activation(kind) => Stage::Activation(kind),
                StageSpec::Normalize { width } => Stage::Normalize(LayerNorm::new(width)),
            })
            .collect();

        let model = Self {
            stages,
            in_width,
            out_width,
        };
        debug!(
            stages = model.stages.len(),
            in_width,
            out_width,
            parameters = model.num_parameters(),
            "built model"
        );
        Ok(model)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn in_width(&self) -> usize {
        self.in_width
    }

    pub fn out_width(&self) -> usize {
        self.out_width
    }

    /// Descriptor list this model was built from
    pub fn spec(&self) -> ModelSpec {
        ModelSpec::from_stages(self.stages.iter().map(Stage::spec).collect())
    }

    /// True when the last stage is a bare affine map, so outputs are unbounded
    pub fn has_regression_head(&self) -> bool {
        matches!(self.stages.last(), Some(Stage::Affine(_)))
    }

    /// Inference pass: `(N, in_width)` -> `(N, out_width)`
    pub fn forward(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_input(input)?;
        let mut output = input.clone();
        for stage in &self.stages {
            output = stage.forward(&output);
        }
        Ok(output)
    }

    /// Training pass recorded on `tape`, starting from the `input` node
    pub fn record(&self, tape: &mut Tape, input: Var) -> Result<RecordedForward> {
        self.check_input(tape.value(input))?;

        let mut x = input;
        let mut parameters = Vec::with_capacity(self.stages.len() * 2);

        for stage in &self.stages {
            x = match stage {
                Stage::Affine(affine) => {
                    let weight = tape.leaf(affine.weight.clone());
                    let bias = tape.leaf(affine.bias.clone());
                    parameters.extend([weight, bias]);
                    let product = tape.matmul(x, weight)?;
                    tape.add_row(product, bias)?
                }
                Stage::Activation(kind) => tape.activation(x, *kind),
                Stage::Normalize(norm) => {
                    let gamma = tape.leaf(norm.gamma.clone());
                    let beta = tape.leaf(norm.beta.clone());
                    parameters.extend([gamma, beta]);
                    tape.layer_norm(x, gamma, beta, norm.eps)?
                }
            };
        }

        Ok(RecordedForward {
            output: x,
            parameters,
        })
    }

    fn check_input(&self, input: &Array2<f64>) -> Result<()> {
        if input.ncols() != self.in_width {
            return Err(NnError::shape("model input", &[self.in_width], &[input.ncols()]));
        }
        Ok(())
    }

    /// Total number of trainable scalars
    pub fn num_parameters(&self) -> usize {
        self.stages.iter().map(Stage::num_parameters).sum()
    }

    /// Parameters in canonical order
    pub fn parameters(&self) -> Vec<&Array2<f64>> {
        self.named_parameters().into_iter().map(|(_, p)| p).collect()
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Array2<f64>> {
        self.stages
            .iter_mut()
            .flat_map(Stage::parameters_mut)
            .collect()
    }

    /// Parameters named `"{stage}.{weight|bias|gamma|beta}"`
    pub fn named_parameters(&self) -> Vec<(String, &Array2<f64>)> {
        self.stages
            .iter()
            .enumerate()
            .flat_map(|(i, stage)| {
                stage
                    .named_parameters()
                    .into_iter()
                    .map(move |(name, param)| (format!("{i}.{name}"), param))
            })
            .collect()
    }

    pub fn parameter_shapes(&self) -> Vec<(usize, usize)> {
        self.parameters().iter().map(|p| p.dim()).collect()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<6} {:<22} {:>12} {:>8}", "Stage", "Kind", "Output", "Params")?;
        writeln!(f, "{}", "-".repeat(51))?;

        let mut width = self.in_width;
        for (index, stage) in self.stages.iter().enumerate() {
            let spec = stage.spec();
            if let StageSpec::Affine { out_width, .. } = spec {
                width = out_width;
            }
            writeln!(
                f,
                "{:<6} {:<22} {:>12} {:>8}",
                index,
                spec.to_string(),
                format!("(N, {width})"),
                stage.num_parameters()
            )?;
        }

        writeln!(f, "{}", "-".repeat(51))?;
        write!(f, "Total parameters: {}", self.num_parameters())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tutorial_spec() -> ModelSpec {
        ModelSpec::regression(1, &[32, 32], 1)
    }

    #[test]
    fn test_regression_spec_layout() {
        let spec = tutorial_spec();
        assert_eq!(
            spec.stages(),
            &[
                StageSpec::Affine { in_width: 1, out_width: 32 },
                StageSpec::Activation(ActivationKind::Relu),
                StageSpec::Normalize { width: 32 },
                StageSpec::Affine { in_width: 32, out_width: 32 },
                StageSpec::Activation(ActivationKind::Relu),
                StageSpec::Normalize { width: 32 },
                StageSpec::Affine { in_width: 32, out_width: 1 },
            ]
        );
    }

    #[test]
    fn test_build_and_forward_shapes() {
        let model = Model::build(&tutorial_spec(), 1).unwrap();
        assert_eq!(model.in_width(), 1);
        assert_eq!(model.out_width(), 1);
        assert!(model.has_regression_head());

        for n in [1, 7, 64] {
            let output = model.forward(&Array2::ones((n, 1))).unwrap();
            assert_eq!(output.dim(), (n, 1));
        }
    }

    #[test]
    fn test_parameter_count() {
        let model = Model::build(&tutorial_spec(), 1).unwrap();
        // 64 + 64 + 1056 + 64 + 33
        assert_eq!(model.num_parameters(), 1281);
        assert_eq!(model.parameters().len(), 10);
        assert_eq!(model.parameter_shapes()[0], (1, 32));
        assert_eq!(model.parameter_shapes()[1], (1, 32));
        assert_eq!(model.parameter_shapes()[4], (32, 32));
    }

    #[test]
    fn test_named_parameters() {
        let model = Model::build(&ModelSpec::new().affine(4, 2).relu().normalize(2), 3).unwrap();
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["0.weight", "0.bias", "2.gamma", "2.beta"]);
    }

    #[test]
    fn test_width_mismatch_fails_at_build() {
        let spec = ModelSpec::new().affine(1, 32).relu().affine(16, 1);
        let err = Model::build(&spec, 0).unwrap_err();
        assert_eq!(
            err,
            NnError::ShapeMismatch {
                context: "stage 2 (Affine(16 -> 1))".to_string(),
                expected: vec![32],
                actual: vec![16],
            }
        );

        let spec = ModelSpec::new().affine(4, 8).normalize(4);
        assert!(matches!(Model::build(&spec, 0), Err(NnError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_degenerate_specs() {
        assert_eq!(Model::build(&ModelSpec::new(), 0), Err(NnError::EmptyModel));
        assert!(matches!(
            Model::build(&ModelSpec::new().relu(), 0),
            Err(NnError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            Model::build(&ModelSpec::new().affine(0, 3), 0),
            Err(NnError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_leading_activation_takes_next_width() {
        let model = Model::build(&ModelSpec::new().relu().affine(3, 2), 0).unwrap();
        assert_eq!(model.in_width(), 3);
        assert!(!Model::build(&ModelSpec::new().affine(3, 2).relu(), 0)
            .unwrap()
            .has_regression_head());
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let a = Model::build(&tutorial_spec(), 99).unwrap();
        let b = Model::build(&tutorial_spec(), 99).unwrap();
        let c = Model::build(&tutorial_spec(), 100).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_forward_rejects_wrong_input_width() {
        let model = Model::build(&ModelSpec::new().affine(4, 2), 0).unwrap();
        assert!(matches!(
            model.forward(&Array2::zeros((3, 5))),
            Err(NnError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_record_matches_forward() {
        let model = Model::build(&tutorial_spec(), 5).unwrap();
        let input = Array2::from_shape_fn((6, 1), |(i, _)| i as f64 - 2.5);

        let mut tape = Tape::new();
        let x = tape.leaf(input.clone());
        let recorded = model.record(&mut tape, x).unwrap();

        assert_eq!(recorded.parameters.len(), model.parameters().len());
        assert_eq!(tape.value(recorded.output), &model.forward(&input).unwrap());
    }

    #[test]
    fn test_summary_lists_every_stage() {
        let model = Model::build(&tutorial_spec(), 0).unwrap();
        let summary = model.to_string();
        assert!(summary.contains("Affine(1 -> 32)"));
        assert!(summary.contains("LayerNorm(32)"));
        assert!(summary.ends_with("Total parameters: 1281"));
        assert_eq!(summary.lines().count(), 2 + 7 + 2);
    }

    #[test]
    fn test_spec_roundtrip_through_model() {
        let spec = tutorial_spec();
        let model = Model::build(&spec, 0).unwrap();
        assert_eq!(model.spec(), spec);

        let json = serde_json::to_string(&spec).unwrap();
        let parsed: ModelSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }
}
