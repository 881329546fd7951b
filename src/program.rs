//! Compiled tensor programs.
//!
//! A [`TensorProgram`] is the lowered equivalent of one source model: an
//! ordered list of [`TensorModule`] steps wired by the topology's ports.
//! Running it evaluates the steps in topological order, holding each
//! node's output tensors until its consumers have read them.
//!
//! Programs expose the same prediction contract as the source model:
//! [`predict`](TensorProgram::predict) yields labels for classification
//! programs and predictions for regression programs;
//! [`predict_proba`](TensorProgram::predict_proba) yields per-class
//! probabilities and is only available on classification programs.

use std::fmt;

use ndarray::{Array1, Array2, ArrayView2};

use crate::ir::{InputBinding, NodeId, OpKind, PortRef};

/// Runtime failures of a compiled program.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("input has {actual} features but {expected} are required")]
    InputWidthMismatch { expected: usize, actual: usize },
    #[error("operator received {actual} inputs but expects {expected}")]
    InputArityMismatch { expected: usize, actual: usize },
    #[error("aggregation inputs disagree on shape: {first:?} vs {other:?}")]
    AggregateShapeMismatch {
        first: (usize, usize),
        other: (usize, usize),
    },
    #[error("program was compiled from a regressor and produces no probabilities")]
    NoProbabilities,
}

/// The lowered equivalent of one operator node.
///
/// Modules are stateless aside from the constant tensors captured from the
/// node's configuration, and are owned exclusively by their program.
pub trait TensorModule: Send + Sync + fmt::Debug {
    /// Evaluate the module on its input tensors (one per input port, in
    /// port order), producing one tensor per output port.
    fn forward(&self, inputs: &[ArrayView2<'_, f32>]) -> Result<Vec<Array2<f32>>, ExecutionError>;

    /// Number of output ports.
    fn n_outputs(&self) -> usize {
        1
    }
}

/// Pull the single input of a one-input module out of the port slice.
pub(crate) fn single_input<'a, 'b>(
    inputs: &'a [ArrayView2<'b, f32>],
) -> Result<&'a ArrayView2<'b, f32>, ExecutionError> {
    match inputs {
        [input] => Ok(input),
        _ => Err(ExecutionError::InputArityMismatch {
            expected: 1,
            actual: inputs.len(),
        }),
    }
}

/// What a program predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Regression,
    Classification { n_classes: usize },
}

/// One lowered step of a program.
#[derive(Debug)]
pub(crate) struct Step {
    pub node: NodeId,
    pub kind: OpKind,
    pub name: String,
    pub inputs: Vec<InputBinding>,
    pub module: Box<dyn TensorModule>,
}

/// A compiled, device-bound tensor program.
#[derive(Debug)]
pub struct TensorProgram {
    steps: Vec<Step>,
    outputs: Vec<PortRef>,
    input_width: Option<usize>,
    kind: ProgramKind,
    /// Dense node-id bound for the value store.
    n_nodes: usize,
}

impl TensorProgram {
    pub(crate) fn new(
        steps: Vec<Step>,
        outputs: Vec<PortRef>,
        input_width: Option<usize>,
        kind: ProgramKind,
        n_nodes: usize,
    ) -> Self {
        Self {
            steps,
            outputs,
            input_width,
            kind,
            n_nodes,
        }
    }

    /// What this program predicts.
    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    /// Number of lowered operator steps.
    pub fn n_steps(&self) -> usize {
        self.steps.len()
    }

    /// Operator kinds in execution order.
    pub fn step_kinds(&self) -> impl Iterator<Item = OpKind> + '_ {
        self.steps.iter().map(|s| s.kind)
    }

    /// Operator names in execution order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    /// Expected input width, when the conversion knew it.
    pub fn input_width(&self) -> Option<usize> {
        self.input_width
    }

    /// Evaluate the program, returning its raw output tensors.
    ///
    /// Classification programs return `[labels, probabilities]`, regression
    /// programs `[predictions]`.
    pub fn run(&self, x: ArrayView2<'_, f32>) -> Result<Vec<Array2<f32>>, ExecutionError> {
        if let Some(expected) = self.input_width {
            if x.ncols() != expected {
                return Err(ExecutionError::InputWidthMismatch {
                    expected,
                    actual: x.ncols(),
                });
            }
        }

        let mut values: Vec<Vec<Array2<f32>>> = (0..self.n_nodes).map(|_| Vec::new()).collect();
        for step in &self.steps {
            let inputs: Vec<ArrayView2<'_, f32>> = step
                .inputs
                .iter()
                .map(|binding| match binding {
                    InputBinding::External(_) => x.view(),
                    InputBinding::Port(port) => values[port.node][port.port].view(),
                })
                .collect();
            let outputs = step.module.forward(&inputs)?;
            debug_assert_eq!(outputs.len(), step.module.n_outputs(), "{}", step.name);
            values[step.node] = outputs;
        }

        Ok(self
            .outputs
            .iter()
            .map(|port| values[port.node][port.port].clone())
            .collect())
    }

    /// Predict like the source model's `predict`: class labels for
    /// classification programs, predicted values for regression programs.
    pub fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Array1<f32>, ExecutionError> {
        let outputs = self.run(x)?;
        Ok(outputs[0].column(0).to_owned())
    }

    /// Per-class probabilities, like the source model's `predict_proba`.
    pub fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>, ExecutionError> {
        match self.kind {
            ProgramKind::Classification { .. } => {
                let mut outputs = self.run(x)?;
                Ok(outputs.swap_remove(1))
            }
            ProgramKind::Regression => Err(ExecutionError::NoProbabilities),
        }
    }
}
