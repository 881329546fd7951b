//! Lowering: topology -> tensor program.
//!
//! [`compile`] drives the deterministic topological walk, resolving each
//! node's converter in the registry and assembling the emitted
//! [`TensorModule`]s into one [`TensorProgram`]. A converter failure is not
//! retried: it propagates immediately with the offending node's kind and
//! position, and no partial program is returned.

pub(crate) mod aggregate;
pub(crate) mod linear;
pub(crate) mod scaler;
pub(crate) mod trees;

use ndarray::Array2;

use crate::error::ConvertError;
use crate::ir::Topology;
use crate::options::{Device, ExtraConfig};
use crate::program::{ProgramKind, Step, TensorModule, TensorProgram};
use crate::registry::Registry;
use crate::transform::{sigmoid, OutputTransform};

/// Why a converter rejected its node's configuration.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("tree {tree} has no nodes")]
    EmptyTree { tree: usize },
    #[error("tree {tree}: node {node} references child {child} but the tree has {n_nodes} nodes")]
    ChildOutOfRange {
        tree: usize,
        node: usize,
        child: i32,
        n_nodes: usize,
    },
    #[error(
        "tree {tree}: node {node} splits on feature {feature} but the input width is {n_features}"
    )]
    SplitIndexOutOfRange {
        tree: usize,
        node: usize,
        feature: u32,
        n_features: usize,
    },
    #[error("tree {tree} uses categorical splits, which are not supported")]
    CategoricalSplit { tree: usize },
    #[error("tree {tree}: node {node} is reachable through more than one path")]
    NodeRevisited { tree: usize, node: usize },
    #[error("tree {tree}: {field} has {actual} entries but the tree has {expected} nodes")]
    ArrayLenMismatch {
        tree: usize,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("tree {tree}: expected {expected} node values, got {actual}")]
    ValuesLenMismatch {
        tree: usize,
        expected: usize,
        actual: usize,
    },
    #[error("tree {tree} is assigned to group {group} but the ensemble has {n_groups} groups")]
    GroupOutOfRange {
        tree: usize,
        group: u32,
        n_groups: usize,
    },
    #[error("scaler offset length {offset} does not match scale length {scale}")]
    ScalerLenMismatch { offset: usize, scale: usize },
    #[error("expected {expected} intercepts for {columns} margin columns, got {actual}")]
    InterceptLenMismatch {
        expected: usize,
        columns: usize,
        actual: usize,
    },
    #[error("expected {expected} base scores for {columns} margin columns, got {actual}")]
    BaseScoreLenMismatch {
        expected: usize,
        columns: usize,
        actual: usize,
    },
    #[error("ensemble declares {tree_groups} group assignments for {n_trees} trees")]
    TreeGroupsLenMismatch { tree_groups: usize, n_trees: usize },
    #[error("node carries a {actual} configuration but the converter expects {expected}")]
    ConfigMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

pub(crate) fn config_mismatch(expected: &'static str, actual: &crate::ir::OpConfig) -> OpError {
    use crate::ir::OpConfig;
    let actual = match actual {
        OpConfig::Scaler(_) => "scaler",
        OpConfig::Linear(_) => "linear",
        OpConfig::TreeEnsemble(_) => "tree_ensemble",
        OpConfig::Aggregate(_) => "aggregate",
    };
    OpError::ConfigMismatch { expected, actual }
}

/// Compile a topology into a tensor program for `device`.
pub fn compile(
    topology: &Topology,
    device: Device,
    extra: &ExtraConfig,
    registry: &Registry,
) -> Result<TensorProgram, ConvertError> {
    let order = topology.topological_order()?;

    let mut steps = Vec::with_capacity(order.len());
    for (position, &id) in order.iter().enumerate() {
        let node = topology.node(id);
        let converter = registry.resolve(node.kind)?;
        let module: Box<dyn TensorModule> =
            converter(node, device, extra).map_err(|source| ConvertError::Lowering {
                kind: node.kind,
                position,
                source,
            })?;
        tracing::debug!(kind = %node.kind, name = %node.name, position, "lowered operator");
        steps.push(Step {
            node: id,
            kind: node.kind,
            name: node.name.clone(),
            inputs: node.inputs.clone(),
            module,
        });
    }

    Ok(TensorProgram::new(
        steps,
        topology.outputs().to_vec(),
        topology.input_width(),
        program_kind(topology),
        topology.n_nodes(),
    ))
}

/// A program predicts classes when its terminal node emits
/// `[labels, probabilities]`.
fn program_kind(topology: &Topology) -> ProgramKind {
    let terminal = match topology.outputs().first() {
        Some(port) => topology.node(port.node),
        None => return ProgramKind::Regression,
    };
    match terminal.n_classes() {
        Some(n_classes) if terminal.n_outputs == 2 => ProgramKind::Classification { n_classes },
        _ => ProgramKind::Regression,
    }
}

// =============================================================================
// Shared classifier post-processing
// =============================================================================

/// Turn margin columns into `[labels, probabilities]`.
///
/// Sigmoid margins are a single column expanded to `[1-p, p]`; identity
/// margins are taken as already-normalized probabilities (averaged leaf
/// distributions), expanded the same way when they are a single column.
pub(crate) fn classification_outputs(
    mut margins: Array2<f32>,
    transform: OutputTransform,
) -> (Array2<f32>, Array2<f32>) {
    let proba = match transform {
        OutputTransform::Sigmoid => {
            debug_assert_eq!(margins.ncols(), 1, "sigmoid expects one margin column");
            two_column(&margins, sigmoid)
        }
        OutputTransform::Softmax => {
            let n_outputs = margins.ncols();
            let buf = margins
                .as_slice_mut()
                .expect("freshly built margins are standard layout");
            transform.transform_inplace(buf, n_outputs);
            margins
        }
        OutputTransform::Identity => {
            if margins.ncols() == 1 {
                two_column(&margins, |m| m)
            } else {
                margins
            }
        }
    };

    let labels = argmax_rows(&proba);
    (labels, proba)
}

fn two_column(margins: &Array2<f32>, f: impl Fn(f32) -> f32) -> Array2<f32> {
    let n = margins.nrows();
    let mut proba = Array2::zeros((n, 2));
    for i in 0..n {
        let p = f(margins[[i, 0]]);
        proba[[i, 0]] = 1.0 - p;
        proba[[i, 1]] = p;
    }
    proba
}

fn argmax_rows(proba: &Array2<f32>) -> Array2<f32> {
    let n = proba.nrows();
    let mut labels = Array2::zeros((n, 1));
    for (i, row) in proba.rows().into_iter().enumerate() {
        let mut best = 0usize;
        let mut best_value = f32::NEG_INFINITY;
        for (j, &v) in row.iter().enumerate() {
            if v > best_value {
                best = j;
                best_value = v;
            }
        }
        labels[[i, 0]] = best as f32;
    }
    labels
}
