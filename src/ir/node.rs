//! IR operator nodes.
//!
//! One [`OperatorNode`] represents one sub-model's computation. Its
//! [`OpKind`] tag selects the registered converter at lowering time; its
//! [`OpConfig`] payload carries the structural parameters the converter
//! captures into constant tensors (thresholds, leaf values, coefficients).

use std::fmt;

use ndarray::{Array1, Array2};

use crate::source::{ComparisonOp, SourceTree};
use crate::transform::OutputTransform;

/// Index of a node inside its [`Topology`](super::Topology).
pub type NodeId = usize;

/// A producer output port: `port` of the node `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRef {
    pub node: NodeId,
    pub port: usize,
}

/// Where one input port of a node reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBinding {
    /// The program's external input tensor with the given index.
    External(usize),
    /// Another node's output port.
    Port(PortRef),
}

// =============================================================================
// OpKind
// =============================================================================

/// The closed set of operator kinds the registry can resolve.
///
/// Lowering dispatches by tag lookup, never by inspecting configuration
/// payloads, so the supported set is exactly the variants listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    Scaler,
    LinearRegressor,
    LinearClassifier,
    TreeEnsembleRegressor,
    TreeEnsembleClassifier,
    Aggregator,
}

impl OpKind {
    /// Stable name used for node naming and error messages.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Scaler => "scaler",
            OpKind::LinearRegressor => "linear_regressor",
            OpKind::LinearClassifier => "linear_classifier",
            OpKind::TreeEnsembleRegressor => "tree_ensemble_regressor",
            OpKind::TreeEnsembleClassifier => "tree_ensemble_classifier",
            OpKind::Aggregator => "aggregator",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Per-kind configuration
// =============================================================================

/// Configuration for [`OpKind::Scaler`]: `y = (x - offset) * scale`.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    pub offset: Array1<f32>,
    pub scale: Array1<f32>,
}

/// Configuration for the linear kinds: `margins = x · coefficients +
/// intercepts`, with `coefficients` shaped `(n_features, n_columns)`.
#[derive(Debug, Clone)]
pub struct LinearConfig {
    pub coefficients: Array2<f32>,
    pub intercepts: Array1<f32>,
    pub transform: OutputTransform,
    /// `Some` for classifiers.
    pub n_classes: Option<usize>,
}

/// Configuration for the tree-ensemble kinds.
///
/// Margins accumulate into `n_groups * leaf_width` columns: boosted
/// ensembles use scalar leaves with one group per margin column, bagged
/// classification forests use a single group with `leaf_width == n_classes`
/// distribution leaves.
#[derive(Debug, Clone)]
pub struct TreeEnsembleConfig {
    pub trees: Vec<SourceTree>,
    /// Margin group per tree; must be `< n_groups`.
    pub tree_groups: Vec<u32>,
    pub n_groups: usize,
    pub leaf_width: usize,
    /// One entry per margin column.
    pub base_score: Vec<f32>,
    /// Average accumulated values over the trees of each group (bagging)
    /// instead of summing them (boosting).
    pub average: bool,
    pub comparison: ComparisonOp,
    pub transform: OutputTransform,
    /// `Some` for classifiers.
    pub n_classes: Option<usize>,
}

/// How an [`OpKind::Aggregator`] combines its member inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMode {
    /// Element-wise mean; emits one tensor.
    Mean,
    /// Mean of member class probabilities, labels re-derived by argmax;
    /// emits `[labels, probabilities]`.
    SoftVote,
}

/// Configuration for [`OpKind::Aggregator`].
#[derive(Debug, Clone)]
pub struct AggregateConfig {
    pub mode: AggregateMode,
    pub n_members: usize,
    /// `Some` when soft-voting.
    pub n_classes: Option<usize>,
}

/// Operator-specific configuration payload.
#[derive(Debug, Clone)]
pub enum OpConfig {
    Scaler(ScalerConfig),
    Linear(LinearConfig),
    TreeEnsemble(TreeEnsembleConfig),
    Aggregate(AggregateConfig),
}

// =============================================================================
// OperatorNode
// =============================================================================

/// One IR node.
#[derive(Debug, Clone)]
pub struct OperatorNode {
    /// Registry dispatch tag.
    pub kind: OpKind,
    /// Unique, human-readable name (used in diagnostics).
    pub name: String,
    /// Input bindings in port order.
    pub inputs: Vec<InputBinding>,
    /// Declared output-port count.
    pub n_outputs: usize,
    /// Structural parameters captured from the source model fragment.
    pub config: OpConfig,
}

impl OperatorNode {
    /// Number of classes this node predicts, for classifier-shaped nodes.
    pub fn n_classes(&self) -> Option<usize> {
        match &self.config {
            OpConfig::Linear(c) => c.n_classes,
            OpConfig::TreeEnsemble(c) => c.n_classes,
            OpConfig::Aggregate(c) => c.n_classes,
            OpConfig::Scaler(_) => None,
        }
    }
}
