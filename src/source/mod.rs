//! Source model representations.
//!
//! The types in this module describe *trained* models as plain data: they
//! are the crate's input contract, playing the role the original source
//! libraries' estimator objects play for their converters. Three families
//! are supported:
//!
//! - the estimator API in this module ([`SourceModel`] and its payload
//!   structs), covering single estimators, pipelines, and voting ensembles;
//! - the XGBoost JSON format ([`xgboost::XgbModel`]);
//! - the LightGBM text format ([`lightgbm::LgbModel`]).
//!
//! Foreign formats convert into the estimator API via `to_source()`, so the
//! parser only ever sees one representation.
//!
//! All types are `Clone + PartialEq`: conversion entry points take a
//! private clone before doing any work, and callers can diff their model
//! against a pre-conversion snapshot to confirm it was never touched.

pub mod lightgbm;
pub mod xgboost;

use serde::{Deserialize, Serialize};

// =============================================================================
// Tree structure
// =============================================================================

/// Which side of a split a feature value selects.
///
/// XGBoost-derived trees route left on `value < threshold`; scikit-learn
/// and LightGBM trees route left on `value <= threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComparisonOp {
    /// Left when `value < threshold`.
    LessThan,
    /// Left when `value <= threshold`.
    #[default]
    LessOrEqual,
}

/// Split kind for one tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitKind {
    #[default]
    Numeric,
    Categorical,
}

/// One decision tree as parallel per-node arrays.
///
/// Nodes are stored in breadth-first order with the root at index 0. A node
/// is a leaf when its left child is `-1`. `values` holds `leaf_width`
/// consecutive entries per node (width 1 for regression and boosted trees,
/// `n_classes` for classification trees carrying leaf class distributions);
/// entries for internal nodes are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTree {
    /// Left child index per node; `-1` marks a leaf.
    pub left_children: Vec<i32>,
    /// Right child index per node; `-1` marks a leaf.
    pub right_children: Vec<i32>,
    /// Split feature index per node; ignored at leaves.
    pub split_indices: Vec<u32>,
    /// Split threshold per node; ignored at leaves.
    pub split_conditions: Vec<f32>,
    /// Whether missing (NaN) values route left, per node.
    pub default_left: Vec<bool>,
    /// Node values, `leaf_width` entries per node.
    pub values: Vec<f32>,
    /// Per-node split kinds; `None` means all numeric.
    #[serde(default)]
    pub split_types: Option<Vec<SplitKind>>,
}

impl SourceTree {
    /// Number of nodes in the tree.
    pub fn n_nodes(&self) -> usize {
        self.left_children.len()
    }
}

// =============================================================================
// Estimator payloads
// =============================================================================

/// Standardizing feature transformer: `(x - mean) / scale` per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

/// Single-target linear regression: `x · coefficients + intercept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub coefficients: Vec<f32>,
    pub intercept: f32,
}

/// Logistic-regression classifier.
///
/// `coefficients` has one row per margin column: a single row for binary
/// classification (sigmoid), `n_classes` rows for multiclass (softmax).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coefficients: Vec<Vec<f32>>,
    pub intercepts: Vec<f32>,
    pub n_classes: usize,
}

/// Single regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeRegressor {
    pub tree: SourceTree,
    pub n_features: Option<usize>,
}

/// Single classification tree with leaf class distributions
/// (`leaf_width == n_classes`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeClassifier {
    pub tree: SourceTree,
    pub n_classes: usize,
    pub n_features: Option<usize>,
}

/// Bagged regression forest; predictions average over trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub trees: Vec<SourceTree>,
    pub n_features: Option<usize>,
}

/// Bagged classification forest; probabilities average the per-tree leaf
/// class distributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    pub trees: Vec<SourceTree>,
    pub n_classes: usize,
    pub n_features: Option<usize>,
}

/// Boosted regression ensemble; tree outputs sum on top of `base_score`.
/// Leaf values must already include any learning-rate shrinkage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    pub trees: Vec<SourceTree>,
    pub base_score: f32,
    pub n_features: Option<usize>,
    #[serde(default)]
    pub comparison: ComparisonOp,
}

/// Boosted classification ensemble.
///
/// Margins accumulate per class group (`tree_groups[t]` names the margin
/// column tree `t` contributes to; binary models use a single column).
/// `base_score` is in margin space, one entry per margin column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    pub trees: Vec<SourceTree>,
    pub tree_groups: Vec<u32>,
    pub n_classes: usize,
    pub base_score: Vec<f32>,
    pub n_features: Option<usize>,
    #[serde(default)]
    pub comparison: ComparisonOp,
}

/// Support-vector classifier. Representable so models can be described and
/// snapshotted, but not convertible: parsing fails with an unsupported-model
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportVectorClassifier {
    pub support_vectors: Vec<Vec<f32>>,
    pub dual_coefficients: Vec<Vec<f32>>,
    pub intercepts: Vec<f32>,
}

/// A named sub-model inside a pipeline or ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedModel {
    pub name: String,
    pub model: SourceModel,
}

impl NamedModel {
    pub fn new(name: impl Into<String>, model: SourceModel) -> Self {
        Self {
            name: name.into(),
            model,
        }
    }
}

/// Sequential pipeline: every step feeds the next, the last step produces
/// the output. All steps before the last must be feature transformers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub steps: Vec<NamedModel>,
}

/// Parallel regressor ensemble; member predictions are averaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingRegressor {
    pub members: Vec<NamedModel>,
}

/// Parallel classifier ensemble with soft voting: member class
/// probabilities are averaged and labels re-derived by argmax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingClassifier {
    pub members: Vec<NamedModel>,
}

// =============================================================================
// SourceModel
// =============================================================================

/// A trained model description accepted by the conversion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceModel {
    StandardScaler(StandardScaler),
    LinearRegression(LinearRegression),
    LogisticRegression(LogisticRegression),
    DecisionTreeRegressor(DecisionTreeRegressor),
    DecisionTreeClassifier(DecisionTreeClassifier),
    RandomForestRegressor(RandomForestRegressor),
    RandomForestClassifier(RandomForestClassifier),
    GradientBoostingRegressor(GradientBoostingRegressor),
    GradientBoostingClassifier(GradientBoostingClassifier),
    SupportVectorClassifier(SupportVectorClassifier),
    Pipeline(Pipeline),
    VotingRegressor(VotingRegressor),
    VotingClassifier(VotingClassifier),
}

impl SourceModel {
    /// Stable kind name, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SourceModel::StandardScaler(_) => "standard_scaler",
            SourceModel::LinearRegression(_) => "linear_regression",
            SourceModel::LogisticRegression(_) => "logistic_regression",
            SourceModel::DecisionTreeRegressor(_) => "decision_tree_regressor",
            SourceModel::DecisionTreeClassifier(_) => "decision_tree_classifier",
            SourceModel::RandomForestRegressor(_) => "random_forest_regressor",
            SourceModel::RandomForestClassifier(_) => "random_forest_classifier",
            SourceModel::GradientBoostingRegressor(_) => "gradient_boosting_regressor",
            SourceModel::GradientBoostingClassifier(_) => "gradient_boosting_classifier",
            SourceModel::SupportVectorClassifier(_) => "support_vector_classifier",
            SourceModel::Pipeline(_) => "pipeline",
            SourceModel::VotingRegressor(_) => "voting_regressor",
            SourceModel::VotingClassifier(_) => "voting_classifier",
        }
    }

    /// Self-reported input width, when the model knows it.
    ///
    /// Composite models report through their first member. Tree models
    /// report only when their description carries an explicit width.
    pub fn n_features(&self) -> Option<usize> {
        match self {
            SourceModel::StandardScaler(s) => Some(s.mean.len()),
            SourceModel::LinearRegression(l) => Some(l.coefficients.len()),
            SourceModel::LogisticRegression(l) => l.coefficients.first().map(Vec::len),
            SourceModel::DecisionTreeRegressor(t) => t.n_features,
            SourceModel::DecisionTreeClassifier(t) => t.n_features,
            SourceModel::RandomForestRegressor(f) => f.n_features,
            SourceModel::RandomForestClassifier(f) => f.n_features,
            SourceModel::GradientBoostingRegressor(g) => g.n_features,
            SourceModel::GradientBoostingClassifier(g) => g.n_features,
            SourceModel::SupportVectorClassifier(s) => {
                s.support_vectors.first().map(Vec::len)
            }
            SourceModel::Pipeline(p) => p.steps.first().and_then(|s| s.model.n_features()),
            SourceModel::VotingRegressor(v) => {
                v.members.first().and_then(|m| m.model.n_features())
            }
            SourceModel::VotingClassifier(v) => {
                v.members.first().and_then(|m| m.model.n_features())
            }
        }
    }

    /// True for feature transformers, which may appear in non-terminal
    /// pipeline positions.
    pub(crate) fn is_transformer(&self) -> bool {
        matches!(self, SourceModel::StandardScaler(_))
    }

    /// True for models whose output is class labels + probabilities.
    pub(crate) fn is_classifier(&self) -> bool {
        match self {
            SourceModel::LogisticRegression(_)
            | SourceModel::DecisionTreeClassifier(_)
            | SourceModel::RandomForestClassifier(_)
            | SourceModel::GradientBoostingClassifier(_)
            | SourceModel::SupportVectorClassifier(_)
            | SourceModel::VotingClassifier(_) => true,
            SourceModel::Pipeline(p) => {
                p.steps.last().is_some_and(|s| s.model.is_classifier())
            }
            _ => false,
        }
    }

    /// Number of classes for classifier models.
    pub(crate) fn n_classes(&self) -> Option<usize> {
        match self {
            SourceModel::LogisticRegression(l) => Some(l.n_classes),
            SourceModel::DecisionTreeClassifier(t) => Some(t.n_classes),
            SourceModel::RandomForestClassifier(f) => Some(f.n_classes),
            SourceModel::GradientBoostingClassifier(g) => Some(g.n_classes),
            SourceModel::Pipeline(p) => p.steps.last().and_then(|s| s.model.n_classes()),
            SourceModel::VotingClassifier(v) => {
                v.members.first().and_then(|m| m.model.n_classes())
            }
            _ => None,
        }
    }
}
