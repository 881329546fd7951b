//! LightGBM text model support.
//!
//! Line-based parser for the model format LightGBM writes via
//! `save_model()`, and conversion into the estimator API. The format has
//! three sections: a header of `key=value` pairs (class count, feature
//! count, objective), one `Tree=<i>` block per tree, and a footer (feature
//! importances, parameters) that conversion does not need and skips.
//!
//! # Differences from the XGBoost format that matter here
//!
//! - The split condition is `<=` (left when value <= threshold).
//! - Internal-node child arrays encode leaves as negative values:
//!   child `-k` refers to leaf `k - 1`.
//! - The decision type is a bitfield carrying the categorical flag and the
//!   default direction for missing values.
//! - Saved leaf values already include shrinkage; a binary model's
//!   `sigmoid` parameter scales the margin and is folded into the leaf
//!   values during conversion.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::source::{
    ComparisonOp, GradientBoostingClassifier, GradientBoostingRegressor, SourceModel, SourceTree,
    SplitKind,
};

/// Error type for LightGBM model parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

// =============================================================================
// Decision type bitfield
// =============================================================================

/// Parsed decision type.
///
/// Bit layout: bit 0 = categorical flag, bit 1 = default-left flag,
/// bits 2-3 = missing-value mode (handled through the default direction).
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionType {
    pub is_categorical: bool,
    pub default_left: bool,
}

impl DecisionType {
    pub fn from_i8(value: i8) -> Self {
        let v = value as u8;
        DecisionType {
            is_categorical: (v & 1) != 0,
            default_left: (v & 2) != 0,
        }
    }
}

// =============================================================================
// Parsed model
// =============================================================================

/// Objective recorded in the model header.
#[derive(Debug, Clone, PartialEq)]
pub enum LgbObjective {
    Regression,
    Binary { sigmoid: f64 },
    Multiclass { num_class: usize },
    /// Unrecognized objective; treated as raw-margin regression.
    Unknown(String),
}

impl LgbObjective {
    fn parse(text: &str) -> Self {
        let mut parts = text.split_whitespace();
        let name = parts.next().unwrap_or("");
        let param = |key: &str| {
            text.split_whitespace()
                .find_map(|p| p.strip_prefix(key).and_then(|v| v.strip_prefix(':')))
                .and_then(|v| v.parse().ok())
        };
        match name {
            "regression" | "regression_l2" | "l2" | "mean_squared_error" | "mse" => {
                LgbObjective::Regression
            }
            "binary" => LgbObjective::Binary {
                sigmoid: param("sigmoid").unwrap_or(1.0),
            },
            "multiclass" | "softmax" => LgbObjective::Multiclass {
                num_class: param("num_class").unwrap_or(1.0) as usize,
            },
            _ => LgbObjective::Unknown(text.to_string()),
        }
    }
}

/// One parsed tree block.
#[derive(Debug, Clone, PartialEq)]
pub struct LgbTree {
    pub num_leaves: usize,
    pub num_cat: usize,
    /// Per internal node (size `num_leaves - 1`).
    pub split_feature: Vec<i32>,
    pub threshold: Vec<f64>,
    pub decision_type: Vec<i8>,
    pub left_child: Vec<i32>,
    pub right_child: Vec<i32>,
    /// Per leaf (size `num_leaves`).
    pub leaf_value: Vec<f64>,
    pub shrinkage: f64,
}

/// A parsed LightGBM model.
#[derive(Debug, Clone, PartialEq)]
pub struct LgbModel {
    pub num_class: usize,
    pub num_tree_per_iteration: usize,
    pub max_feature_idx: usize,
    pub objective: LgbObjective,
    pub trees: Vec<LgbTree>,
}

impl LgbModel {
    /// Parse a model from its text form.
    pub fn from_text(text: &str) -> Result<Self, ParseError> {
        let mut lines = text.lines().map(str::trim);

        // Header: key=value pairs up to the first tree block.
        let mut header: HashMap<&str, &str> = HashMap::new();
        let mut saw_tree = false;
        for line in lines.by_ref() {
            if line.starts_with("Tree=") {
                saw_tree = true;
                break;
            }
            if let Some((key, value)) = line.split_once('=') {
                header.insert(key, value);
            }
        }

        let num_class = field_or(&header, "num_class", 1)?;
        let num_tree_per_iteration = field_or(&header, "num_tree_per_iteration", 1)?;
        let max_feature_idx = field(&header, "max_feature_idx")?;
        let objective = LgbObjective::parse(
            header
                .get("objective")
                .ok_or(ParseError::MissingField("objective"))?,
        );

        // Tree blocks: the header loop consumed the first "Tree=" line, so
        // one block is pending whenever a tree was announced.
        let mut trees = Vec::new();
        let mut pending = saw_tree;
        while pending {
            let mut block: HashMap<&str, &str> = HashMap::new();
            pending = false;
            for line in lines.by_ref() {
                if line.starts_with("Tree=") {
                    pending = true;
                    break;
                }
                if line == "end of trees" {
                    break;
                }
                if let Some((key, value)) = line.split_once('=') {
                    block.insert(key, value);
                }
            }
            trees.push(parse_tree(&block)?);
        }

        Ok(LgbModel {
            num_class,
            num_tree_per_iteration,
            max_feature_idx,
            objective,
            trees,
        })
    }

    /// Parse a model from a `save_model()` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text)
    }

    /// Feature count; always self-reported by this format.
    pub fn n_features(&self) -> usize {
        self.max_feature_idx + 1
    }

    /// Convert into the estimator API.
    pub fn to_source(&self) -> SourceModel {
        let n_features = Some(self.n_features());
        match &self.objective {
            LgbObjective::Binary { sigmoid } => {
                // p = sigmoid(s * margin): fold s into the leaf values.
                let scale = *sigmoid as f32;
                let trees = self.trees.iter().map(|t| flatten_tree(t, scale)).collect();
                SourceModel::GradientBoostingClassifier(GradientBoostingClassifier {
                    trees,
                    tree_groups: vec![0; self.trees.len()],
                    n_classes: 2,
                    base_score: vec![0.0],
                    n_features,
                    comparison: ComparisonOp::LessOrEqual,
                })
            }
            LgbObjective::Multiclass { num_class } => {
                let k = (*num_class).max(self.num_class);
                let per_iter = self.num_tree_per_iteration.max(1);
                let trees = self.trees.iter().map(|t| flatten_tree(t, 1.0)).collect();
                let tree_groups = (0..self.trees.len())
                    .map(|i| (i % per_iter) as u32)
                    .collect();
                SourceModel::GradientBoostingClassifier(GradientBoostingClassifier {
                    trees,
                    tree_groups,
                    n_classes: k,
                    base_score: vec![0.0; k],
                    n_features,
                    comparison: ComparisonOp::LessOrEqual,
                })
            }
            LgbObjective::Regression | LgbObjective::Unknown(_) => {
                let trees = self.trees.iter().map(|t| flatten_tree(t, 1.0)).collect();
                SourceModel::GradientBoostingRegressor(GradientBoostingRegressor {
                    trees,
                    base_score: 0.0,
                    n_features,
                    comparison: ComparisonOp::LessOrEqual,
                })
            }
        }
    }
}

// =============================================================================
// Block parsing helpers
// =============================================================================

fn field<T: FromStr>(map: &HashMap<&str, &str>, name: &'static str) -> Result<T, ParseError> {
    let raw = map.get(name).ok_or(ParseError::MissingField(name))?;
    raw.parse().map_err(|_| ParseError::InvalidValue {
        field: name,
        message: format!("cannot parse `{raw}`"),
    })
}

fn field_or<T: FromStr>(
    map: &HashMap<&str, &str>,
    name: &'static str,
    default: T,
) -> Result<T, ParseError> {
    match map.get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ParseError::InvalidValue {
            field: name,
            message: format!("cannot parse `{raw}`"),
        }),
    }
}

fn vec_field<T: FromStr>(
    map: &HashMap<&str, &str>,
    name: &'static str,
    expected: usize,
) -> Result<Vec<T>, ParseError> {
    let raw = map.get(name).ok_or(ParseError::MissingField(name))?;
    let values: Vec<T> = raw
        .split_whitespace()
        .map(|v| {
            v.parse().map_err(|_| ParseError::InvalidValue {
                field: name,
                message: format!("cannot parse `{v}`"),
            })
        })
        .collect::<Result<_, _>>()?;
    if values.len() != expected {
        return Err(ParseError::InvalidValue {
            field: name,
            message: format!("expected {expected} entries, got {}", values.len()),
        });
    }
    Ok(values)
}

/// Internal-node array: a single-leaf tree legitimately omits these fields.
fn internal_field<T: FromStr>(
    map: &HashMap<&str, &str>,
    name: &'static str,
    n_internal: usize,
) -> Result<Vec<T>, ParseError> {
    if n_internal == 0 {
        Ok(Vec::new())
    } else {
        vec_field(map, name, n_internal)
    }
}

fn parse_tree(block: &HashMap<&str, &str>) -> Result<LgbTree, ParseError> {
    let num_leaves: usize = field(block, "num_leaves")?;
    if num_leaves == 0 {
        return Err(ParseError::InvalidValue {
            field: "num_leaves",
            message: "tree has no leaves".to_string(),
        });
    }
    let n_internal = num_leaves - 1;

    Ok(LgbTree {
        num_leaves,
        num_cat: field_or(block, "num_cat", 0)?,
        split_feature: internal_field(block, "split_feature", n_internal)?,
        threshold: internal_field(block, "threshold", n_internal)?,
        decision_type: internal_field(block, "decision_type", n_internal)?,
        left_child: internal_field(block, "left_child", n_internal)?,
        right_child: internal_field(block, "right_child", n_internal)?,
        leaf_value: vec_field(block, "leaf_value", num_leaves)?,
        shrinkage: field_or(block, "shrinkage", 1.0)?,
    })
}

// =============================================================================
// Tree flattening
// =============================================================================

/// Flatten LightGBM's internal/leaf split into one breadth-style node
/// array: internal nodes keep their indices, leaf `k` becomes node
/// `n_internal + k`. `scale` multiplies leaf values (used to fold the
/// binary sigmoid parameter into the margins).
fn flatten_tree(tree: &LgbTree, scale: f32) -> SourceTree {
    let n_internal = tree.num_leaves - 1;
    let n_nodes = n_internal + tree.num_leaves;
    let map_child = |c: i32| -> i32 {
        if c >= 0 {
            c
        } else {
            (n_internal as i32) + (-c - 1)
        }
    };

    let mut left_children = vec![-1i32; n_nodes];
    let mut right_children = vec![-1i32; n_nodes];
    let mut split_indices = vec![0u32; n_nodes];
    let mut split_conditions = vec![0.0f32; n_nodes];
    let mut default_left = vec![true; n_nodes];
    let mut values = vec![0.0f32; n_nodes];
    let mut any_categorical = false;
    let mut split_types = vec![SplitKind::Numeric; n_nodes];

    for i in 0..n_internal {
        let decision = DecisionType::from_i8(tree.decision_type[i]);
        left_children[i] = map_child(tree.left_child[i]);
        right_children[i] = map_child(tree.right_child[i]);
        split_indices[i] = tree.split_feature[i].max(0) as u32;
        split_conditions[i] = tree.threshold[i] as f32;
        default_left[i] = decision.default_left;
        if decision.is_categorical {
            any_categorical = true;
            split_types[i] = SplitKind::Categorical;
        }
    }
    for (k, &value) in tree.leaf_value.iter().enumerate() {
        values[n_internal + k] = value as f32 * scale;
    }

    SourceTree {
        left_children,
        right_children,
        split_indices,
        split_conditions,
        default_left,
        values,
        split_types: any_categorical.then_some(split_types),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGRESSION_MODEL: &str = "\
tree
version=v4
num_class=1
num_tree_per_iteration=1
max_feature_idx=2
objective=regression
feature_names=f0 f1 f2

Tree=0
num_leaves=2
num_cat=0
split_feature=1
split_gain=10
threshold=0.75
decision_type=2
left_child=-1
right_child=-2
leaf_value=0.2 -0.3
shrinkage=0.1

end of trees
";

    #[test]
    fn parse_header_and_tree() {
        let model = LgbModel::from_text(REGRESSION_MODEL).unwrap();
        assert_eq!(model.n_features(), 3);
        assert_eq!(model.objective, LgbObjective::Regression);
        assert_eq!(model.trees.len(), 1);
        let tree = &model.trees[0];
        assert_eq!(tree.num_leaves, 2);
        assert_eq!(tree.split_feature, vec![1]);
        assert_eq!(tree.leaf_value, vec![0.2, -0.3]);
    }

    #[test]
    fn flattening_maps_leaf_indices() {
        let model = LgbModel::from_text(REGRESSION_MODEL).unwrap();
        let source = model.to_source();
        match source {
            SourceModel::GradientBoostingRegressor(g) => {
                let tree = &g.trees[0];
                // internal node 0, leaves at 1 and 2
                assert_eq!(tree.left_children, vec![1, -1, -1]);
                assert_eq!(tree.right_children, vec![2, -1, -1]);
                assert!((tree.values[1] - 0.2).abs() < 1e-6);
                assert!((tree.values[2] + 0.3).abs() < 1e-6);
                assert_eq!(g.comparison, ComparisonOp::LessOrEqual);
                assert_eq!(g.n_features, Some(3));
            }
            other => panic!("expected regressor, got {other:?}"),
        }
    }

    #[test]
    fn binary_objective_folds_sigmoid_scale() {
        let text = REGRESSION_MODEL.replace("objective=regression", "objective=binary sigmoid:2");
        let model = LgbModel::from_text(&text).unwrap();
        assert_eq!(model.objective, LgbObjective::Binary { sigmoid: 2.0 });
        match model.to_source() {
            SourceModel::GradientBoostingClassifier(g) => {
                assert_eq!(g.n_classes, 2);
                assert!((g.trees[0].values[1] - 0.4).abs() < 1e-6);
            }
            other => panic!("expected classifier, got {other:?}"),
        }
    }

    #[test]
    fn missing_objective_is_error() {
        let text = REGRESSION_MODEL.replace("objective=regression\n", "");
        let err = LgbModel::from_text(&text).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("objective")));
    }

    #[test]
    fn default_left_comes_from_decision_type() {
        let decision = DecisionType::from_i8(2);
        assert!(decision.default_left);
        assert!(!decision.is_categorical);
        let decision = DecisionType::from_i8(1);
        assert!(!decision.default_left);
        assert!(decision.is_categorical);
    }
}
