//! XGBoost JSON model support.
//!
//! Foreign serde types for the XGBoost >= 2.0 JSON model format, used only
//! for parsing; [`XgbModel::to_source`] converts them into the estimator
//! API. Supports gbtree and gblinear boosters.
//!
//! The format stores most numerics as strings (`"num_feature": "5"`) and
//! has shipped `base_score` as a number, a string, and a bracketed array
//! over its versions, so the deserializers here are deliberately tolerant.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr};

use crate::error::ConvertError;
use crate::source::{
    ComparisonOp, GradientBoostingClassifier, GradientBoostingRegressor, LinearRegression,
    LogisticRegression, SourceModel, SourceTree, SplitKind,
};

// =============================================================================
// Custom deserializers
// =============================================================================

fn deserialize_base_score<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as SerdeError;

    let mut cur = Value::deserialize(deserializer)?;
    loop {
        match cur {
            Value::Number(n) => {
                return n
                    .as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| SerdeError::custom("invalid number for base_score"));
            }
            Value::String(s) => {
                if let Ok(f) = s.trim().parse::<f32>() {
                    return Ok(f);
                }
                // bracketed scalar like "[5E-1]"
                let t = s.trim();
                if let Some(inner) = t.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                    if let Ok(f) = inner.parse::<f32>() {
                        return Ok(f);
                    }
                }
                return Err(SerdeError::custom(format!(
                    "cannot parse base_score from string: {s}"
                )));
            }
            Value::Array(arr) => match arr.into_iter().next() {
                Some(first) => cur = first,
                None => return Err(SerdeError::custom("empty array for base_score")),
            },
            _ => {
                return Err(SerdeError::custom(
                    "base_score must be number, string, or array",
                ));
            }
        }
    }
}

// =============================================================================
// Foreign types
// =============================================================================

/// An XGBoost model as stored in its JSON format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XgbModel {
    pub learner: Learner,
    #[serde(default)]
    pub version: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learner {
    pub learner_model_param: LearnerModelParam,
    pub objective: Objective,
    pub gradient_booster: GradientBooster,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerModelParam {
    #[serde(deserialize_with = "deserialize_base_score")]
    pub base_score: f32,
    #[serde_as(as = "DisplayFromStr")]
    pub num_class: u32,
    /// `0` when the dump does not record the trained feature count.
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub num_feature: u32,
}

/// Objective section; parameters beyond the name are not needed for
/// conversion and are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum GradientBooster {
    #[serde(rename = "gbtree")]
    Gbtree { model: TreeModel },
    #[serde(rename = "gblinear")]
    Gblinear { model: GblinearModel },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    pub trees: Vec<XgbTree>,
    /// Output group (class) per tree.
    pub tree_info: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GblinearModel {
    /// Row-major `[n_features + 1, n_groups]`; the last row holds biases.
    pub weights: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XgbTree {
    pub tree_param: TreeParam,
    pub left_children: Vec<i32>,
    pub right_children: Vec<i32>,
    pub split_indices: Vec<u32>,
    pub split_conditions: Vec<f32>,
    pub default_left: Vec<u8>,
    pub base_weights: Vec<f32>,
    /// Per-node split kinds (0 = numeric, 1 = categorical); absent in
    /// models without categorical features.
    #[serde(default)]
    pub split_type: Vec<u8>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParam {
    #[serde_as(as = "DisplayFromStr")]
    pub num_nodes: usize,
}

// =============================================================================
// Conversion
// =============================================================================

/// Convert base_score from probability space to margin space based on the
/// objective. XGBoost stores base_score in probability/original space in
/// JSON, but prediction accumulates in margin space.
fn prob_to_margin(base_score: f32, objective: &str) -> f32 {
    match objective {
        "binary:logistic" | "reg:logistic" => {
            let p = base_score.clamp(1e-7, 1.0 - 1e-7);
            (p / (1.0 - p)).ln()
        }
        "reg:gamma" | "reg:tweedie" => base_score.max(1e-7).ln(),
        _ => base_score,
    }
}

impl XgbModel {
    /// Parse a model from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Self-reported feature count. Older dumps record `0`, in which case
    /// the count must be inferred from a sample input.
    pub fn num_feature(&self) -> Option<usize> {
        let n = self.learner.learner_model_param.num_feature;
        (n > 0).then_some(n as usize)
    }

    fn is_classifier(&self) -> bool {
        let name = self.learner.objective.name.as_str();
        name.starts_with("binary:") || name.starts_with("multi:")
    }

    /// Convert into the estimator API.
    pub fn to_source(&self) -> Result<SourceModel, ConvertError> {
        match &self.learner.gradient_booster {
            GradientBooster::Gbtree { model } => self.trees_to_source(model),
            GradientBooster::Gblinear { model } => self.linear_to_source(model),
        }
    }

    fn trees_to_source(&self, model: &TreeModel) -> Result<SourceModel, ConvertError> {
        let objective = self.learner.objective.name.as_str();
        let margin_base = prob_to_margin(self.learner.learner_model_param.base_score, objective);
        let trees: Vec<SourceTree> = model.trees.iter().map(convert_tree).collect();
        let tree_groups: Vec<u32> = model.tree_info.iter().map(|&g| g.max(0) as u32).collect();
        let n_features = self.num_feature();

        if self.is_classifier() {
            let num_class = self.learner.learner_model_param.num_class;
            let (n_classes, n_margin_cols) = if num_class <= 1 {
                (2, 1)
            } else {
                (num_class as usize, num_class as usize)
            };
            Ok(SourceModel::GradientBoostingClassifier(
                GradientBoostingClassifier {
                    trees,
                    tree_groups,
                    n_classes,
                    base_score: vec![margin_base; n_margin_cols],
                    n_features,
                    comparison: ComparisonOp::LessThan,
                },
            ))
        } else {
            Ok(SourceModel::GradientBoostingRegressor(
                GradientBoostingRegressor {
                    trees,
                    base_score: margin_base,
                    n_features,
                    comparison: ComparisonOp::LessThan,
                },
            ))
        }
    }

    /// gblinear weights carry the bias in their last row; base_score is
    /// baked into the bias so prediction needs no extra parameters.
    fn linear_to_source(&self, model: &GblinearModel) -> Result<SourceModel, ConvertError> {
        let objective = self.learner.objective.name.as_str();
        let num_class = self.learner.learner_model_param.num_class;
        let n_groups = if num_class <= 1 { 1 } else { num_class as usize };
        let weights = &model.weights;

        if weights.len() % n_groups != 0 || weights.len() < n_groups {
            return Err(ConvertError::UnsupportedModel {
                kind: "xgboost gblinear (weights length does not cover all groups)".to_string(),
            });
        }
        let n_features = weights.len() / n_groups - 1;
        let margin_base = prob_to_margin(self.learner.learner_model_param.base_score, objective);

        // weights[f * n_groups + g] is the coefficient of feature f for
        // group g; row n_features holds the biases.
        let group_column = |g: usize| -> Vec<f32> {
            (0..n_features).map(|f| weights[f * n_groups + g]).collect()
        };
        let bias = |g: usize| weights[n_features * n_groups + g] + margin_base;

        if self.is_classifier() {
            let coefficients: Vec<Vec<f32>> = (0..n_groups).map(group_column).collect();
            let intercepts: Vec<f32> = (0..n_groups).map(bias).collect();
            let n_classes = if n_groups == 1 { 2 } else { n_groups };
            Ok(SourceModel::LogisticRegression(LogisticRegression {
                coefficients,
                intercepts,
                n_classes,
            }))
        } else {
            Ok(SourceModel::LinearRegression(LinearRegression {
                coefficients: group_column(0),
                intercept: bias(0),
            }))
        }
    }
}

fn convert_tree(tree: &XgbTree) -> SourceTree {
    let split_types = if tree.split_type.iter().any(|&t| t != 0) {
        Some(
            tree.split_type
                .iter()
                .map(|&t| {
                    if t == 0 {
                        SplitKind::Numeric
                    } else {
                        SplitKind::Categorical
                    }
                })
                .collect(),
        )
    } else {
        None
    };

    SourceTree {
        left_children: tree.left_children.clone(),
        right_children: tree.right_children.clone(),
        split_indices: tree.split_indices.clone(),
        split_conditions: tree.split_conditions.clone(),
        default_left: tree.default_left.iter().map(|&b| b != 0).collect(),
        values: tree.base_weights.clone(),
        split_types,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regression_json() -> String {
        // Single stump: x0 < 1.0 -> -0.4, else 0.6; base_score 0.5.
        r#"{
            "learner": {
                "learner_model_param": {
                    "base_score": "5E-1",
                    "num_class": "0",
                    "num_feature": "3"
                },
                "objective": {"name": "reg:squarederror"},
                "gradient_booster": {
                    "name": "gbtree",
                    "model": {
                        "trees": [{
                            "tree_param": {"num_nodes": "3"},
                            "left_children": [1, -1, -1],
                            "right_children": [2, -1, -1],
                            "split_indices": [0, 0, 0],
                            "split_conditions": [1.0, 0.0, 0.0],
                            "default_left": [1, 0, 0],
                            "base_weights": [0.0, -0.4, 0.6]
                        }],
                        "tree_info": [0]
                    }
                }
            },
            "version": [2, 0, 0]
        }"#
        .to_string()
    }

    #[test]
    fn parse_regression_model() {
        let model = XgbModel::from_json(&regression_json()).unwrap();
        assert_eq!(model.num_feature(), Some(3));
        assert_eq!(model.learner.learner_model_param.base_score, 0.5);
    }

    #[test]
    fn regression_to_source() {
        let model = XgbModel::from_json(&regression_json()).unwrap();
        let source = model.to_source().unwrap();
        match source {
            SourceModel::GradientBoostingRegressor(g) => {
                assert_eq!(g.trees.len(), 1);
                assert_eq!(g.base_score, 0.5);
                assert_eq!(g.comparison, ComparisonOp::LessThan);
                assert_eq!(g.trees[0].values, vec![0.0, -0.4, 0.6]);
            }
            other => panic!("expected gradient boosting regressor, got {other:?}"),
        }
    }

    #[test]
    fn binary_logistic_base_score_moves_to_margin_space() {
        let json = regression_json().replace("reg:squarederror", "binary:logistic");
        let model = XgbModel::from_json(&json).unwrap();
        match model.to_source().unwrap() {
            SourceModel::GradientBoostingClassifier(g) => {
                assert_eq!(g.n_classes, 2);
                assert_eq!(g.base_score.len(), 1);
                // logit(0.5) == 0
                assert!(g.base_score[0].abs() < 1e-6);
            }
            other => panic!("expected classifier, got {other:?}"),
        }
    }

    #[test]
    fn missing_num_feature_means_unknown() {
        let json = regression_json().replace(r#""num_feature": "3""#, r#""num_feature": "0""#);
        let model = XgbModel::from_json(&json).unwrap();
        assert_eq!(model.num_feature(), None);
    }

    #[test]
    fn gblinear_to_source() {
        let json = r#"{
            "learner": {
                "learner_model_param": {
                    "base_score": "0",
                    "num_class": "0",
                    "num_feature": "2"
                },
                "objective": {"name": "reg:squarederror"},
                "gradient_booster": {
                    "name": "gblinear",
                    "model": {"weights": [0.5, -1.5, 2.0]}
                }
            }
        }"#;
        let model = XgbModel::from_json(json).unwrap();
        match model.to_source().unwrap() {
            SourceModel::LinearRegression(l) => {
                assert_eq!(l.coefficients, vec![0.5, -1.5]);
                assert_eq!(l.intercept, 2.0);
            }
            other => panic!("expected linear regression, got {other:?}"),
        }
    }
}
