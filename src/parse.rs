//! Parsing: source model -> topology.
//!
//! Recursively traverses the source model's composite structure (pipeline
//! steps in declared order, ensemble members in declared order), allocates
//! one operator node per recognized leaf with the structural parameters
//! lowering needs, and wires ports in data-flow order. Leaves whose kind
//! has no registered converter fail here, before any lowering work starts.

use ndarray::{Array1, Array2};

use crate::error::ConvertError;
use crate::ir::{
    AggregateConfig, AggregateMode, InputBinding, LinearConfig, NodeId, OpConfig, OpKind,
    OperatorNode, PortRef, ScalerConfig, TreeEnsembleConfig, Topology,
};
use crate::options::ExtraConfig;
use crate::registry::Registry;
use crate::source::{
    ComparisonOp, GradientBoostingClassifier, GradientBoostingRegressor, LogisticRegression,
    SourceModel, SourceTree, StandardScaler,
};
use crate::transform::OutputTransform;

/// Parse a source model into a topology.
///
/// The topology's declared outputs are the terminal node's ports; its
/// expected input width comes from the extra configuration when set.
pub fn parse_source(
    model: &SourceModel,
    extra: &ExtraConfig,
    registry: &Registry,
) -> Result<Topology, ConvertError> {
    let mut topology = Topology::new(extra.n_features());
    let terminal = parse_node(model, InputBinding::External(0), &mut topology, registry)?;
    topology.set_terminal(terminal);
    tracing::debug!(
        n_nodes = topology.n_nodes(),
        kind = model.kind_name(),
        "parsed source model"
    );
    Ok(topology)
}

fn parse_node(
    model: &SourceModel,
    input: InputBinding,
    topology: &mut Topology,
    registry: &Registry,
) -> Result<NodeId, ConvertError> {
    match model {
        SourceModel::Pipeline(pipeline) => {
            let Some((last, transformers)) = pipeline.steps.split_last() else {
                return Err(ConvertError::UnsupportedModel {
                    kind: "pipeline (no steps)".to_string(),
                });
            };
            let mut current = input;
            for step in transformers {
                if !step.model.is_transformer() {
                    return Err(ConvertError::UnsupportedModel {
                        kind: format!(
                            "{} (predictor in a non-terminal pipeline position)",
                            step.model.kind_name()
                        ),
                    });
                }
                let id = parse_node(&step.model, current, topology, registry)?;
                current = InputBinding::Port(PortRef { node: id, port: 0 });
            }
            parse_node(&last.model, current, topology, registry)
        }

        SourceModel::VotingRegressor(voting) => {
            if voting.members.is_empty() {
                return Err(ConvertError::UnsupportedModel {
                    kind: "voting_regressor (no members)".to_string(),
                });
            }
            let mut member_ports = Vec::with_capacity(voting.members.len());
            for member in &voting.members {
                if member.model.is_classifier() {
                    return Err(ConvertError::UnsupportedModel {
                        kind: format!("{} (classifier in a voting regressor)", member.model.kind_name()),
                    });
                }
                let id = parse_node(&member.model, input, topology, registry)?;
                member_ports.push(InputBinding::Port(PortRef { node: id, port: 0 }));
            }
            push_leaf(
                topology,
                registry,
                OpKind::Aggregator,
                member_ports,
                OpConfig::Aggregate(AggregateConfig {
                    mode: AggregateMode::Mean,
                    n_members: voting.members.len(),
                    n_classes: None,
                }),
                1,
            )
        }

        SourceModel::VotingClassifier(voting) => {
            if voting.members.is_empty() {
                return Err(ConvertError::UnsupportedModel {
                    kind: "voting_classifier (no members)".to_string(),
                });
            }
            let n_classes = voting.members[0].model.n_classes();
            let mut member_ports = Vec::with_capacity(voting.members.len());
            for member in &voting.members {
                if !member.model.is_classifier() {
                    return Err(ConvertError::UnsupportedModel {
                        kind: format!("{} (non-classifier in a voting classifier)", member.model.kind_name()),
                    });
                }
                if member.model.n_classes() != n_classes {
                    return Err(ConvertError::UnsupportedModel {
                        kind: "voting_classifier (members disagree on class count)".to_string(),
                    });
                }
                let id = parse_node(&member.model, input, topology, registry)?;
                // Soft voting averages the members' probability ports.
                member_ports.push(InputBinding::Port(PortRef { node: id, port: 1 }));
            }
            push_leaf(
                topology,
                registry,
                OpKind::Aggregator,
                member_ports,
                OpConfig::Aggregate(AggregateConfig {
                    mode: AggregateMode::SoftVote,
                    n_members: voting.members.len(),
                    n_classes,
                }),
                2,
            )
        }

        SourceModel::StandardScaler(scaler) => {
            let config = scaler_config(scaler);
            push_leaf(topology, registry, OpKind::Scaler, vec![input], config, 1)
        }

        SourceModel::LinearRegression(linear) => {
            let n_features = linear.coefficients.len();
            let coefficients =
                Array2::from_shape_vec((n_features, 1), linear.coefficients.clone())
                    .expect("shape matches coefficient count");
            let config = OpConfig::Linear(LinearConfig {
                coefficients,
                intercepts: Array1::from(vec![linear.intercept]),
                transform: OutputTransform::Identity,
                n_classes: None,
            });
            push_leaf(topology, registry, OpKind::LinearRegressor, vec![input], config, 1)
        }

        SourceModel::LogisticRegression(logistic) => {
            let config = logistic_config(logistic)?;
            push_leaf(topology, registry, OpKind::LinearClassifier, vec![input], config, 2)
        }

        SourceModel::DecisionTreeRegressor(tree) => {
            let config = OpConfig::TreeEnsemble(single_group_config(
                vec![tree.tree.clone()],
                1,
                vec![0.0],
                false,
                ComparisonOp::LessOrEqual,
                OutputTransform::Identity,
                None,
            ));
            push_leaf(topology, registry, OpKind::TreeEnsembleRegressor, vec![input], config, 1)
        }

        SourceModel::DecisionTreeClassifier(tree) => {
            let config = OpConfig::TreeEnsemble(single_group_config(
                vec![tree.tree.clone()],
                tree.n_classes,
                vec![0.0; tree.n_classes],
                false,
                ComparisonOp::LessOrEqual,
                OutputTransform::Identity,
                Some(tree.n_classes),
            ));
            push_leaf(topology, registry, OpKind::TreeEnsembleClassifier, vec![input], config, 2)
        }

        SourceModel::RandomForestRegressor(forest) => {
            let config = OpConfig::TreeEnsemble(single_group_config(
                forest.trees.clone(),
                1,
                vec![0.0],
                true,
                ComparisonOp::LessOrEqual,
                OutputTransform::Identity,
                None,
            ));
            push_leaf(topology, registry, OpKind::TreeEnsembleRegressor, vec![input], config, 1)
        }

        SourceModel::RandomForestClassifier(forest) => {
            let config = OpConfig::TreeEnsemble(single_group_config(
                forest.trees.clone(),
                forest.n_classes,
                vec![0.0; forest.n_classes],
                true,
                ComparisonOp::LessOrEqual,
                OutputTransform::Identity,
                Some(forest.n_classes),
            ));
            push_leaf(topology, registry, OpKind::TreeEnsembleClassifier, vec![input], config, 2)
        }

        SourceModel::GradientBoostingRegressor(boosting) => {
            let config = boosting_regressor_config(boosting);
            push_leaf(topology, registry, OpKind::TreeEnsembleRegressor, vec![input], config, 1)
        }

        SourceModel::GradientBoostingClassifier(boosting) => {
            let config = boosting_classifier_config(boosting);
            push_leaf(topology, registry, OpKind::TreeEnsembleClassifier, vec![input], config, 2)
        }

        // Representable but not convertible.
        SourceModel::SupportVectorClassifier(_) => Err(ConvertError::UnsupportedModel {
            kind: model.kind_name().to_string(),
        }),
    }
}

/// Allocate a leaf node, failing fast when its kind cannot be resolved.
fn push_leaf(
    topology: &mut Topology,
    registry: &Registry,
    kind: OpKind,
    inputs: Vec<InputBinding>,
    config: OpConfig,
    n_outputs: usize,
) -> Result<NodeId, ConvertError> {
    if !registry.contains(kind) {
        return Err(ConvertError::UnsupportedModel {
            kind: kind.name().to_string(),
        });
    }
    let name = format!("{}_{}", kind.name(), topology.n_nodes());
    Ok(topology.push_node(OperatorNode {
        kind,
        name,
        inputs,
        n_outputs,
        config,
    }))
}

// =============================================================================
// Leaf configuration builders
// =============================================================================

fn scaler_config(scaler: &StandardScaler) -> OpConfig {
    // (x - mean) / scale, expressed as (x - offset) * scale.
    let offset = Array1::from(scaler.mean.clone());
    let scale = Array1::from_iter(scaler.scale.iter().map(|&s| 1.0 / s));
    OpConfig::Scaler(ScalerConfig { offset, scale })
}

fn logistic_config(logistic: &LogisticRegression) -> Result<OpConfig, ConvertError> {
    let rows = logistic.coefficients.len();
    let n_features = logistic.coefficients.first().map_or(0, Vec::len);
    if rows == 0 || logistic.coefficients.iter().any(|row| row.len() != n_features) {
        return Err(ConvertError::UnsupportedModel {
            kind: "logistic_regression (ragged coefficient rows)".to_string(),
        });
    }
    // One coefficient row per margin column: transpose to (features, columns).
    let mut coefficients = Array2::zeros((n_features, rows));
    for (column, row) in logistic.coefficients.iter().enumerate() {
        for (feature, &value) in row.iter().enumerate() {
            coefficients[[feature, column]] = value;
        }
    }
    let transform = if rows == 1 {
        OutputTransform::Sigmoid
    } else {
        OutputTransform::Softmax
    };
    Ok(OpConfig::Linear(LinearConfig {
        coefficients,
        intercepts: Array1::from(logistic.intercepts.clone()),
        transform,
        n_classes: Some(logistic.n_classes),
    }))
}

/// Ensemble where every tree feeds group 0. Classification forests use
/// distribution leaves (`leaf_width == n_classes`).
fn single_group_config(
    trees: Vec<SourceTree>,
    leaf_width: usize,
    base_score: Vec<f32>,
    average: bool,
    comparison: ComparisonOp,
    transform: OutputTransform,
    n_classes: Option<usize>,
) -> TreeEnsembleConfig {
    let n_trees = trees.len();
    TreeEnsembleConfig {
        trees,
        tree_groups: vec![0; n_trees],
        n_groups: 1,
        leaf_width,
        base_score,
        average,
        comparison,
        transform,
        n_classes,
    }
}

fn boosting_regressor_config(boosting: &GradientBoostingRegressor) -> OpConfig {
    OpConfig::TreeEnsemble(single_group_config(
        boosting.trees.clone(),
        1,
        vec![boosting.base_score],
        false,
        boosting.comparison,
        OutputTransform::Identity,
        None,
    ))
}

fn boosting_classifier_config(boosting: &GradientBoostingClassifier) -> OpConfig {
    let n_groups = if boosting.n_classes <= 2 {
        1
    } else {
        boosting.n_classes
    };
    let transform = if boosting.n_classes <= 2 {
        OutputTransform::Sigmoid
    } else {
        OutputTransform::Softmax
    };
    OpConfig::TreeEnsemble(TreeEnsembleConfig {
        trees: boosting.trees.clone(),
        tree_groups: boosting.tree_groups.clone(),
        n_groups,
        leaf_width: 1,
        base_score: boosting.base_score.clone(),
        average: false,
        comparison: boosting.comparison,
        transform,
        n_classes: Some(boosting.n_classes),
    })
}
