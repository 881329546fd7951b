//! End-to-end conversion tests for LightGBM text models.

use approx::assert_abs_diff_eq;
use colibri::{convert_lightgbm, ConvertOptions, LgbModel, ProgramKind};
use ndarray::array;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

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

Tree=1
num_leaves=2
num_cat=0
split_feature=0
split_gain=5
threshold=0.25
decision_type=2
left_child=-1
right_child=-2
leaf_value=0.05 0.15
shrinkage=0.1

end of trees
";

#[test]
fn regression_predictions_match_hand_computation() {
    let model = LgbModel::from_text(REGRESSION_MODEL).unwrap();
    let program = convert_lightgbm(&model, ConvertOptions::default()).unwrap();
    assert_eq!(program.kind(), ProgramKind::Regression);
    // Feature count always self-reported: max_feature_idx + 1.
    assert_eq!(program.input_width(), Some(3));

    // Row 0: x1=0.5 <= 0.75 -> 0.2; x0=0.1 <= 0.25 -> 0.05; sum 0.25
    // Row 1: x1=1.0 -> -0.3; x0=0.5 -> 0.15; sum -0.15
    let x = array![[0.1, 0.5, 0.0], [0.5, 1.0, 0.0]];
    let predictions = program.predict(x.view()).unwrap();
    assert_abs_diff_eq!(predictions[0], 0.25, epsilon = 1e-5);
    assert_abs_diff_eq!(predictions[1], -0.15, epsilon = 1e-5);
}

#[test]
fn boundary_value_routes_left_with_less_or_equal() {
    let model = LgbModel::from_text(REGRESSION_MODEL).unwrap();
    let program = convert_lightgbm(&model, ConvertOptions::default()).unwrap();

    // x1 exactly at the 0.75 threshold goes left (<=).
    let x = array![[1.0, 0.75, 0.0]];
    let predictions = program.predict(x.view()).unwrap();
    assert_abs_diff_eq!(predictions[0], 0.2 + 0.15, epsilon = 1e-5);
}

#[test]
fn binary_model_reproduces_probabilities() {
    let text = REGRESSION_MODEL.replace("objective=regression", "objective=binary sigmoid:1");
    let model = LgbModel::from_text(&text).unwrap();
    let program = convert_lightgbm(&model, ConvertOptions::default()).unwrap();
    assert_eq!(program.kind(), ProgramKind::Classification { n_classes: 2 });

    let x = array![[0.1, 0.5, 0.0], [0.5, 1.0, 0.0]];
    let proba = program.predict_proba(x.view()).unwrap();
    assert_abs_diff_eq!(proba[[0, 1]], sigmoid(0.25), epsilon = 1e-5);
    assert_abs_diff_eq!(proba[[1, 1]], sigmoid(-0.15), epsilon = 1e-5);

    let labels = program.predict(x.view()).unwrap();
    assert_eq!(labels.to_vec(), vec![1.0, 0.0]);
}

#[test]
fn multiclass_trees_cycle_over_class_groups() {
    // Three single-leaf trees, one per class: constant margins 0.5, 1.5, 1.0.
    let text = "\
tree
version=v4
num_class=3
num_tree_per_iteration=3
max_feature_idx=1
objective=multiclass num_class:3

Tree=0
num_leaves=1
leaf_value=0.5
shrinkage=1

Tree=1
num_leaves=1
leaf_value=1.5
shrinkage=1

Tree=2
num_leaves=1
leaf_value=1.0
shrinkage=1

end of trees
";
    let model = LgbModel::from_text(text).unwrap();
    let program = convert_lightgbm(&model, ConvertOptions::default()).unwrap();
    assert_eq!(program.kind(), ProgramKind::Classification { n_classes: 3 });

    let x = array![[0.0, 0.0]];
    let proba = program.predict_proba(x.view()).unwrap();
    let exp: Vec<f32> = [0.5f32, 1.5, 1.0].iter().map(|m| m.exp()).collect();
    let sum: f32 = exp.iter().sum();
    for class in 0..3 {
        assert_abs_diff_eq!(proba[[0, class]], exp[class] / sum, epsilon = 1e-5);
    }
    assert_eq!(program.predict(x.view()).unwrap()[0], 1.0);
}

#[test]
fn conversion_does_not_mutate_the_model() {
    let model = LgbModel::from_text(REGRESSION_MODEL).unwrap();
    let snapshot = model.clone();
    let _program = convert_lightgbm(&model, ConvertOptions::default()).unwrap();
    assert_eq!(model, snapshot);
}
