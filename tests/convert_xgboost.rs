//! End-to-end conversion tests for XGBoost JSON models, including the
//! feature-count inference contract.

use approx::assert_abs_diff_eq;
use colibri::{convert_xgboost, ConvertError, ConvertOptions, ProgramKind, XgbModel};
use ndarray::{array, ArrayD};

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Two-stump regression model: tree 0 splits on x0 < 1.0, tree 1 on
/// x1 < 0.0; base_score 0.5.
fn regression_json(num_feature: &str) -> String {
    format!(
        r#"{{
        "learner": {{
            "learner_model_param": {{
                "base_score": "5E-1",
                "num_class": "0",
                "num_feature": "{num_feature}"
            }},
            "objective": {{"name": "reg:squarederror"}},
            "gradient_booster": {{
                "name": "gbtree",
                "model": {{
                    "trees": [
                        {{
                            "tree_param": {{"num_nodes": "3"}},
                            "left_children": [1, -1, -1],
                            "right_children": [2, -1, -1],
                            "split_indices": [0, 0, 0],
                            "split_conditions": [1.0, 0.0, 0.0],
                            "default_left": [1, 0, 0],
                            "base_weights": [0.0, -0.4, 0.6]
                        }},
                        {{
                            "tree_param": {{"num_nodes": "3"}},
                            "left_children": [1, -1, -1],
                            "right_children": [2, -1, -1],
                            "split_indices": [1, 0, 0],
                            "split_conditions": [0.0, 0.0, 0.0],
                            "default_left": [1, 0, 0],
                            "base_weights": [0.0, 0.1, 0.2]
                        }}
                    ],
                    "tree_info": [0, 0]
                }}
            }}
        }},
        "version": [2, 0, 0]
    }}"#
    )
}

#[test]
fn regression_predictions_match_hand_computation() {
    let model = XgbModel::from_json(&regression_json("2")).unwrap();
    let program = convert_xgboost(&model, ConvertOptions::default()).unwrap();
    assert_eq!(program.kind(), ProgramKind::Regression);
    assert_eq!(program.input_width(), Some(2));

    // Row 0: x0=0.5 < 1.0 -> -0.4; x1=-1.0 < 0.0 -> 0.1; + 0.5 = 0.2
    // Row 1: x0=1.0 (not < 1.0) -> 0.6; x1=0.5 -> 0.2; + 0.5 = 1.3
    let x = array![[0.5, -1.0], [1.0, 0.5]];
    let predictions = program.predict(x.view()).unwrap();
    assert_abs_diff_eq!(predictions[0], 0.2, epsilon = 1e-5);
    assert_abs_diff_eq!(predictions[1], 1.3, epsilon = 1e-5);
}

#[test]
fn missing_feature_count_is_taken_from_sample_input() {
    let model = XgbModel::from_json(&regression_json("0")).unwrap();
    assert_eq!(model.num_feature(), None);

    let sample = ArrayD::<f32>::zeros(vec![4, 7]);
    let program = convert_xgboost(
        &model,
        ConvertOptions::builder().test_input(sample).build(),
    )
    .unwrap();
    assert_eq!(program.input_width(), Some(7));
}

#[test]
fn missing_feature_count_without_sample_fails() {
    let model = XgbModel::from_json(&regression_json("0")).unwrap();
    let err = convert_xgboost(&model, ConvertOptions::default()).unwrap_err();
    assert!(matches!(err, ConvertError::FeatureCountInference(_)));
}

#[test]
fn one_dimensional_sample_fails_inference() {
    let model = XgbModel::from_json(&regression_json("0")).unwrap();
    let sample = ArrayD::<f32>::zeros(vec![7]);
    let err = convert_xgboost(
        &model,
        ConvertOptions::builder().test_input(sample).build(),
    )
    .unwrap_err();
    assert!(matches!(err, ConvertError::FeatureCountInference(_)));
}

#[test]
fn self_reported_feature_count_wins_over_sample() {
    let model = XgbModel::from_json(&regression_json("2")).unwrap();
    let sample = ArrayD::<f32>::zeros(vec![4, 9]);
    let program = convert_xgboost(
        &model,
        ConvertOptions::builder().test_input(sample).build(),
    )
    .unwrap();
    assert_eq!(program.input_width(), Some(2));
}

#[test]
fn binary_logistic_reproduces_probabilities() {
    let json = regression_json("2").replace("reg:squarederror", "binary:logistic");
    let model = XgbModel::from_json(&json).unwrap();
    let program = convert_xgboost(&model, ConvertOptions::default()).unwrap();
    assert_eq!(program.kind(), ProgramKind::Classification { n_classes: 2 });

    // base_score 0.5 -> margin 0; margins as in the regression test minus
    // the 0.5 base: row 0 -> -0.3, row 1 -> 0.8.
    let x = array![[0.5, -1.0], [1.0, 0.5]];
    let proba = program.predict_proba(x.view()).unwrap();
    assert_abs_diff_eq!(proba[[0, 1]], sigmoid(-0.3), epsilon = 1e-5);
    assert_abs_diff_eq!(proba[[1, 1]], sigmoid(0.8), epsilon = 1e-5);

    let labels = program.predict(x.view()).unwrap();
    assert_eq!(labels.to_vec(), vec![0.0, 1.0]);
}

#[test]
fn missing_values_follow_default_direction() {
    let model = XgbModel::from_json(&regression_json("2")).unwrap();
    let program = convert_xgboost(&model, ConvertOptions::default()).unwrap();

    // NaN on both features: tree 0 defaults left (-0.4), tree 1 defaults
    // left (0.1); + 0.5 = 0.2
    let x = array![[f32::NAN, f32::NAN]];
    let predictions = program.predict(x.view()).unwrap();
    assert_abs_diff_eq!(predictions[0], 0.2, epsilon = 1e-5);
}

#[test]
fn conversion_does_not_mutate_the_model() {
    let model = XgbModel::from_json(&regression_json("2")).unwrap();
    let snapshot = model.clone();
    let _program = convert_xgboost(&model, ConvertOptions::default()).unwrap();
    assert_eq!(model, snapshot);
}
