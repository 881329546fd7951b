//! Conversion entry points.
//!
//! One entry point per source family. Each takes a private clone of the
//! model before doing any work — simplification passes are free to rewrite
//! that snapshot, and the caller's model is observably unchanged — then
//! runs the shared parse -> optimize -> lower pipeline.
//!
//! A [`Device`](crate::options::Device) value has already passed the
//! environment check: unavailable runtimes are rejected when the device
//! identifier is resolved, before any of these functions can be called.
//!
//! # Example
//!
//! ```ignore
//! use colibri::{convert_xgboost, ConvertOptions, XgbModel};
//! use ndarray::ArrayD;
//!
//! let model = XgbModel::from_json(&json)?;
//! let sample = ArrayD::zeros(vec![1, 28]);
//! let program = convert_xgboost(
//!     &model,
//!     ConvertOptions::builder().test_input(sample).build(),
//! )?;
//! let predictions = program.predict(x.view())?;
//! ```

use ndarray::ArrayD;

use crate::error::ConvertError;
use crate::options::{ConvertOptions, ExtraConfig};
use crate::program::TensorProgram;
use crate::registry;
use crate::source::lightgbm::LgbModel;
use crate::source::xgboost::XgbModel;
use crate::source::SourceModel;
use crate::{lower, optimize, parse};

/// Convert an estimator-API model (single estimator, pipeline, or voting
/// ensemble) into a tensor program.
///
/// The model's self-reported feature count, when available, is recorded in
/// the extra configuration under `n_features` and used to validate tree
/// split indices during lowering.
pub fn convert_estimator(
    model: &SourceModel,
    options: ConvertOptions,
) -> Result<TensorProgram, ConvertError> {
    let snapshot = model.clone();
    let mut extra = options.extra_config;
    if extra.n_features().is_none() {
        if let Some(n) = snapshot.n_features() {
            extra.set_n_features(n);
        }
    }
    convert_snapshot(snapshot, options.device, extra)
}

/// Convert a LightGBM text model into a tensor program.
///
/// LightGBM models always self-report their feature count.
pub fn convert_lightgbm(
    model: &LgbModel,
    options: ConvertOptions,
) -> Result<TensorProgram, ConvertError> {
    let snapshot = model.clone();
    let mut extra = options.extra_config;
    extra.set_n_features(snapshot.n_features());
    convert_snapshot(snapshot.to_source(), options.device, extra)
}

/// Convert an XGBoost JSON model into a tensor program.
///
/// XGBoost dumps do not always record the trained feature count. When the
/// model self-reports one it is used; otherwise `test_input` must be a
/// two-dimensional sample array and its second dimension is taken. With
/// neither, conversion fails with
/// [`ConvertError::FeatureCountInference`].
pub fn convert_xgboost(
    model: &XgbModel,
    options: ConvertOptions,
) -> Result<TensorProgram, ConvertError> {
    let snapshot = model.clone();
    let mut extra = options.extra_config;
    if extra.n_features().is_none() {
        let n = match snapshot.num_feature() {
            Some(n) => n,
            None => infer_feature_count(options.test_input.as_ref())?,
        };
        extra.set_n_features(n);
    }
    convert_snapshot(snapshot.to_source()?, options.device, extra)
}

/// Shared pipeline over the private snapshot.
fn convert_snapshot(
    snapshot: SourceModel,
    device: crate::options::Device,
    extra: ExtraConfig,
) -> Result<TensorProgram, ConvertError> {
    let registry = registry::global();
    let mut topology = parse::parse_source(&snapshot, &extra, registry)?;
    optimize::prune_identity_ops(&mut topology);
    let program = lower::compile(&topology, device, &extra, registry)?;
    tracing::debug!(n_steps = program.n_steps(), device = %device, "compiled tensor program");
    Ok(program)
}

/// Take the feature count from a two-dimensional sample input.
fn infer_feature_count(test_input: Option<&ArrayD<f32>>) -> Result<usize, ConvertError> {
    match test_input {
        Some(sample) if sample.ndim() == 2 => Ok(sample.shape()[1]),
        Some(sample) => Err(ConvertError::FeatureCountInference(format!(
            "the sample input must be two-dimensional (rows x features), got {} dimension(s); \
             either supply such a sample or use a model that reports its feature count",
            sample.ndim()
        ))),
        None => Err(ConvertError::FeatureCountInference(
            "the model does not report its feature count; pass a two-dimensional sample \
             input so the count can be taken from its second dimension"
                .to_string(),
        )),
    }
}
