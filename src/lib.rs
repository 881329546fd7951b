//! colibri: compile trained estimators into tensor programs.
//!
//! Converts trained tree-ensemble and classical estimator descriptions —
//! scikit-learn-style estimators and pipelines, XGBoost JSON models,
//! LightGBM text models — into self-contained [`ndarray`] programs that
//! reproduce the source model's `predict` / `predict_proba` semantics.
//!
//! # Key Types
//!
//! - [`convert_estimator`] / [`convert_xgboost`] / [`convert_lightgbm`] -
//!   per-family entry points
//! - [`SourceModel`] - estimator-API model descriptions
//! - [`TensorProgram`] - the compiled, device-bound program
//! - [`ConvertOptions`] / [`Device`] / [`ExtraConfig`] - conversion options
//!
//! # Pipeline
//!
//! Conversion is a single synchronous pass: the source model is cloned
//! (the caller's object is never touched), *parsed* into a [`Topology`] of
//! operator nodes, optionally simplified, and *lowered* node by node
//! through the converter [`Registry`] into one composed program.
//!
//! # Example
//!
//! ```ignore
//! use colibri::{convert_lightgbm, ConvertOptions, LgbModel};
//!
//! let model = LgbModel::from_file("model.txt")?;
//! let program = convert_lightgbm(&model, ConvertOptions::default())?;
//! let labels = program.predict(x.view())?;
//! let proba = program.predict_proba(x.view())?;
//! ```

// Re-export approx traits for users who want to compare predictions
pub use approx;

pub mod convert;
pub mod error;
pub mod ir;
pub mod lower;
pub mod optimize;
pub mod options;
pub mod parse;
pub mod program;
pub mod registry;
pub mod source;
pub mod transform;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

// Entry points
pub use convert::{convert_estimator, convert_lightgbm, convert_xgboost};

// Options
pub use options::{ConfigValue, ConvertOptions, Device, ExtraConfig, N_FEATURES};

// Errors
pub use error::ConvertError;
pub use lower::OpError;
pub use program::ExecutionError;

// Programs
pub use program::{ProgramKind, TensorModule, TensorProgram};

// IR
pub use ir::{OpKind, Topology};
pub use registry::Registry;

// Source models
pub use source::lightgbm::LgbModel;
pub use source::xgboost::XgbModel;
pub use source::SourceModel;

// Shared utilities
pub use transform::OutputTransform;
pub use utils::Parallelism;
