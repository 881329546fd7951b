//! Conversion-time error taxonomy.
//!
//! Every failure of a single conversion call surfaces as a [`ConvertError`].
//! Nothing in the pipeline retries internally: callers that want
//! retry-on-different-input semantics re-invoke conversion with corrected
//! arguments. No partial tensor program is ever returned.

use crate::ir::OpKind;
use crate::lower::OpError;

/// Error type for model conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The parser encountered a source model kind with no derivable
    /// operator kind.
    #[error("unsupported model kind: {kind}")]
    UnsupportedModel { kind: String },

    /// The topology contained a cycle when it was linearized. This is an
    /// internal defect (parser or optimization-pass bug), never caused by
    /// caller input.
    #[error("cycle detected in topology at node `{node}`")]
    CycleDetected { node: String },

    /// No converter is registered for an operator kind at lowering time.
    #[error("no converter registered for operator kind `{kind}`")]
    UnknownOperator { kind: OpKind },

    /// A different converter was registered for an already-registered kind.
    #[error("a different converter is already registered for operator kind `{kind}`")]
    DuplicateRegistration { kind: OpKind },

    /// A converter rejected its node's configuration. Aborts the whole
    /// compile; carries the offending node's kind and topological position.
    #[error("lowering failed for operator `{kind}` at position {position}: {source}")]
    Lowering {
        kind: OpKind,
        position: usize,
        #[source]
        source: OpError,
    },

    /// The feature count of the input could not be determined.
    #[error("cannot infer feature count: {0}")]
    FeatureCountInference(String),

    /// The tensor runtime is not available for the requested device.
    #[error("tensor runtime is not available for device `{device}`")]
    Environment { device: String },
}
