//! Output transformation for lowered predictors.
//!
//! [`OutputTransform`] defines how raw margins are converted to final
//! predictions. It is captured into operator configurations at parse time
//! so that lowering does not need to know the original objective.
//!
//! # Variants
//!
//! - [`Identity`](OutputTransform::Identity): no transformation (regression,
//!   or probabilities that are already normalized, e.g. averaged forest
//!   leaf distributions)
//! - [`Sigmoid`](OutputTransform::Sigmoid): logistic sigmoid for binary
//!   classification margins
//! - [`Softmax`](OutputTransform::Softmax): softmax for multiclass margins

/// Inference-time output transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputTransform {
    /// No transformation; output = margin.
    #[default]
    Identity,

    /// Logistic sigmoid: output = 1 / (1 + exp(-margin)).
    Sigmoid,

    /// Softmax: output_i = exp(margin_i) / sum(exp(margin_j)).
    Softmax,
}

impl OutputTransform {
    /// Apply the transformation in-place to a row-major predictions buffer.
    ///
    /// `n_outputs` is the number of output columns (1 for regression or
    /// binary margins, n_classes for multiclass).
    ///
    /// Sigmoid clamps its input to avoid overflow; softmax subtracts the
    /// per-row maximum before exponentiating. NaN and Inf inputs propagate
    /// through without panics.
    ///
    /// # Panics
    ///
    /// Panics if `predictions.len()` is not divisible by `n_outputs` or if
    /// `n_outputs` is 0.
    #[inline]
    pub fn transform_inplace(&self, predictions: &mut [f32], n_outputs: usize) {
        assert!(n_outputs > 0, "n_outputs must be > 0");
        assert!(
            predictions.len() % n_outputs == 0,
            "predictions.len() must be divisible by n_outputs"
        );

        match self {
            OutputTransform::Identity => {}
            OutputTransform::Sigmoid => {
                for x in predictions.iter_mut() {
                    *x = sigmoid(*x);
                }
            }
            OutputTransform::Softmax => {
                for row in predictions.chunks_mut(n_outputs) {
                    softmax_inplace(row);
                }
            }
        }
    }
}

/// Numerically stable sigmoid.
#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    let x = x.clamp(-500.0, 500.0);
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax in-place.
fn softmax_inplace(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}
