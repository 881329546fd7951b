//! Ensemble aggregation lowering: element-wise mean and soft voting.

use ndarray::{Array2, ArrayView2};

use crate::ir::{AggregateMode, OpConfig, OperatorNode};
use crate::options::{Device, ExtraConfig};
use crate::program::{ExecutionError, TensorModule};
use crate::transform::OutputTransform;

use super::{classification_outputs, OpError};

#[derive(Debug)]
pub(crate) struct AggregatorModule {
    mode: AggregateMode,
    n_members: usize,
}

impl TensorModule for AggregatorModule {
    fn forward(&self, inputs: &[ArrayView2<'_, f32>]) -> Result<Vec<Array2<f32>>, ExecutionError> {
        if inputs.len() != self.n_members {
            return Err(ExecutionError::InputArityMismatch {
                expected: self.n_members,
                actual: inputs.len(),
            });
        }
        let first_dim = inputs[0].dim();
        for input in &inputs[1..] {
            if input.dim() != first_dim {
                return Err(ExecutionError::AggregateShapeMismatch {
                    first: first_dim,
                    other: input.dim(),
                });
            }
        }

        let mut mean = inputs[0].to_owned();
        for input in &inputs[1..] {
            mean += input;
        }
        mean /= self.n_members as f32;

        match self.mode {
            AggregateMode::Mean => Ok(vec![mean]),
            AggregateMode::SoftVote => {
                // Member probabilities are already normalized; averaging
                // preserves that, so no further transform is applied.
                let (labels, proba) = classification_outputs(mean, OutputTransform::Identity);
                Ok(vec![labels, proba])
            }
        }
    }

    fn n_outputs(&self) -> usize {
        match self.mode {
            AggregateMode::Mean => 1,
            AggregateMode::SoftVote => 2,
        }
    }
}

pub(crate) fn convert(
    node: &OperatorNode,
    _device: Device,
    _extra: &ExtraConfig,
) -> Result<Box<dyn TensorModule>, OpError> {
    let config = match &node.config {
        OpConfig::Aggregate(config) => config,
        other => return Err(super::config_mismatch("aggregate", other)),
    };
    Ok(Box::new(AggregatorModule {
        mode: config.mode,
        n_members: config.n_members,
    }))
}
