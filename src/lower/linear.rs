//! Linear model lowering: `margins = x · coefficients + intercepts`.
//!
//! Serves both linear kinds: regressors emit the margins directly,
//! classifiers post-process them into `[labels, probabilities]`.

use ndarray::{Array1, Array2, ArrayView2};

use crate::ir::{OpConfig, OperatorNode};
use crate::options::{Device, ExtraConfig};
use crate::program::{single_input, ExecutionError, TensorModule};
use crate::transform::OutputTransform;

use super::{classification_outputs, OpError};

#[derive(Debug)]
pub(crate) struct LinearModule {
    /// `(n_features, n_columns)`.
    coefficients: Array2<f32>,
    intercepts: Array1<f32>,
    transform: OutputTransform,
    classification: bool,
}

impl TensorModule for LinearModule {
    fn forward(&self, inputs: &[ArrayView2<'_, f32>]) -> Result<Vec<Array2<f32>>, ExecutionError> {
        let x = single_input(inputs)?;
        if x.ncols() != self.coefficients.nrows() {
            return Err(ExecutionError::InputWidthMismatch {
                expected: self.coefficients.nrows(),
                actual: x.ncols(),
            });
        }
        let margins = x.dot(&self.coefficients) + &self.intercepts;
        if self.classification {
            let (labels, proba) = classification_outputs(margins, self.transform);
            Ok(vec![labels, proba])
        } else {
            Ok(vec![margins])
        }
    }

    fn n_outputs(&self) -> usize {
        if self.classification {
            2
        } else {
            1
        }
    }
}

fn build(node: &OperatorNode, classification: bool) -> Result<Box<dyn TensorModule>, OpError> {
    let config = match &node.config {
        OpConfig::Linear(config) => config,
        other => return Err(super::config_mismatch("linear", other)),
    };
    let columns = config.coefficients.ncols();
    if config.intercepts.len() != columns {
        return Err(OpError::InterceptLenMismatch {
            expected: columns,
            columns,
            actual: config.intercepts.len(),
        });
    }
    Ok(Box::new(LinearModule {
        coefficients: config.coefficients.clone(),
        intercepts: config.intercepts.clone(),
        transform: config.transform,
        classification,
    }))
}

pub(crate) fn convert_regressor(
    node: &OperatorNode,
    _device: Device,
    _extra: &ExtraConfig,
) -> Result<Box<dyn TensorModule>, OpError> {
    build(node, false)
}

pub(crate) fn convert_classifier(
    node: &OperatorNode,
    _device: Device,
    _extra: &ExtraConfig,
) -> Result<Box<dyn TensorModule>, OpError> {
    build(node, true)
}
