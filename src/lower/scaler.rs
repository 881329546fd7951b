//! Scaler lowering: `y = (x - offset) * scale`.

use ndarray::{Array1, Array2, ArrayView2};

use crate::ir::{OpConfig, OperatorNode};
use crate::options::{Device, ExtraConfig};
use crate::program::{single_input, ExecutionError, TensorModule};

use super::OpError;

#[derive(Debug)]
pub(crate) struct ScalerModule {
    offset: Array1<f32>,
    scale: Array1<f32>,
}

impl TensorModule for ScalerModule {
    fn forward(&self, inputs: &[ArrayView2<'_, f32>]) -> Result<Vec<Array2<f32>>, ExecutionError> {
        let x = single_input(inputs)?;
        if x.ncols() != self.offset.len() {
            return Err(ExecutionError::InputWidthMismatch {
                expected: self.offset.len(),
                actual: x.ncols(),
            });
        }
        let out = (x - &self.offset) * &self.scale;
        Ok(vec![out])
    }
}

pub(crate) fn convert(
    node: &OperatorNode,
    _device: Device,
    _extra: &ExtraConfig,
) -> Result<Box<dyn TensorModule>, OpError> {
    let config = match &node.config {
        OpConfig::Scaler(config) => config,
        other => return Err(super::config_mismatch("scaler", other)),
    };
    if config.offset.len() != config.scale.len() {
        return Err(OpError::ScalerLenMismatch {
            offset: config.offset.len(),
            scale: config.scale.len(),
        });
    }
    Ok(Box::new(ScalerModule {
        offset: config.offset.clone(),
        scale: config.scale.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn scales_and_shifts() {
        let module = ScalerModule {
            offset: array![1.0, 2.0],
            scale: array![2.0, 0.5],
        };
        let x = array![[3.0, 4.0], [1.0, 2.0]];
        let out = module.forward(&[x.view()]).unwrap();
        assert_eq!(out[0], array![[4.0, 1.0], [0.0, 0.0]]);
    }

    #[test]
    fn width_mismatch_is_error() {
        let module = ScalerModule {
            offset: array![0.0, 0.0],
            scale: array![1.0, 1.0],
        };
        let x = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            module.forward(&[x.view()]),
            Err(ExecutionError::InputWidthMismatch { expected: 2, actual: 3 })
        ));
    }
}
