//! Tree-ensemble lowering.
//!
//! Source trees are captured into structure-of-arrays storage for
//! cache-friendly traversal. Evaluation walks every tree per sample,
//! accumulating leaf values into margin columns (`group * leaf_width + j`),
//! then applies the ensemble's averaging and output transform. Missing
//! (NaN) feature values follow the per-node default direction.
//!
//! Lowering validates the captured structure up front: child indices in
//! range, no revisited nodes (the traversal must terminate), leaf-value
//! layout consistent with `leaf_width`, and, when the input width is known
//! from the extra configuration, split feature indices within that width.
//! Categorical splits are rejected here rather than mispredicting.

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::ir::{OpConfig, OperatorNode, TreeEnsembleConfig};
use crate::options::{Device, ExtraConfig};
use crate::program::{single_input, ExecutionError, TensorModule};
use crate::source::{ComparisonOp, SourceTree, SplitKind};
use crate::transform::OutputTransform;
use crate::utils::Parallelism;

use super::{classification_outputs, OpError};

// =============================================================================
// LoweredTree
// =============================================================================

/// One tree in SoA form. Child indices are local to the tree, root at 0.
#[derive(Debug)]
struct LoweredTree {
    split_indices: Box<[u32]>,
    thresholds: Box<[f32]>,
    left: Box<[u32]>,
    right: Box<[u32]>,
    default_left: Box<[bool]>,
    is_leaf: Box<[bool]>,
    /// `leaf_width` entries per node.
    values: Box<[f32]>,
}

impl LoweredTree {
    fn from_source(
        source: &SourceTree,
        tree: usize,
        leaf_width: usize,
        n_features: Option<usize>,
    ) -> Result<Self, OpError> {
        let n_nodes = source.n_nodes();
        if n_nodes == 0 {
            return Err(OpError::EmptyTree { tree });
        }
        for (field, len) in [
            ("right_children", source.right_children.len()),
            ("split_indices", source.split_indices.len()),
            ("split_conditions", source.split_conditions.len()),
            ("default_left", source.default_left.len()),
        ] {
            if len != n_nodes {
                return Err(OpError::ArrayLenMismatch {
                    tree,
                    field,
                    expected: n_nodes,
                    actual: len,
                });
            }
        }
        if source.values.len() != n_nodes * leaf_width {
            return Err(OpError::ValuesLenMismatch {
                tree,
                expected: n_nodes * leaf_width,
                actual: source.values.len(),
            });
        }
        if let Some(split_types) = &source.split_types {
            if split_types.contains(&SplitKind::Categorical) {
                return Err(OpError::CategoricalSplit { tree });
            }
        }

        let mut is_leaf = vec![false; n_nodes];
        let mut left = vec![0u32; n_nodes];
        let mut right = vec![0u32; n_nodes];
        for node in 0..n_nodes {
            let l = source.left_children[node];
            let r = source.right_children[node];
            if l < 0 {
                is_leaf[node] = true;
                continue;
            }
            for child in [l, r] {
                if child < 0 || child as usize >= n_nodes {
                    return Err(OpError::ChildOutOfRange {
                        tree,
                        node,
                        child,
                        n_nodes,
                    });
                }
            }
            left[node] = l as u32;
            right[node] = r as u32;

            if let Some(n_features) = n_features {
                let feature = source.split_indices[node];
                if feature as usize >= n_features {
                    return Err(OpError::SplitIndexOutOfRange {
                        tree,
                        node,
                        feature,
                        n_features,
                    });
                }
            }
        }

        let lowered = LoweredTree {
            split_indices: source.split_indices.clone().into_boxed_slice(),
            thresholds: source.split_conditions.clone().into_boxed_slice(),
            left: left.into_boxed_slice(),
            right: right.into_boxed_slice(),
            default_left: source.default_left.clone().into_boxed_slice(),
            is_leaf: is_leaf.into_boxed_slice(),
            values: source.values.clone().into_boxed_slice(),
        };
        lowered.check_reachability(tree)?;
        Ok(lowered)
    }

    /// Depth-first walk from the root rejecting revisited nodes, so that
    /// `traverse` cannot loop on corrupted child pointers.
    fn check_reachability(&self, tree: usize) -> Result<(), OpError> {
        let n_nodes = self.is_leaf.len();
        let mut visited = vec![false; n_nodes];
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            if visited[node] {
                return Err(OpError::NodeRevisited { tree, node });
            }
            visited[node] = true;
            if !self.is_leaf[node] {
                stack.push(self.left[node] as usize);
                stack.push(self.right[node] as usize);
            }
        }
        Ok(())
    }

    /// Largest feature index this tree splits on, plus one.
    fn min_width(&self) -> usize {
        self.is_leaf
            .iter()
            .zip(self.split_indices.iter())
            .filter(|(&leaf, _)| !leaf)
            .map(|(_, &f)| f as usize + 1)
            .max()
            .unwrap_or(0)
    }

    #[inline]
    fn traverse(&self, sample: ArrayView1<'_, f32>, comparison: ComparisonOp) -> usize {
        let mut node = 0usize;
        while !self.is_leaf[node] {
            let value = sample[self.split_indices[node] as usize];
            node = if value.is_nan() {
                if self.default_left[node] {
                    self.left[node]
                } else {
                    self.right[node]
                }
            } else {
                let go_left = match comparison {
                    ComparisonOp::LessThan => value < self.thresholds[node],
                    ComparisonOp::LessOrEqual => value <= self.thresholds[node],
                };
                if go_left {
                    self.left[node]
                } else {
                    self.right[node]
                }
            } as usize;
        }
        node
    }

    #[inline]
    fn leaf_values(&self, node: usize, leaf_width: usize) -> &[f32] {
        &self.values[node * leaf_width..(node + 1) * leaf_width]
    }
}

// =============================================================================
// TreeEnsembleModule
// =============================================================================

#[derive(Debug)]
pub(crate) struct TreeEnsembleModule {
    trees: Vec<LoweredTree>,
    tree_groups: Box<[u32]>,
    leaf_width: usize,
    n_columns: usize,
    base_score: Box<[f32]>,
    /// Per-column divisor for bagged ensembles.
    column_divisor: Option<Box<[f32]>>,
    comparison: ComparisonOp,
    transform: OutputTransform,
    classification: bool,
    /// Minimum acceptable input width.
    min_width: usize,
    parallelism: Parallelism,
}

impl TreeEnsembleModule {
    fn accumulate_row(&self, sample: ArrayView1<'_, f32>, row: &mut [f32]) {
        for (tree, &group) in self.trees.iter().zip(self.tree_groups.iter()) {
            let leaf = tree.traverse(sample, self.comparison);
            let start = group as usize * self.leaf_width;
            for (slot, &value) in row[start..]
                .iter_mut()
                .zip(tree.leaf_values(leaf, self.leaf_width))
            {
                *slot += value;
            }
        }
        if let Some(divisor) = &self.column_divisor {
            for (slot, &d) in row.iter_mut().zip(divisor.iter()) {
                *slot /= d;
            }
        }
        for (slot, &base) in row.iter_mut().zip(self.base_score.iter()) {
            *slot += base;
        }
    }
}

impl TensorModule for TreeEnsembleModule {
    fn forward(&self, inputs: &[ArrayView2<'_, f32>]) -> Result<Vec<Array2<f32>>, ExecutionError> {
        let x = single_input(inputs)?;
        if x.ncols() < self.min_width {
            return Err(ExecutionError::InputWidthMismatch {
                expected: self.min_width,
                actual: x.ncols(),
            });
        }

        let n_rows = x.nrows();
        let mut margins = Array2::zeros((n_rows, self.n_columns));
        let buffer = margins
            .as_slice_mut()
            .expect("freshly allocated arrays are standard layout");
        self.parallelism
            .maybe_par_chunks_mut(buffer, self.n_columns, |row_idx, row| {
                self.accumulate_row(x.row(row_idx), row);
            });

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

// =============================================================================
// Converters
// =============================================================================

fn build(
    node: &OperatorNode,
    device: Device,
    extra: &ExtraConfig,
    classification: bool,
) -> Result<Box<dyn TensorModule>, OpError> {
    let config = match &node.config {
        OpConfig::TreeEnsemble(config) => config,
        other => return Err(super::config_mismatch("tree_ensemble", other)),
    };
    let module = lower_ensemble(config, extra.n_features(), classification, device)?;
    Ok(Box::new(module))
}

fn lower_ensemble(
    config: &TreeEnsembleConfig,
    n_features: Option<usize>,
    classification: bool,
    device: Device,
) -> Result<TreeEnsembleModule, OpError> {
    if config.tree_groups.len() != config.trees.len() {
        return Err(OpError::TreeGroupsLenMismatch {
            tree_groups: config.tree_groups.len(),
            n_trees: config.trees.len(),
        });
    }
    let n_columns = config.n_groups * config.leaf_width;
    if config.base_score.len() != n_columns {
        return Err(OpError::BaseScoreLenMismatch {
            expected: n_columns,
            columns: n_columns,
            actual: config.base_score.len(),
        });
    }
    for (tree, &group) in config.tree_groups.iter().enumerate() {
        if group as usize >= config.n_groups {
            return Err(OpError::GroupOutOfRange {
                tree,
                group,
                n_groups: config.n_groups,
            });
        }
    }

    let trees = config
        .trees
        .iter()
        .enumerate()
        .map(|(idx, tree)| LoweredTree::from_source(tree, idx, config.leaf_width, n_features))
        .collect::<Result<Vec<_>, _>>()?;
    let min_width = trees.iter().map(LoweredTree::min_width).max().unwrap_or(0);

    let column_divisor = config.average.then(|| {
        let mut per_group = vec![0.0f32; config.n_groups];
        for &group in config.tree_groups.iter() {
            per_group[group as usize] += 1.0;
        }
        (0..n_columns)
            .map(|column| per_group[column / config.leaf_width].max(1.0))
            .collect::<Vec<_>>()
            .into_boxed_slice()
    });

    Ok(TreeEnsembleModule {
        trees,
        tree_groups: config.tree_groups.clone().into_boxed_slice(),
        leaf_width: config.leaf_width,
        n_columns,
        base_score: config.base_score.clone().into_boxed_slice(),
        column_divisor,
        comparison: config.comparison,
        transform: config.transform,
        classification,
        min_width,
        parallelism: device.parallelism(),
    })
}

pub(crate) fn convert_regressor(
    node: &OperatorNode,
    device: Device,
    extra: &ExtraConfig,
) -> Result<Box<dyn TensorModule>, OpError> {
    build(node, device, extra, false)
}

pub(crate) fn convert_classifier(
    node: &OperatorNode,
    device: Device,
    extra: &ExtraConfig,
) -> Result<Box<dyn TensorModule>, OpError> {
    build(node, device, extra, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn stump(threshold: f32, left_val: f32, right_val: f32) -> SourceTree {
        SourceTree {
            left_children: vec![1, -1, -1],
            right_children: vec![2, -1, -1],
            split_indices: vec![0, 0, 0],
            split_conditions: vec![threshold, 0.0, 0.0],
            default_left: vec![true, true, true],
            values: vec![0.0, left_val, right_val],
            split_types: None,
        }
    }

    fn regression_config(trees: Vec<SourceTree>, base: f32) -> TreeEnsembleConfig {
        let n_trees = trees.len();
        TreeEnsembleConfig {
            trees,
            tree_groups: vec![0; n_trees],
            n_groups: 1,
            leaf_width: 1,
            base_score: vec![base],
            average: false,
            comparison: ComparisonOp::LessOrEqual,
            transform: OutputTransform::Identity,
            n_classes: None,
        }
    }

    #[test]
    fn boosted_stumps_sum_on_base_score() {
        let config = regression_config(
            vec![stump(0.5, 1.0, 2.0), stump(0.5, 0.5, 1.5)],
            0.25,
        );
        let module = lower_ensemble(&config, Some(1), false, Device::Cpu).unwrap();
        let x = array![[0.3], [0.7]];
        let out = module.forward(&[x.view()]).unwrap();
        assert_eq!(out[0], array![[1.75], [3.75]]);
    }

    #[test]
    fn nan_follows_default_direction() {
        let mut tree = stump(0.5, -1.0, 1.0);
        tree.default_left[0] = false;
        let config = regression_config(vec![tree], 0.0);
        let module = lower_ensemble(&config, Some(1), false, Device::Cpu).unwrap();
        let x = array![[f32::NAN]];
        let out = module.forward(&[x.view()]).unwrap();
        assert_eq!(out[0], array![[1.0]]);
    }

    #[test]
    fn comparison_op_changes_boundary_routing() {
        let config = regression_config(vec![stump(0.5, -1.0, 1.0)], 0.0);
        let x = array![[0.5]];

        let le = lower_ensemble(&config, Some(1), false, Device::Cpu).unwrap();
        assert_eq!(le.forward(&[x.view()]).unwrap()[0], array![[-1.0]]);

        let mut lt_config = config.clone();
        lt_config.comparison = ComparisonOp::LessThan;
        let lt = lower_ensemble(&lt_config, Some(1), false, Device::Cpu).unwrap();
        assert_eq!(lt.forward(&[x.view()]).unwrap()[0], array![[1.0]]);
    }

    #[test]
    fn averaged_distribution_leaves() {
        // Two trees with 2-class distribution leaves, averaged.
        let tree_a = SourceTree {
            values: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            ..stump(0.5, 0.0, 0.0)
        };
        let tree_b = SourceTree {
            values: vec![0.0, 0.0, 0.5, 0.5, 0.0, 1.0],
            ..stump(0.5, 0.0, 0.0)
        };
        let config = TreeEnsembleConfig {
            trees: vec![tree_a, tree_b],
            tree_groups: vec![0, 0],
            n_groups: 1,
            leaf_width: 2,
            base_score: vec![0.0, 0.0],
            average: true,
            comparison: ComparisonOp::LessOrEqual,
            transform: OutputTransform::Identity,
            n_classes: Some(2),
        };
        let module = lower_ensemble(&config, Some(1), true, Device::Cpu).unwrap();
        let x = array![[0.2]];
        let out = module.forward(&[x.view()]).unwrap();
        // mean of [1.0, 0.0] and [0.5, 0.5]
        assert_eq!(out[1], array![[0.75, 0.25]]);
        assert_eq!(out[0], array![[0.0]]);
    }

    #[test]
    fn categorical_split_is_rejected() {
        let mut tree = stump(0.5, 0.0, 1.0);
        tree.split_types = Some(vec![
            SplitKind::Categorical,
            SplitKind::Numeric,
            SplitKind::Numeric,
        ]);
        let config = regression_config(vec![tree], 0.0);
        let err = lower_ensemble(&config, Some(1), false, Device::Cpu).unwrap_err();
        assert!(matches!(err, OpError::CategoricalSplit { tree: 0 }));
    }

    #[test]
    fn split_index_validated_against_known_width() {
        let mut tree = stump(0.5, 0.0, 1.0);
        tree.split_indices[0] = 7;
        let config = regression_config(vec![tree], 0.0);
        let err = lower_ensemble(&config, Some(3), false, Device::Cpu).unwrap_err();
        assert!(matches!(
            err,
            OpError::SplitIndexOutOfRange {
                feature: 7,
                n_features: 3,
                ..
            }
        ));
    }

    #[test]
    fn child_cycle_is_rejected() {
        let mut tree = stump(0.5, 0.0, 1.0);
        tree.left_children[1] = 0;
        tree.right_children[1] = 2;
        let config = regression_config(vec![tree], 0.0);
        let err = lower_ensemble(&config, Some(1), false, Device::Cpu).unwrap_err();
        assert!(matches!(err, OpError::NodeRevisited { .. }));
    }

    #[test]
    fn parallel_matches_sequential() {
        let config = regression_config(
            vec![stump(0.5, 1.0, 2.0), stump(0.2, -0.5, 0.5)],
            0.1,
        );
        let sequential = lower_ensemble(&config, Some(1), false, Device::Cpu).unwrap();
        let parallel = lower_ensemble(&config, Some(1), false, Device::CpuParallel).unwrap();
        let x = array![[0.1], [0.3], [0.6], [0.9]];
        assert_eq!(
            sequential.forward(&[x.view()]).unwrap()[0],
            parallel.forward(&[x.view()]).unwrap()[0]
        );
    }
}
