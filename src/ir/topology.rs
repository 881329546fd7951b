//! The intermediate representation: a DAG of operator nodes.
//!
//! A [`Topology`] is built once by the parser, optionally rewritten by
//! structural-simplification passes, and consumed exactly once by the
//! compiler. [`Topology::topological_order`] produces the deterministic
//! linearization lowering walks: every node appears after all of its
//! producers, and ties between independent nodes are broken by declaration
//! order so that repeated conversions of the same model yield identical
//! programs.

use crate::error::ConvertError;

use super::node::{InputBinding, NodeId, OperatorNode, PortRef};

/// The operator graph for one source model.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub(crate) nodes: Vec<OperatorNode>,
    /// Terminal output ports, in the order the program exposes them.
    pub(crate) outputs: Vec<PortRef>,
    /// Expected external input width, when known.
    pub(crate) input_width: Option<usize>,
}

impl Topology {
    pub fn new(input_width: Option<usize>) -> Self {
        Self {
            nodes: Vec::new(),
            outputs: Vec::new(),
            input_width,
        }
    }

    /// Append a node, returning its id. Ids are dense and stable until a
    /// simplification pass compacts the graph.
    pub fn push_node(&mut self, node: OperatorNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &OperatorNode {
        &self.nodes[id]
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &OperatorNode> {
        self.nodes.iter()
    }

    pub fn outputs(&self) -> &[PortRef] {
        &self.outputs
    }

    pub fn input_width(&self) -> Option<usize> {
        self.input_width
    }

    /// Declare the program outputs as all ports of `terminal`.
    pub fn set_terminal(&mut self, terminal: NodeId) {
        let n_outputs = self.nodes[terminal].n_outputs;
        self.outputs = (0..n_outputs)
            .map(|port| PortRef {
                node: terminal,
                port,
            })
            .collect();
    }

    /// Rebind one input port of `consumer`. Used by simplification passes;
    /// the caller is responsible for keeping the graph acyclic, which
    /// `topological_order` re-checks defensively.
    pub fn rewire_input(&mut self, consumer: NodeId, slot: usize, binding: InputBinding) {
        self.nodes[consumer].inputs[slot] = binding;
    }

    /// Deterministic topological linearization (Kahn's algorithm).
    ///
    /// Ties among nodes with no ordering dependency are broken by
    /// declaration order. Fails with [`ConvertError::CycleDetected`] if the
    /// graph has been corrupted into a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, ConvertError> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        let mut successors: Vec<Vec<NodeId>> = vec![Vec::new(); n];

        for (id, node) in self.nodes.iter().enumerate() {
            for binding in &node.inputs {
                if let InputBinding::Port(port) = binding {
                    debug_assert!(port.node < n, "binding references missing node");
                    successors[port.node].push(id);
                    indegree[id] += 1;
                }
            }
        }

        // BTreeSet pops the smallest ready id first, which is exactly the
        // declaration-order tie-break.
        let mut ready: std::collections::BTreeSet<NodeId> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| id)
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(&id) = ready.iter().next() {
            ready.remove(&id);
            order.push(id);
            for &succ in &successors[id] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.insert(succ);
                }
            }
        }

        if order.len() < n {
            let stuck = indegree
                .iter()
                .position(|&d| d > 0)
                .expect("a node on the cycle has unresolved inputs");
            return Err(ConvertError::CycleDetected {
                node: self.nodes[stuck].name.clone(),
            });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::{AggregateConfig, AggregateMode, OpConfig, OpKind};

    fn test_node(name: &str, inputs: Vec<InputBinding>) -> OperatorNode {
        OperatorNode {
            kind: OpKind::Aggregator,
            name: name.to_string(),
            inputs,
            n_outputs: 1,
            config: OpConfig::Aggregate(AggregateConfig {
                mode: AggregateMode::Mean,
                n_members: 1,
                n_classes: None,
            }),
        }
    }

    fn port(node: NodeId) -> InputBinding {
        InputBinding::Port(PortRef { node, port: 0 })
    }

    #[test]
    fn chain_orders_by_dataflow() {
        let mut topo = Topology::new(None);
        let a = topo.push_node(test_node("a", vec![InputBinding::External(0)]));
        let b = topo.push_node(test_node("b", vec![port(a)]));
        let c = topo.push_node(test_node("c", vec![port(b)]));
        assert_eq!(topo.topological_order().unwrap(), vec![a, b, c]);
    }

    #[test]
    fn independent_nodes_keep_declaration_order() {
        let mut topo = Topology::new(None);
        let a = topo.push_node(test_node("a", vec![InputBinding::External(0)]));
        let b = topo.push_node(test_node("b", vec![InputBinding::External(0)]));
        let c = topo.push_node(test_node("agg", vec![port(b), port(a)]));
        // b's edge is listed before a's, but declaration order wins.
        assert_eq!(topo.topological_order().unwrap(), vec![a, b, c]);
    }

    #[test]
    fn back_edge_is_detected() {
        let mut topo = Topology::new(None);
        let a = topo.push_node(test_node("a", vec![InputBinding::External(0)]));
        let b = topo.push_node(test_node("b", vec![port(a)]));
        // Corrupt the graph: a now depends on b.
        topo.rewire_input(a, 0, port(b));
        let err = topo.topological_order().unwrap_err();
        assert!(matches!(err, ConvertError::CycleDetected { .. }));
    }

    #[test]
    fn self_loop_is_detected() {
        let mut topo = Topology::new(None);
        let a = topo.push_node(test_node("a", vec![InputBinding::External(0)]));
        topo.rewire_input(a, 0, port(a));
        assert!(matches!(
            topo.topological_order(),
            Err(ConvertError::CycleDetected { .. })
        ));
    }
}
