//! Structural simplification passes.
//!
//! Passes rewrite the private topology between parsing and lowering; they
//! must preserve prediction semantics exactly. The compiler re-checks
//! acyclicity afterwards, so a defective pass fails loudly instead of
//! producing a wrong program.

use crate::ir::{InputBinding, OpConfig, OpKind, Topology};

/// Remove scalers that are the identity transform (offset 0, scale 1),
/// rewiring their consumers to read the scaler's own input.
///
/// Scalers that feed the program output directly are kept: program outputs
/// must be node ports.
pub fn prune_identity_ops(topology: &mut Topology) {
    let n = topology.n_nodes();
    let mut redirect: Vec<Option<InputBinding>> = vec![None; n];
    for (id, node) in topology.nodes.iter().enumerate() {
        if node.kind != OpKind::Scaler {
            continue;
        }
        if let OpConfig::Scaler(config) = &node.config {
            let identity = config.offset.iter().all(|&v| v == 0.0)
                && config.scale.iter().all(|&v| v == 1.0);
            if identity {
                redirect[id] = Some(node.inputs[0]);
            }
        }
    }
    for output in &topology.outputs {
        redirect[output.node] = None;
    }
    if redirect.iter().all(Option::is_none) {
        return;
    }

    let resolve = |mut binding: InputBinding| -> InputBinding {
        while let InputBinding::Port(port) = binding {
            match redirect[port.node] {
                Some(next) if port.port == 0 => binding = next,
                _ => break,
            }
        }
        binding
    };

    // Rewire every consumer past the pruned nodes.
    for node in &mut topology.nodes {
        for binding in &mut node.inputs {
            *binding = resolve(*binding);
        }
    }

    // Compact the node list and remap ids.
    let mut remap = vec![usize::MAX; n];
    let mut kept = 0usize;
    for (id, pruned) in redirect.iter().enumerate() {
        if pruned.is_none() {
            remap[id] = kept;
            kept += 1;
        }
    }
    let pruned_count = n - kept;
    let mut old_nodes = std::mem::take(&mut topology.nodes);
    for (id, node) in old_nodes.drain(..).enumerate() {
        if redirect[id].is_none() {
            topology.nodes.push(node);
        }
    }
    for node in &mut topology.nodes {
        for binding in &mut node.inputs {
            if let InputBinding::Port(port) = binding {
                port.node = remap[port.node];
            }
        }
    }
    for output in &mut topology.outputs {
        output.node = remap[output.node];
    }
    tracing::trace!(pruned = pruned_count, "pruned identity operators");
}
