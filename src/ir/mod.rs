//! Intermediate representation for parsed source models.

mod node;
mod topology;

pub use node::{
    AggregateConfig, AggregateMode, InputBinding, LinearConfig, NodeId, OpConfig, OpKind,
    OperatorNode, PortRef, ScalerConfig, TreeEnsembleConfig,
};
pub use topology::Topology;
