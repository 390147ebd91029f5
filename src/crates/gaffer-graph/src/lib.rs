//! Execution graph data model and traversal engine for gaffer.
//!
//! A planner agent emits a directed acyclic graph of work nodes each cycle.
//! This crate owns the typed representation of that graph, its validation
//! (reference integrity and acyclicity), the ready-set computation that
//! drives traversal, and the per-edge activation conditions evaluated
//! against upstream outcomes. The graph itself is immutable; node status
//! lives in the checkpoint layer and is passed in by reference for every
//! query.

pub mod condition;
pub mod engine;
pub mod error;
pub mod linearize;
pub mod model;

pub use condition::{CompareOp, EdgeCondition, Literal};
pub use engine::GraphEngine;
pub use error::{GraphError, Result};
pub use linearize::{linearize_sprints, Sprint};
pub use model::{
    ComplexityHint, ContextFidelity, Domain, Edge, Graph, HandlerKind, Node, NodeId, NodeOutcome,
    NodeStatus, NodeType,
};
