//! Core pipeline domain types: the fixed stage graph and per-run state.

pub mod graph;
pub mod node;

pub use graph::StageGraph;
pub use node::{NodeKey, NodeStatus, PipelineStatus, Run, RunSnapshot, StageNode};
