//! Typed error hierarchy for the Tailor orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `GateError` — gate open/resolve/expire failures
//! - `ControllerError` — run controller and stage execution failures
//! - `ReplanError` — upstream-edit replan failures

use crate::pipeline::NodeKey;
use thiserror::Error;

/// Errors from the gate manager.
///
/// `Conflict` and `Expired` are contract statuses, not bugs: clients retry
/// gate submissions over the network, and the loser of a concurrent resolve
/// must branch on a distinct status rather than a generic failure.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Gate {gate_id} is not the currently open gate for run {run_id}")]
    Conflict { run_id: String, gate_id: String },

    #[error("Gate {gate_id} was superseded by a rebuild of node {node}")]
    Expired { gate_id: String, node: NodeKey },

    #[error("Gate {gate_id} not found for run {run_id}")]
    NotFound { run_id: String, gate_id: String },

    #[error("Another gate ({open_gate}) is already open for run {run_id}")]
    AlreadyOpen { run_id: String, open_gate: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the run controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Run {id} not found")]
    RunNotFound { id: String },

    #[error("Run {id} is archived")]
    RunArchived { id: String },

    #[error("Stage {node} failed: {message}")]
    StageFailed { node: NodeKey, message: String },

    #[error("No stage implementation registered for node {node}")]
    NoStageImpl { node: NodeKey },

    #[error("Run {id} has a pending restart confirmation")]
    RestartPending { id: String },

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the replan trigger.
#[derive(Debug, Error)]
pub enum ReplanError {
    #[error("A restart confirmation is already pending for run {run_id}")]
    ConfirmationPending { run_id: String },

    #[error("No restart confirmation is pending for run {run_id}")]
    NothingPending { run_id: String },

    #[error("Run {id} not found")]
    RunNotFound { id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
