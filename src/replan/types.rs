use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pipeline::NodeKey;

/// Why a replan was requested. Only one trigger exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanReason {
    BenchmarkAssumptionsUpdated,
}

impl ReplanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BenchmarkAssumptionsUpdated => "benchmark_assumptions_updated",
        }
    }
}

impl std::fmt::Display for ReplanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplanReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "benchmark_assumptions_updated" => Ok(Self::BenchmarkAssumptionsUpdated),
            _ => Err(format!("Invalid replan reason: {}", s)),
        }
    }
}

/// Lifecycle of a replan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplanState {
    /// Recorded; waiting for a restart confirmation if one is required.
    #[default]
    Pending,
    /// The controller is rebuilding the stale nodes.
    Started,
    /// Every staled node has been rebuilt.
    Completed,
}

impl ReplanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ReplanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplanState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid replan state: {}", s)),
        }
    }
}

/// One accepted upstream-edit replan, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanRecord {
    pub id: i64,
    pub run_id: String,
    pub reason: ReplanReason,
    pub benchmark_edit_version: i64,
    pub rebuild_from_stage: NodeKey,
    pub requires_restart: bool,
    pub stale_nodes: Vec<NodeKey>,
    pub current_stage: NodeKey,
    pub state: ReplanState,
    pub created_at: String,
}
