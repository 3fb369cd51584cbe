use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The fixed set of pipeline stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKey {
    Intake,
    Research,
    GapAnalysis,
    Interview,
    Blueprint,
    Sections,
    Quality,
    Export,
}

impl NodeKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Research => "research",
            Self::GapAnalysis => "gap_analysis",
            Self::Interview => "interview",
            Self::Blueprint => "blueprint",
            Self::Sections => "sections",
            Self::Quality => "quality",
            Self::Export => "export",
        }
    }

    /// All node keys in pipeline order.
    pub fn all() -> &'static [NodeKey] {
        &[
            Self::Intake,
            Self::Research,
            Self::GapAnalysis,
            Self::Interview,
            Self::Blueprint,
            Self::Sections,
            Self::Quality,
            Self::Export,
        ]
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intake" => Ok(Self::Intake),
            "research" => Ok(Self::Research),
            "gap_analysis" => Ok(Self::GapAnalysis),
            "interview" => Ok(Self::Interview),
            "blueprint" => Ok(Self::Blueprint),
            "sections" => Ok(Self::Sections),
            "quality" => Ok(Self::Quality),
            "export" => Ok(Self::Export),
            _ => Err(format!("Invalid node key: {}", s)),
        }
    }
}

/// Status of a single stage node.
///
/// A node cannot leave `Locked` until every upstream dependency is
/// `Complete` or `AutoApproved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Locked,
    Pending,
    InProgress,
    Blocked,
    Complete,
    AutoApproved,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Complete => "complete",
            Self::AutoApproved => "auto_approved",
        }
    }

    /// A node in either of these states satisfies its dependents.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Complete | Self::AutoApproved)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "locked" => Ok(Self::Locked),
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "complete" => Ok(Self::Complete),
            "auto_approved" => Ok(Self::AutoApproved),
            _ => Err(format!("Invalid node status: {}", s)),
        }
    }
}

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Idle,
    Running,
    Blocked,
    Error,
    Complete,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }

    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Complete)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "blocked" => Ok(Self::Blocked),
            "error" => Ok(Self::Error),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid pipeline status: {}", s)),
        }
    }
}

/// One stage node of a run, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageNode {
    pub run_id: String,
    pub node_key: NodeKey,
    pub status: NodeStatus,
    /// Bumped every time the node is rebuilt; gate resolutions against an
    /// older version are rejected as expired.
    pub active_version: i64,
    /// Stage-specific payload, opaque to the controller.
    pub meta: serde_json::Value,
}

impl StageNode {
    pub fn new(run_id: &str, node_key: NodeKey) -> Self {
        Self {
            run_id: run_id.to_string(),
            node_key,
            status: NodeStatus::Locked,
            active_version: 1,
            meta: serde_json::Value::Null,
        }
    }

    /// Whether a replan marked this node stale and its next entry must bump
    /// the version counter.
    pub fn is_stale(&self) -> bool {
        self.meta
            .get("stale")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Gate response previously recorded for the given gate id, if any.
    pub fn gate_response(&self, gate_id: &str) -> Option<&serde_json::Value> {
        self.meta.get("gate_responses").and_then(|r| r.get(gate_id))
    }
}

/// One pipeline run, as persisted. Exclusively mutated by the run controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub current_stage: NodeKey,
    pub pipeline_status: PipelineStatus,
    /// The single open gate id, if any.
    pub pending_gate: Option<String>,
    /// Payload snapshot of the open gate, replayed to reconnecting clients.
    pub pending_gate_data: Option<serde_json::Value>,
    /// Finer-grained position inside the current stage (e.g. a section name).
    pub active_node: Option<String>,
    /// Bumped once per accepted upstream benchmark edit, never reused.
    pub benchmark_edit_version: i64,
    /// Set when a replan requires an explicit restart confirmation; gate
    /// resolution is refused while this is set.
    pub restart_pending: bool,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Run {
    pub fn is_gate_open(&self) -> bool {
        self.pending_gate.is_some()
    }
}

/// A run snapshot: the run record plus its full stage node set. The sole
/// resynchronization mechanism after reconnect or restart — events are not
/// replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run: Run,
    pub nodes: Vec<StageNode>,
}

impl RunSnapshot {
    pub fn node(&self, key: NodeKey) -> Option<&StageNode> {
        self.nodes.iter().find(|n| n.node_key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_key_roundtrip() {
        for s in &[
            "intake",
            "research",
            "gap_analysis",
            "interview",
            "blueprint",
            "sections",
            "quality",
            "export",
        ] {
            let parsed: NodeKey = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<NodeKey>().is_err());
    }

    #[test]
    fn test_node_status_roundtrip() {
        for s in &[
            "locked",
            "pending",
            "in_progress",
            "blocked",
            "complete",
            "auto_approved",
        ] {
            let parsed: NodeStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn test_pipeline_status_roundtrip() {
        for s in &["idle", "running", "blocked", "error", "complete"] {
            let parsed: PipelineStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<PipelineStatus>().is_err());
    }

    #[test]
    fn test_serde_produces_lowercase_strings() {
        assert_eq!(
            serde_json::to_string(&NodeKey::GapAnalysis).unwrap(),
            "\"gap_analysis\""
        );
        assert_eq!(
            serde_json::to_string(&NodeStatus::AutoApproved).unwrap(),
            "\"auto_approved\""
        );
        assert_eq!(
            serde_json::to_string(&PipelineStatus::Blocked).unwrap(),
            "\"blocked\""
        );
    }

    #[test]
    fn test_node_status_satisfied() {
        assert!(NodeStatus::Complete.is_satisfied());
        assert!(NodeStatus::AutoApproved.is_satisfied());
        assert!(!NodeStatus::Pending.is_satisfied());
        assert!(!NodeStatus::InProgress.is_satisfied());
        assert!(!NodeStatus::Locked.is_satisfied());
    }

    #[test]
    fn test_pipeline_status_terminal() {
        assert!(PipelineStatus::Error.is_terminal());
        assert!(PipelineStatus::Complete.is_terminal());
        assert!(!PipelineStatus::Running.is_terminal());
        assert!(!PipelineStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_stage_node_stale_flag() {
        let mut node = StageNode::new("r1", NodeKey::Sections);
        assert!(!node.is_stale());
        node.meta = serde_json::json!({"stale": true});
        assert!(node.is_stale());
    }

    #[test]
    fn test_stage_node_gate_response_lookup() {
        let mut node = StageNode::new("r1", NodeKey::Sections);
        assert!(node.gate_response("sections:summary").is_none());
        node.meta = serde_json::json!({
            "gate_responses": {"sections:summary": {"approved": true}}
        });
        let resp = node.gate_response("sections:summary").unwrap();
        assert_eq!(resp["approved"], true);
    }

    #[test]
    fn test_snapshot_node_lookup() {
        let run = Run {
            id: "r1".into(),
            current_stage: NodeKey::Intake,
            pipeline_status: PipelineStatus::Idle,
            pending_gate: None,
            pending_gate_data: None,
            active_node: None,
            benchmark_edit_version: 0,
            restart_pending: false,
            archived: false,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        };
        let snapshot = RunSnapshot {
            run,
            nodes: vec![
                StageNode::new("r1", NodeKey::Intake),
                StageNode::new("r1", NodeKey::Research),
            ],
        };
        assert!(snapshot.node(NodeKey::Research).is_some());
        assert!(snapshot.node(NodeKey::Export).is_none());
    }
}
