use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pipeline::NodeKey;

/// Status of a review gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Open,
    Resolved,
    Expired,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "resolved" => Ok(Self::Resolved),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Invalid gate status: {}", s)),
        }
    }
}

/// A review gate, as persisted.
///
/// Gate ids are deterministic — node key plus an optional disambiguating
/// context — so the same logical checkpoint produces the same id across
/// retries and rebuilds. `node_version` pins the gate to the stage node
/// version it was opened against; a rebuild past that version expires it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    pub id: String,
    pub run_id: String,
    pub node_key: NodeKey,
    pub node_version: i64,
    pub status: GateStatus,
    pub payload: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

/// Derive the deterministic gate id for a checkpoint.
pub fn gate_id(node: NodeKey, context: Option<&str>) -> String {
    match context {
        Some(ctx) => format!("{}:{}", node.as_str(), ctx),
        None => node.as_str().to_string(),
    }
}

/// Split a gate id back into its node key and context.
pub fn parse_gate_id(id: &str) -> Option<(NodeKey, Option<String>)> {
    let (node_part, context) = match id.split_once(':') {
        Some((node, ctx)) => (node, Some(ctx.to_string())),
        None => (id, None),
    };
    node_part.parse::<NodeKey>().ok().map(|n| (n, context))
}
