//! Upstream-edit replanning.
//!
//! When a benchmark assumption changes after downstream stages already
//! completed, the stale set is computed by forward traversal of the stage
//! graph from the edited node — never by flags scattered across call sites.
//! If the run has already gathered review decisions on now-stale nodes, the
//! rebuild is destructive and requires an explicit restart confirmation
//! before any further gate can resolve.

pub mod types;

use std::sync::Arc;

use chrono::Utc;

use crate::errors::ReplanError;
use crate::events::{EventHub, RunEvent};
use crate::pipeline::{NodeKey, StageGraph};
use crate::store::DbHandle;

pub use types::{ReplanReason, ReplanRecord, ReplanState};

/// Result of an accepted benchmark edit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplanOutcome {
    pub replan_id: i64,
    pub benchmark_edit_version: i64,
    pub requires_restart: bool,
    pub stale_nodes: Vec<NodeKey>,
}

/// Observes benchmark edits and drives the stale-node cascade.
pub struct ReplanTrigger {
    db: DbHandle,
    hub: Arc<EventHub>,
    graph: Arc<StageGraph>,
}

impl ReplanTrigger {
    pub fn new(db: DbHandle, hub: Arc<EventHub>, graph: Arc<StageGraph>) -> Self {
        Self { db, hub, graph }
    }

    /// Accept an upstream assumption edit targeting `rebuild_from`.
    ///
    /// Rejected while another edit's restart confirmation is pending — the
    /// version counter must not race. Otherwise the edit version is bumped,
    /// the stale set recorded, and either the nodes are queued for rebuild
    /// immediately or a restart confirmation is demanded.
    pub async fn request(
        &self,
        run_id: &str,
        rebuild_from: NodeKey,
        edited_value: serde_json::Value,
    ) -> Result<ReplanOutcome, ReplanError> {
        let run = {
            let id = run_id.to_string();
            self.db.call(move |db| db.get_run(&id)).await?
        }
        .ok_or_else(|| ReplanError::RunNotFound {
            id: run_id.to_string(),
        })?;

        let pending = {
            let run_id = run_id.to_string();
            self.db
                .call(move |db| db.get_pending_replan(&run_id))
                .await?
        };
        if pending.is_some() {
            return Err(ReplanError::ConfirmationPending {
                run_id: run_id.to_string(),
            });
        }

        let version = {
            let run_id = run_id.to_string();
            self.db
                .call(move |db| db.bump_benchmark_version(&run_id))
                .await?
        };

        // Forward reachability from the edited node, inclusive.
        let mut stale_nodes: Vec<NodeKey> =
            self.graph.reachable_from(rebuild_from).into_iter().collect();
        stale_nodes.sort_by_key(|k| self.graph.position(*k));

        // Record the edited value on the rebuild node so the stage
        // implementation picks it up on re-entry.
        {
            let run_id = run_id.to_string();
            let value = edited_value;
            self.db
                .call(move |db| {
                    let node = db
                        .get_node(&run_id, rebuild_from)?
                        .ok_or_else(|| anyhow::anyhow!("Node {} missing", rebuild_from))?;
                    let mut meta = match node.meta {
                        serde_json::Value::Object(map) => serde_json::Value::Object(map),
                        _ => serde_json::json!({}),
                    };
                    meta["benchmark_edit"] = serde_json::json!({
                        "value": value,
                        "version": version,
                    });
                    db.set_node_meta(&run_id, rebuild_from, &meta)
                })
                .await?;
        }

        // Destructive only when the run is positioned past the edited stage
        // and has already gathered gate decisions on now-stale nodes.
        let past_edit =
            self.graph.position(run.current_stage) > self.graph.position(rebuild_from);
        let requires_restart = if past_edit {
            let run_id = run_id.to_string();
            let keys = stale_nodes.clone();
            self.db
                .call(move |db| db.has_gates_on_nodes(&run_id, &keys))
                .await?
        } else {
            false
        };

        let record = ReplanRecord {
            id: 0,
            run_id: run_id.to_string(),
            reason: ReplanReason::BenchmarkAssumptionsUpdated,
            benchmark_edit_version: version,
            rebuild_from_stage: rebuild_from,
            requires_restart,
            stale_nodes: stale_nodes.clone(),
            current_stage: run.current_stage,
            state: ReplanState::Pending,
            created_at: Utc::now().to_rfc3339(),
        };
        let replan_id = {
            let record = record.clone();
            self.db.call(move |db| db.insert_replan(&record)).await?
        };

        tracing::info!(
            run_id,
            replan_id,
            rebuild_from = %rebuild_from,
            requires_restart,
            "replan requested"
        );
        self.hub.emit(
            run_id,
            RunEvent::ReplanRequested {
                replan_id,
                rebuild_from,
                requires_restart,
            },
        );

        if requires_restart {
            // Freeze gate resolution until the client confirms the restart;
            // unsaved review decisions must not be discarded silently.
            let run_id_owned = run_id.to_string();
            self.db
                .call(move |db| db.set_restart_pending(&run_id_owned, true))
                .await?;
        } else {
            self.begin_rebuild(run_id, replan_id, &stale_nodes).await?;
        }

        Ok(ReplanOutcome {
            replan_id,
            benchmark_edit_version: version,
            requires_restart,
            stale_nodes,
        })
    }

    /// Explicit restart confirmation for a destructive replan. Expires any
    /// open gate, queues the stale nodes, and releases gate resolution.
    pub async fn confirm_restart(&self, run_id: &str) -> Result<ReplanRecord, ReplanError> {
        let record = {
            let id = run_id.to_string();
            self.db.call(move |db| db.get_pending_replan(&id)).await?
        }
        .ok_or_else(|| ReplanError::NothingPending {
            run_id: run_id.to_string(),
        })?;

        let replan_id = record.id;
        let rebuild_from = record.rebuild_from_stage;
        {
            let run_id = run_id.to_string();
            self.db
                .call(move |db| {
                    let expired = db.expire_open_gates(&run_id)?;
                    for gate_id in expired {
                        db.cas_clear_pending_gate(&run_id, &gate_id)?;
                    }
                    db.set_restart_pending(&run_id, false)?;
                    db.set_current_stage(&run_id, rebuild_from)?;
                    db.set_active_node(&run_id, None)
                })
                .await?;
        }

        self.begin_rebuild(run_id, replan_id, &record.stale_nodes)
            .await?;

        tracing::info!(run_id, replan_id, "restart confirmed");
        let run_id_owned = run_id.to_string();
        self.db
            .call(move |db| db.get_replan(replan_id))
            .await?
            .ok_or_else(|| {
                ReplanError::Other(anyhow::anyhow!(
                    "Replan {} vanished for run {}",
                    replan_id,
                    run_id_owned
                ))
            })
    }

    /// Mark stale nodes pending and move the replan to `started`.
    async fn begin_rebuild(
        &self,
        run_id: &str,
        replan_id: i64,
        stale_nodes: &[NodeKey],
    ) -> Result<(), ReplanError> {
        {
            let run_id = run_id.to_string();
            let keys = stale_nodes.to_vec();
            self.db
                .call(move |db| {
                    for key in &keys {
                        db.mark_node_stale(&run_id, *key)?;
                    }
                    db.set_replan_state(replan_id, ReplanState::Started)
                })
                .await?;
        }
        self.hub.emit(run_id, RunEvent::ReplanStarted { replan_id });
        Ok(())
    }

    /// Complete any started replan whose stale nodes have all been rebuilt.
    /// The controller calls this after each stage completion.
    pub async fn complete_if_rebuilt(&self, run_id: &str) -> Result<(), ReplanError> {
        let (started, nodes) = {
            let run_id = run_id.to_string();
            self.db
                .call(move |db| {
                    let started = db.get_started_replans(&run_id)?;
                    let nodes = db.get_nodes(&run_id)?;
                    Ok((started, nodes))
                })
                .await?
        };

        for replan in started {
            let rebuilt = replan.stale_nodes.iter().all(|key| {
                nodes
                    .iter()
                    .find(|n| n.node_key == *key)
                    .map(|n| n.status.is_satisfied())
                    .unwrap_or(false)
            });
            if rebuilt {
                let replan_id = replan.id;
                self.db
                    .call(move |db| db.set_replan_state(replan_id, ReplanState::Completed))
                    .await?;
                tracing::info!(run_id, replan_id, "replan completed");
                self.hub
                    .emit(run_id, RunEvent::ReplanCompleted { replan_id });
            }
        }
        Ok(())
    }
}
