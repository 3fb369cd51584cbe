//! Gate management: the single-open-gate invariant and exactly-once
//! resolution.
//!
//! A gate is a named suspension point where the controller waits for an
//! external response. At most one gate is open per run at any instant, and a
//! resolve against anything but the currently open gate fails with a
//! distinct conflict status so clients can resync instead of silently losing
//! a response. Both properties are enforced with compare-and-swap updates,
//! not read-then-write sequences.

pub mod types;

use std::sync::Arc;

use chrono::Utc;

use crate::errors::GateError;
use crate::events::{EventHub, RunEvent};
use crate::pipeline::NodeKey;
use crate::store::DbHandle;

pub use types::{Gate, GateStatus, gate_id, parse_gate_id};

/// A stage implementation's request to suspend at a checkpoint.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub node: NodeKey,
    /// Disambiguates multiple checkpoints on one node (e.g. a section name).
    pub context: Option<String>,
    pub payload: serde_json::Value,
}

impl GateRequest {
    pub fn new(node: NodeKey, payload: serde_json::Value) -> Self {
        Self {
            node,
            context: None,
            payload,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The deterministic gate id for this request.
    pub fn gate_id(&self) -> String {
        gate_id(self.node, self.context.as_deref())
    }
}

/// Owns gate lifecycle for all runs.
pub struct GateManager {
    db: DbHandle,
    hub: Arc<EventHub>,
}

impl GateManager {
    pub fn new(db: DbHandle, hub: Arc<EventHub>) -> Self {
        Self { db, hub }
    }

    /// Open a gate. Fails with `AlreadyOpen` if another gate holds the run's
    /// single-flight slot. On success the run's `pending_gate` and
    /// `pending_gate_data` are updated and a `gate_opened` event is emitted.
    pub async fn open(
        &self,
        run_id: &str,
        node_version: i64,
        request: GateRequest,
    ) -> Result<Gate, GateError> {
        let gate_id = request.gate_id();
        let gate = Gate {
            id: gate_id.clone(),
            run_id: run_id.to_string(),
            node_key: request.node,
            node_version,
            status: GateStatus::Open,
            payload: request.payload.clone(),
            response: None,
            created_at: Utc::now().to_rfc3339(),
            resolved_at: None,
        };

        let claimed = {
            let run_id = run_id.to_string();
            let gate_id = gate_id.clone();
            let payload = request.payload.clone();
            self.db
                .call(move |db| db.cas_set_pending_gate(&run_id, &gate_id, &payload))
                .await?
        };
        if !claimed {
            let open_gate = {
                let run_id = run_id.to_string();
                self.db
                    .call(move |db| db.get_run(&run_id))
                    .await?
                    .and_then(|r| r.pending_gate)
                    .unwrap_or_default()
            };
            // The run may hold this very gate already (controller re-entry
            // after a restart); treat that as an idempotent open.
            if open_gate == gate_id {
                let existing = self.load_gate(run_id, &gate_id).await?;
                if existing.status == GateStatus::Open {
                    return Ok(existing);
                }
            }
            return Err(GateError::AlreadyOpen {
                run_id: run_id.to_string(),
                open_gate,
            });
        }

        {
            let gate = gate.clone();
            self.db.call(move |db| db.insert_gate(&gate)).await?;
        }

        tracing::info!(run_id, gate_id = %gate_id, node = %request.node, "gate opened");
        self.hub.emit(
            run_id,
            RunEvent::GateOpened {
                gate_id,
                node: request.node,
                payload: request.payload,
            },
        );
        Ok(gate)
    }

    /// Resolve a gate exactly once.
    ///
    /// Under concurrent resolve attempts exactly one caller wins; every other
    /// caller observes `Conflict`. A gate whose node was rebuilt since it
    /// opened resolves to `Expired`.
    pub async fn resolve(
        &self,
        run_id: &str,
        gate_id: &str,
        response: serde_json::Value,
    ) -> Result<Gate, GateError> {
        let run = {
            let id = run_id.to_string();
            self.db.call(move |db| db.get_run(&id)).await?
        }
        .ok_or_else(|| GateError::NotFound {
            run_id: run_id.to_string(),
            gate_id: gate_id.to_string(),
        })?;

        // A pending destructive restart freezes gate resolution so unsaved
        // review decisions are not silently discarded.
        if run.restart_pending {
            return Err(GateError::Conflict {
                run_id: run_id.to_string(),
                gate_id: gate_id.to_string(),
            });
        }

        let gate = self.load_gate(run_id, gate_id).await?;

        let current_version = {
            let run_id = run_id.to_string();
            let node = gate.node_key;
            self.db
                .call(move |db| db.get_node(&run_id, node))
                .await?
                .map(|n| n.active_version)
                .unwrap_or(gate.node_version)
        };
        if gate.node_version != current_version || gate.status == GateStatus::Expired {
            return Err(GateError::Expired {
                gate_id: gate_id.to_string(),
                node: gate.node_key,
            });
        }

        if run.pending_gate.as_deref() != Some(gate_id) {
            return Err(GateError::Conflict {
                run_id: run_id.to_string(),
                gate_id: gate_id.to_string(),
            });
        }

        // The CAS on gate status decides the winner among concurrent
        // resolvers; only the winner clears the run's pending-gate slot.
        let won = {
            let run_id = run_id.to_string();
            let gate_id = gate_id.to_string();
            let version = gate.node_version;
            let response = response.clone();
            self.db
                .call(move |db| db.cas_resolve_gate(&run_id, &gate_id, version, &response))
                .await?
        };
        if !won {
            return Err(GateError::Conflict {
                run_id: run_id.to_string(),
                gate_id: gate_id.to_string(),
            });
        }

        {
            let run_id = run_id.to_string();
            let gate_id = gate_id.to_string();
            self.db
                .call(move |db| db.cas_clear_pending_gate(&run_id, &gate_id))
                .await?;
        }

        tracing::info!(run_id, gate_id, "gate resolved");
        self.load_gate(run_id, gate_id).await
    }

    /// Administratively expire one gate (abandoned checkpoint cleanup).
    /// Clears the pending-gate slot if this gate holds it.
    pub async fn expire(&self, run_id: &str, gate_id: &str) -> Result<Gate, GateError> {
        let gate = self.load_gate(run_id, gate_id).await?;
        if gate.status == GateStatus::Open {
            let mut expired = gate.clone();
            expired.status = GateStatus::Expired;
            expired.resolved_at = Some(Utc::now().to_rfc3339());
            {
                let gate = expired.clone();
                self.db.call(move |db| db.insert_gate(&gate)).await?;
            }
            let run_id_owned = run_id.to_string();
            let gate_id_owned = gate_id.to_string();
            self.db
                .call(move |db| db.cas_clear_pending_gate(&run_id_owned, &gate_id_owned))
                .await?;
            tracing::info!(run_id, gate_id, "gate expired");
            return Ok(expired);
        }
        Ok(gate)
    }

    /// Administratively expire every open gate for a run (abandoned runs,
    /// aborts, destructive restarts). Clears the pending-gate slot.
    pub async fn expire_all(&self, run_id: &str) -> Result<Vec<String>, GateError> {
        let expired = {
            let run_id = run_id.to_string();
            self.db.call(move |db| db.expire_open_gates(&run_id)).await?
        };
        for gate_id in &expired {
            let run_id_owned = run_id.to_string();
            let gate_id = gate_id.clone();
            self.db
                .call(move |db| db.cas_clear_pending_gate(&run_id_owned, &gate_id))
                .await?;
        }
        if !expired.is_empty() {
            tracing::info!(run_id, count = expired.len(), "gates expired");
        }
        Ok(expired)
    }

    async fn load_gate(&self, run_id: &str, gate_id: &str) -> Result<Gate, GateError> {
        let run_id_owned = run_id.to_string();
        let gate_id_owned = gate_id.to_string();
        self.db
            .call(move |db| db.get_gate(&run_id_owned, &gate_id_owned))
            .await?
            .ok_or_else(|| GateError::NotFound {
                run_id: run_id.to_string(),
                gate_id: gate_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TailorDb;

    async fn manager_with_run() -> (GateManager, DbHandle) {
        let db = DbHandle::new(TailorDb::new_in_memory().unwrap());
        db.call(|db| db.create_run("r1")).await.unwrap();
        let hub = Arc::new(EventHub::new());
        (GateManager::new(db.clone(), hub), db)
    }

    fn request(node: NodeKey) -> GateRequest {
        GateRequest::new(node, serde_json::json!({"k": "v"}))
    }

    #[tokio::test]
    async fn test_open_then_second_open_conflicts() {
        let (mgr, _db) = manager_with_run().await;

        let gate = mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();
        assert_eq!(gate.id, "interview");
        assert_eq!(gate.status, GateStatus::Open);

        let err = mgr
            .open("r1", 1, request(NodeKey::GapAnalysis))
            .await
            .unwrap_err();
        match err {
            GateError::AlreadyOpen { open_gate, .. } => assert_eq!(open_gate, "interview"),
            other => panic!("Expected AlreadyOpen, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reopen_same_gate_is_idempotent() {
        let (mgr, _db) = manager_with_run().await;
        mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();
        let again = mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();
        assert_eq!(again.status, GateStatus::Open);
    }

    #[tokio::test]
    async fn test_resolve_twice_second_conflicts() {
        let (mgr, db) = manager_with_run().await;
        mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();

        let resolved = mgr
            .resolve("r1", "interview", serde_json::json!({"ok": true}))
            .await
            .unwrap();
        assert_eq!(resolved.status, GateStatus::Resolved);

        let err = mgr
            .resolve("r1", "interview", serde_json::json!({"ok": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Conflict { .. }));

        // pending_gate cleared exactly once.
        let run = db.call(|db| db.get_run("r1")).await.unwrap().unwrap();
        assert!(run.pending_gate.is_none());
        assert!(run.pending_gate_data.is_none());
    }

    #[tokio::test]
    async fn test_resolve_wrong_gate_conflicts() {
        let (mgr, _db) = manager_with_run().await;
        mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();

        let err = mgr
            .resolve("r1", "gap_analysis", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::NotFound { .. } | GateError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_resolve_superseded_version_is_expired() {
        let (mgr, db) = manager_with_run().await;
        mgr.open("r1", 1, request(NodeKey::Sections).with_context("summary"))
            .await
            .unwrap();

        // A rebuild bumps the node version, superseding the gate.
        db.call(|db| db.bump_node_version("r1", NodeKey::Sections))
            .await
            .unwrap();

        let err = mgr
            .resolve("r1", "sections:summary", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Expired { .. }));
    }

    #[tokio::test]
    async fn test_restart_pending_blocks_resolution() {
        let (mgr, db) = manager_with_run().await;
        mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();
        db.call(|db| db.set_restart_pending("r1", true))
            .await
            .unwrap();

        let err = mgr
            .resolve("r1", "interview", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_expire_single_gate() {
        let (mgr, db) = manager_with_run().await;
        mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();

        let expired = mgr.expire("r1", "interview").await.unwrap();
        assert_eq!(expired.status, GateStatus::Expired);

        let run = db.call(|db| db.get_run("r1")).await.unwrap().unwrap();
        assert!(run.pending_gate.is_none());

        // Expiring again is a no-op returning the expired gate.
        let again = mgr.expire("r1", "interview").await.unwrap();
        assert_eq!(again.status, GateStatus::Expired);
    }

    #[tokio::test]
    async fn test_expire_all_clears_pending() {
        let (mgr, db) = manager_with_run().await;
        mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();

        let expired = mgr.expire_all("r1").await.unwrap();
        assert_eq!(expired, vec!["interview".to_string()]);

        let run = db.call(|db| db.get_run("r1")).await.unwrap().unwrap();
        assert!(run.pending_gate.is_none());

        let err = mgr
            .resolve("r1", "interview", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Expired { .. } | GateError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_resolves_single_winner() {
        let (mgr, _db) = manager_with_run().await;
        mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();
        let mgr = Arc::new(mgr);

        let mut handles = Vec::new();
        for i in 0..8 {
            let mgr = Arc::clone(&mgr);
            handles.push(tokio::spawn(async move {
                mgr.resolve("r1", "interview", serde_json::json!({"attempt": i}))
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_open_emits_gate_opened_event() {
        let db = DbHandle::new(TailorDb::new_in_memory().unwrap());
        db.call(|db| db.create_run("r1")).await.unwrap();
        let hub = Arc::new(EventHub::new());
        let mut rx = hub.subscribe("r1");
        let mgr = GateManager::new(db, Arc::clone(&hub));

        mgr.open("r1", 1, request(NodeKey::Interview)).await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event.name(), "gate_opened");
    }
}
