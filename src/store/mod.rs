//! SQLite persistence for runs, stage nodes, gates, and replan requests.
//!
//! All controller decisions derive from what this store returns: the run and
//! its stage nodes form the snapshot used for cold resume, so nothing in here
//! may depend on in-memory session state.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::gate::types::{Gate, GateStatus};
use crate::pipeline::{NodeKey, NodeStatus, PipelineStatus, Run, RunSnapshot, StageNode};
use crate::replan::types::{ReplanReason, ReplanRecord, ReplanState};

/// Async-safe handle to the tailor database.
///
/// Wraps `TailorDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TailorDb>>,
}

impl DbHandle {
    pub fn new(db: TailorDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TailorDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup initialization
    /// and tests; not for hot async paths.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, TailorDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct TailorDb {
    conn: Connection,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl TailorDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS runs (
                    id TEXT PRIMARY KEY,
                    current_stage TEXT NOT NULL DEFAULT 'intake',
                    pipeline_status TEXT NOT NULL DEFAULT 'idle',
                    pending_gate TEXT,
                    pending_gate_data TEXT,
                    active_node TEXT,
                    benchmark_edit_version INTEGER NOT NULL DEFAULT 0,
                    restart_pending INTEGER NOT NULL DEFAULT 0,
                    archived INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS stage_nodes (
                    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    node_key TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'locked',
                    active_version INTEGER NOT NULL DEFAULT 1,
                    meta TEXT,
                    UNIQUE(run_id, node_key)
                );

                CREATE TABLE IF NOT EXISTS gates (
                    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    id TEXT NOT NULL,
                    node_key TEXT NOT NULL,
                    node_version INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'open',
                    payload TEXT NOT NULL,
                    response TEXT,
                    created_at TEXT NOT NULL,
                    resolved_at TEXT,
                    PRIMARY KEY (run_id, id, node_version)
                );

                CREATE TABLE IF NOT EXISTS replan_requests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    reason TEXT NOT NULL,
                    benchmark_edit_version INTEGER NOT NULL,
                    rebuild_from_stage TEXT NOT NULL,
                    requires_restart INTEGER NOT NULL DEFAULT 0,
                    stale_nodes TEXT NOT NULL,
                    current_stage TEXT NOT NULL,
                    state TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_stage_nodes_run ON stage_nodes(run_id);
                CREATE INDEX IF NOT EXISTS idx_gates_run ON gates(run_id);
                CREATE INDEX IF NOT EXISTS idx_replans_run ON replan_requests(run_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Runs ──────────────────────────────────────────────────────────

    /// Create a run with its full stage node set. The intake node starts
    /// `pending`; everything downstream starts `locked`.
    pub fn create_run(&self, id: &str) -> Result<Run> {
        let ts = now();
        self.conn
            .execute(
                "INSERT INTO runs (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
                params![id, ts],
            )
            .context("Failed to insert run")?;

        for key in NodeKey::all() {
            let status = if *key == NodeKey::Intake {
                NodeStatus::Pending
            } else {
                NodeStatus::Locked
            };
            self.conn
                .execute(
                    "INSERT INTO stage_nodes (run_id, node_key, status) VALUES (?1, ?2, ?3)",
                    params![id, key.as_str(), status.as_str()],
                )
                .context("Failed to seed stage node")?;
        }

        self.get_run(id)?
            .ok_or_else(|| anyhow::anyhow!("Run {} vanished after insert", id))
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        self.conn
            .query_row(
                "SELECT id, current_stage, pipeline_status, pending_gate, pending_gate_data,
                        active_node, benchmark_edit_version, restart_pending, archived,
                        created_at, updated_at
                 FROM runs WHERE id = ?1",
                params![id],
                row_to_run,
            )
            .optional()
            .context("Failed to query run")
    }

    pub fn list_runs(&self, include_archived: bool) -> Result<Vec<Run>> {
        let sql = if include_archived {
            "SELECT id, current_stage, pipeline_status, pending_gate, pending_gate_data,
                    active_node, benchmark_edit_version, restart_pending, archived,
                    created_at, updated_at
             FROM runs ORDER BY created_at DESC"
        } else {
            "SELECT id, current_stage, pipeline_status, pending_gate, pending_gate_data,
                    active_node, benchmark_edit_version, restart_pending, archived,
                    created_at, updated_at
             FROM runs WHERE archived = 0 ORDER BY created_at DESC"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let runs = stmt
            .query_map([], row_to_run)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to list runs")?;
        Ok(runs)
    }

    pub fn snapshot(&self, run_id: &str) -> Result<Option<RunSnapshot>> {
        let Some(run) = self.get_run(run_id)? else {
            return Ok(None);
        };
        let nodes = self.get_nodes(run_id)?;
        Ok(Some(RunSnapshot { run, nodes }))
    }

    pub fn set_pipeline_status(&self, run_id: &str, status: PipelineStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET pipeline_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![run_id, status.as_str(), now()],
        )?;
        Ok(())
    }

    pub fn set_current_stage(&self, run_id: &str, stage: NodeKey) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET current_stage = ?2, updated_at = ?3 WHERE id = ?1",
            params![run_id, stage.as_str(), now()],
        )?;
        Ok(())
    }

    pub fn set_active_node(&self, run_id: &str, active: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET active_node = ?2, updated_at = ?3 WHERE id = ?1",
            params![run_id, active, now()],
        )?;
        Ok(())
    }

    pub fn set_restart_pending(&self, run_id: &str, pending: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET restart_pending = ?2, updated_at = ?3 WHERE id = ?1",
            params![run_id, pending as i64, now()],
        )?;
        Ok(())
    }

    /// Archive a run. Rows are never deleted; archived runs stay queryable.
    pub fn archive_run(&self, run_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET archived = 1, updated_at = ?2 WHERE id = ?1",
            params![run_id, now()],
        )?;
        Ok(())
    }

    /// Bump the benchmark edit version and return the new value. Versions
    /// are monotone and never reused.
    pub fn bump_benchmark_version(&self, run_id: &str) -> Result<i64> {
        self.conn.execute(
            "UPDATE runs SET benchmark_edit_version = benchmark_edit_version + 1,
                             updated_at = ?2
             WHERE id = ?1",
            params![run_id, now()],
        )?;
        let version = self.conn.query_row(
            "SELECT benchmark_edit_version FROM runs WHERE id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    // ── Pending-gate compare-and-swap ─────────────────────────────────

    /// Atomically set the run's pending gate, succeeding only if no gate is
    /// currently pending. Returns false when another gate already holds the
    /// slot.
    pub fn cas_set_pending_gate(
        &self,
        run_id: &str,
        gate_id: &str,
        data: &serde_json::Value,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE runs SET pending_gate = ?2, pending_gate_data = ?3, updated_at = ?4
             WHERE id = ?1 AND pending_gate IS NULL",
            params![run_id, gate_id, data.to_string(), now()],
        )?;
        Ok(changed == 1)
    }

    /// Atomically clear the run's pending gate, succeeding only if the given
    /// gate currently holds the slot. Exactly one concurrent caller wins.
    pub fn cas_clear_pending_gate(&self, run_id: &str, gate_id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE runs SET pending_gate = NULL, pending_gate_data = NULL, updated_at = ?3
             WHERE id = ?1 AND pending_gate = ?2",
            params![run_id, gate_id, now()],
        )?;
        Ok(changed == 1)
    }

    // ── Stage nodes ───────────────────────────────────────────────────

    pub fn get_nodes(&self, run_id: &str) -> Result<Vec<StageNode>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, node_key, status, active_version, meta
             FROM stage_nodes WHERE run_id = ?1",
        )?;
        let mut nodes = stmt
            .query_map(params![run_id], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to query stage nodes")?;
        // Pipeline order, not insertion order.
        nodes.sort_by_key(|n| {
            NodeKey::all()
                .iter()
                .position(|k| *k == n.node_key)
                .unwrap_or(usize::MAX)
        });
        Ok(nodes)
    }

    pub fn get_node(&self, run_id: &str, key: NodeKey) -> Result<Option<StageNode>> {
        self.conn
            .query_row(
                "SELECT run_id, node_key, status, active_version, meta
                 FROM stage_nodes WHERE run_id = ?1 AND node_key = ?2",
                params![run_id, key.as_str()],
                row_to_node,
            )
            .optional()
            .context("Failed to query stage node")
    }

    pub fn set_node_status(&self, run_id: &str, key: NodeKey, status: NodeStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE stage_nodes SET status = ?3 WHERE run_id = ?1 AND node_key = ?2",
            params![run_id, key.as_str(), status.as_str()],
        )?;
        Ok(())
    }

    pub fn set_node_meta(&self, run_id: &str, key: NodeKey, meta: &serde_json::Value) -> Result<()> {
        self.conn.execute(
            "UPDATE stage_nodes SET meta = ?3 WHERE run_id = ?1 AND node_key = ?2",
            params![run_id, key.as_str(), meta.to_string()],
        )?;
        Ok(())
    }

    /// Mark a node stale for rebuild: status back to `pending`, stale flag
    /// set in meta. The version counter is untouched here — the controller
    /// bumps it when it re-enters the node.
    pub fn mark_node_stale(&self, run_id: &str, key: NodeKey) -> Result<()> {
        let node = self
            .get_node(run_id, key)?
            .ok_or_else(|| anyhow::anyhow!("Node {} not found for run {}", key, run_id))?;
        let mut meta = match node.meta {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            _ => serde_json::json!({}),
        };
        meta["stale"] = serde_json::Value::Bool(true);
        self.set_node_status(run_id, key, NodeStatus::Pending)?;
        self.set_node_meta(run_id, key, &meta)?;
        Ok(())
    }

    pub fn bump_node_version(&self, run_id: &str, key: NodeKey) -> Result<i64> {
        self.conn.execute(
            "UPDATE stage_nodes SET active_version = active_version + 1
             WHERE run_id = ?1 AND node_key = ?2",
            params![run_id, key.as_str()],
        )?;
        let version = self.conn.query_row(
            "SELECT active_version FROM stage_nodes WHERE run_id = ?1 AND node_key = ?2",
            params![run_id, key.as_str()],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    // ── Gates ─────────────────────────────────────────────────────────

    /// Insert a gate row, replacing any prior row for the same checkpoint
    /// and version. Gate ids are deterministic, so a checkpoint re-opened
    /// after an administrative expiry reuses its row.
    pub fn insert_gate(&self, gate: &Gate) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO gates (run_id, id, node_key, node_version, status, payload,
                                    response, created_at, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    gate.run_id,
                    gate.id,
                    gate.node_key.as_str(),
                    gate.node_version,
                    gate.status.as_str(),
                    gate.payload.to_string(),
                    gate.response.as_ref().map(|r| r.to_string()),
                    gate.created_at,
                    gate.resolved_at,
                ],
            )
            .context("Failed to insert gate")?;
        Ok(())
    }

    /// The latest gate row for an id (highest node version).
    pub fn get_gate(&self, run_id: &str, gate_id: &str) -> Result<Option<Gate>> {
        self.conn
            .query_row(
                "SELECT run_id, id, node_key, node_version, status, payload, response,
                        created_at, resolved_at
                 FROM gates WHERE run_id = ?1 AND id = ?2
                 ORDER BY node_version DESC LIMIT 1",
                params![run_id, gate_id],
                row_to_gate,
            )
            .optional()
            .context("Failed to query gate")
    }

    /// Atomically resolve an open gate. Returns false if the gate is no
    /// longer open — the caller reports a conflict, never success.
    pub fn cas_resolve_gate(
        &self,
        run_id: &str,
        gate_id: &str,
        node_version: i64,
        response: &serde_json::Value,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE gates SET status = 'resolved', response = ?4, resolved_at = ?5
             WHERE run_id = ?1 AND id = ?2 AND node_version = ?3 AND status = 'open'",
            params![run_id, gate_id, node_version, response.to_string(), now()],
        )?;
        Ok(changed == 1)
    }

    /// Expire every open gate for a run. Returns the expired gate ids.
    pub fn expire_open_gates(&self, run_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM gates WHERE run_id = ?1 AND status = 'open'")?;
        let ids: Vec<String> = stmt
            .query_map(params![run_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.conn.execute(
            "UPDATE gates SET status = 'expired', resolved_at = ?2
             WHERE run_id = ?1 AND status = 'open'",
            params![run_id, now()],
        )?;
        Ok(ids)
    }

    /// Whether any gate (open or resolved) exists at the current version of
    /// one of the given nodes. Used to decide if a replan needs a destructive
    /// restart: review decisions already gathered on stale nodes must not be
    /// discarded silently.
    pub fn has_gates_on_nodes(&self, run_id: &str, keys: &[NodeKey]) -> Result<bool> {
        for key in keys {
            let count: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM gates g
                 JOIN stage_nodes n ON n.run_id = g.run_id AND n.node_key = g.node_key
                 WHERE g.run_id = ?1 AND g.node_key = ?2
                   AND g.node_version = n.active_version",
                params![run_id, key.as_str()],
                |row| row.get(0),
            )?;
            if count > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Replan requests ───────────────────────────────────────────────

    pub fn insert_replan(&self, record: &ReplanRecord) -> Result<i64> {
        let stale = serde_json::to_string(&record.stale_nodes)?;
        self.conn
            .execute(
                "INSERT INTO replan_requests (run_id, reason, benchmark_edit_version,
                     rebuild_from_stage, requires_restart, stale_nodes, current_stage,
                     state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.run_id,
                    record.reason.as_str(),
                    record.benchmark_edit_version,
                    record.rebuild_from_stage.as_str(),
                    record.requires_restart as i64,
                    stale,
                    record.current_stage.as_str(),
                    record.state.as_str(),
                    record.created_at,
                ],
            )
            .context("Failed to insert replan request")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_replan(&self, id: i64) -> Result<Option<ReplanRecord>> {
        self.conn
            .query_row(
                "SELECT id, run_id, reason, benchmark_edit_version, rebuild_from_stage,
                        requires_restart, stale_nodes, current_stage, state, created_at
                 FROM replan_requests WHERE id = ?1",
                params![id],
                row_to_replan,
            )
            .optional()
            .context("Failed to query replan request")
    }

    /// The pending replan awaiting a restart confirmation, if any.
    pub fn get_pending_replan(&self, run_id: &str) -> Result<Option<ReplanRecord>> {
        self.conn
            .query_row(
                "SELECT id, run_id, reason, benchmark_edit_version, rebuild_from_stage,
                        requires_restart, stale_nodes, current_stage, state, created_at
                 FROM replan_requests
                 WHERE run_id = ?1 AND state = 'pending' AND requires_restart = 1
                 ORDER BY id DESC LIMIT 1",
                params![run_id],
                row_to_replan,
            )
            .optional()
            .context("Failed to query pending replan")
    }

    /// Replans the controller is still rebuilding.
    pub fn get_started_replans(&self, run_id: &str) -> Result<Vec<ReplanRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, reason, benchmark_edit_version, rebuild_from_stage,
                    requires_restart, stale_nodes, current_stage, state, created_at
             FROM replan_requests WHERE run_id = ?1 AND state = 'started'",
        )?;
        let records = stmt
            .query_map(params![run_id], row_to_replan)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to query started replans")?;
        Ok(records)
    }

    pub fn set_replan_state(&self, id: i64, state: ReplanState) -> Result<()> {
        self.conn.execute(
            "UPDATE replan_requests SET state = ?2 WHERE id = ?1",
            params![id, state.as_str()],
        )?;
        Ok(())
    }
}

// ── Row mappers ──────────────────────────────────────────────────────

fn parse_json_column(value: Option<String>) -> Option<serde_json::Value> {
    value.and_then(|s| serde_json::from_str(&s).ok())
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let current_stage: String = row.get(1)?;
    let status: String = row.get(2)?;
    let gate_data: Option<String> = row.get(4)?;
    Ok(Run {
        id: row.get(0)?,
        current_stage: NodeKey::from_str(&current_stage)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        pipeline_status: PipelineStatus::from_str(&status)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        pending_gate: row.get(3)?,
        pending_gate_data: parse_json_column(gate_data),
        active_node: row.get(5)?,
        benchmark_edit_version: row.get(6)?,
        restart_pending: row.get::<_, i64>(7)? != 0,
        archived: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<StageNode> {
    let key: String = row.get(1)?;
    let status: String = row.get(2)?;
    let meta: Option<String> = row.get(4)?;
    Ok(StageNode {
        run_id: row.get(0)?,
        node_key: NodeKey::from_str(&key)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        status: NodeStatus::from_str(&status)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        active_version: row.get(3)?,
        meta: parse_json_column(meta).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_gate(row: &rusqlite::Row<'_>) -> rusqlite::Result<Gate> {
    let node_key: String = row.get(2)?;
    let status: String = row.get(4)?;
    let payload: String = row.get(5)?;
    let response: Option<String> = row.get(6)?;
    Ok(Gate {
        run_id: row.get(0)?,
        id: row.get(1)?,
        node_key: NodeKey::from_str(&node_key)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        node_version: row.get(3)?,
        status: GateStatus::from_str(&status)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        response: parse_json_column(response),
        created_at: row.get(7)?,
        resolved_at: row.get(8)?,
    })
}

fn row_to_replan(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReplanRecord> {
    let reason: String = row.get(2)?;
    let rebuild_from: String = row.get(4)?;
    let stale: String = row.get(6)?;
    let current: String = row.get(7)?;
    let state: String = row.get(8)?;
    Ok(ReplanRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        reason: ReplanReason::from_str(&reason)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        benchmark_edit_version: row.get(3)?,
        rebuild_from_stage: NodeKey::from_str(&rebuild_from)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        requires_restart: row.get::<_, i64>(5)? != 0,
        stale_nodes: serde_json::from_str(&stale).unwrap_or_default(),
        current_stage: NodeKey::from_str(&current)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        state: ReplanState::from_str(&state)
            .map_err(|e| rusqlite::Error::InvalidColumnName(e.to_string()))?,
        created_at: row.get(9)?,
    })
}
