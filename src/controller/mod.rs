//! The run controller: a finite-state loop per run.
//!
//! `idle → running → {blocked (gate open) ⇄ running} → complete`, with an
//! `error` absorbing state reachable from any point. Each iteration picks the
//! next ready stage node, invokes its implementation, and either advances,
//! suspends at a gate, or fails the run.
//!
//! Every decision derives from the persisted run + stage-node snapshot, never
//! from in-memory session state: a controller handed only the snapshot after
//! a process restart resumes exactly where the previous one stopped (cold
//! resume). Iterations for one run are strictly serialized; distinct runs are
//! independent.

pub mod stages;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::{ControllerError, GateError};
use crate::events::{EventHub, RunEvent};
use crate::gate::{Gate, GateManager, GateRequest, parse_gate_id};
use crate::pipeline::{NodeKey, NodeStatus, PipelineStatus, Run, RunSnapshot, StageGraph, StageNode};
use crate::replan::ReplanTrigger;
use crate::review::{BundleCoordinator, BundleKey, ReviewStrategy};
use crate::store::DbHandle;
use crate::suggest::{EnrichmentConfig, SuggestionEngine, SuggestionEnricher};

// ── Stage implementation contract ────────────────────────────────────

/// What a stage implementation produced for one invocation.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage finished; `meta` replaces the node's meta.
    Complete { meta: serde_json::Value },
    /// The stage needs external input. `meta` persists interim work so the
    /// re-invocation after the gate resolves does not redo it.
    NeedsGate {
        request: GateRequest,
        meta: serde_json::Value,
    },
}

/// Shared collaborators handed to every stage implementation.
pub struct StageToolkit {
    pub engine: SuggestionEngine,
    pub enricher: SuggestionEnricher,
    pub bundles: BundleCoordinator,
    pub readiness_threshold: f64,
}

impl StageToolkit {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            engine: SuggestionEngine::new(settings.suggestion_cap),
            enricher: SuggestionEnricher::new(settings.enrichment.clone()),
            bundles: BundleCoordinator::new(Default::default(), settings.review_strategy),
            readiness_threshold: settings.readiness_threshold,
        }
    }
}

/// Input to one stage invocation: the full snapshot (stages may read
/// upstream meta), the node being executed, and the shared toolkit.
pub struct StageContext {
    pub snapshot: RunSnapshot,
    pub node: StageNode,
    pub toolkit: Arc<StageToolkit>,
}

impl StageContext {
    /// Meta of another node in the snapshot.
    pub fn upstream_meta(&self, key: NodeKey) -> serde_json::Value {
        self.snapshot
            .node(key)
            .map(|n| n.meta.clone())
            .unwrap_or(serde_json::Value::Null)
    }
}

/// One unit of pipeline work. Implementations must be idempotent with
/// respect to re-entry after a gate resolution: recorded gate responses and
/// interim meta tell them what is already done.
#[async_trait]
pub trait StageImpl: Send + Sync {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome>;
}

/// Tunables for the controller and its default stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub readiness_threshold: f64,
    pub suggestion_cap: usize,
    pub review_strategy: ReviewStrategy,
    pub enrichment: EnrichmentConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            readiness_threshold: 0.6,
            suggestion_cap: 5,
            review_strategy: ReviewStrategy::Sequential,
            enrichment: EnrichmentConfig::default(),
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────

pub struct RunController {
    db: DbHandle,
    hub: Arc<EventHub>,
    graph: Arc<StageGraph>,
    gates: GateManager,
    replans: ReplanTrigger,
    registry: HashMap<NodeKey, Arc<dyn StageImpl>>,
    toolkit: Arc<StageToolkit>,
    /// Per-run locks serializing controller iterations.
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RunController {
    pub fn new(db: DbHandle, hub: Arc<EventHub>, settings: PipelineSettings) -> Self {
        let graph = Arc::new(StageGraph::pipeline());
        let toolkit = Arc::new(StageToolkit::new(&settings));
        let registry = stages::default_registry();
        Self {
            gates: GateManager::new(db.clone(), Arc::clone(&hub)),
            replans: ReplanTrigger::new(db.clone(), Arc::clone(&hub), Arc::clone(&graph)),
            db,
            hub,
            graph,
            registry,
            toolkit,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Swap in a different implementation for one node.
    pub fn with_stage(mut self, key: NodeKey, stage: Arc<dyn StageImpl>) -> Self {
        self.registry.insert(key, stage);
        self
    }

    pub fn replans(&self) -> &ReplanTrigger {
        &self.replans
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    fn run_lock(&self, run_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("run lock table");
        Arc::clone(
            locks
                .entry(run_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Create a run in the idle state, optionally seeding the intake node.
    pub async fn create_run(
        &self,
        intake: Option<serde_json::Value>,
    ) -> Result<Run, ControllerError> {
        let id = Uuid::new_v4().to_string();
        let run = {
            let id = id.clone();
            self.db.call(move |db| db.create_run(&id)).await?
        };
        if let Some(meta) = intake {
            let id = id.clone();
            self.db
                .call(move |db| db.set_node_meta(&id, NodeKey::Intake, &meta))
                .await?;
        }
        tracing::info!(run_id = %id, "run created");
        Ok(run)
    }

    /// Start (or resume) the controller loop for a run.
    pub async fn start(&self, run_id: &str) -> Result<RunSnapshot, ControllerError> {
        let run = self.load_run(run_id).await?;
        if run.pipeline_status == PipelineStatus::Idle {
            let id = run_id.to_string();
            self.db
                .call(move |db| db.set_pipeline_status(&id, PipelineStatus::Running))
                .await?;
        }
        self.drive(run_id).await?;
        self.snapshot(run_id).await
    }

    /// Cold resume after a process restart: continue every non-terminal,
    /// non-archived run purely from its persisted snapshot.
    pub async fn resume_all(&self) -> Result<usize, ControllerError> {
        let runs = self.db.call(|db| db.list_runs(false)).await?;
        let mut resumed = 0;
        for run in runs {
            if run.pipeline_status.is_terminal() || run.pipeline_status == PipelineStatus::Idle {
                continue;
            }
            tracing::info!(run_id = %run.id, status = %run.pipeline_status, "resuming run");
            self.drive(&run.id).await?;
            resumed += 1;
        }
        Ok(resumed)
    }

    pub async fn snapshot(&self, run_id: &str) -> Result<RunSnapshot, ControllerError> {
        let id = run_id.to_string();
        self.db
            .call(move |db| db.snapshot(&id))
            .await?
            .ok_or_else(|| ControllerError::RunNotFound {
                id: run_id.to_string(),
            })
    }

    pub async fn list_runs(&self, include_archived: bool) -> Result<Vec<Run>, ControllerError> {
        Ok(self
            .db
            .call(move |db| db.list_runs(include_archived))
            .await?)
    }

    async fn load_run(&self, run_id: &str) -> Result<Run, ControllerError> {
        let id = run_id.to_string();
        let run = self
            .db
            .call(move |db| db.get_run(&id))
            .await?
            .ok_or_else(|| ControllerError::RunNotFound {
                id: run_id.to_string(),
            })?;
        if run.archived {
            return Err(ControllerError::RunArchived {
                id: run_id.to_string(),
            });
        }
        Ok(run)
    }

    // ── The loop ─────────────────────────────────────────────────────

    /// Run controller iterations until the run blocks at a gate, completes,
    /// or fails. Strictly serialized per run.
    pub async fn drive(&self, run_id: &str) -> Result<(), ControllerError> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;

        loop {
            let snapshot = self.snapshot(run_id).await?;
            let run = &snapshot.run;

            if run.archived || run.pipeline_status.is_terminal() {
                return Ok(());
            }
            if run.is_gate_open() {
                // Suspended; the loop re-enters when the gate resolves.
                self.set_status(run_id, PipelineStatus::Blocked).await?;
                return Ok(());
            }

            let Some(next) = self.graph.next_ready(&snapshot.nodes) else {
                self.set_status(run_id, PipelineStatus::Complete).await?;
                tracing::info!(run_id, "pipeline complete");
                self.hub.emit(
                    run_id,
                    RunEvent::PipelineComplete {
                        status: PipelineStatus::Complete,
                    },
                );
                return Ok(());
            };

            self.enter_node(run_id, &snapshot, next).await?;

            // Re-read: entering may have bumped the version or unlocked it.
            let snapshot = self.snapshot(run_id).await?;
            let node = snapshot
                .node(next)
                .cloned()
                .ok_or_else(|| ControllerError::Other(anyhow::anyhow!("Node {} missing", next)))?;

            let Some(stage) = self.registry.get(&next).map(Arc::clone) else {
                self.fail_run(run_id, next, "no stage implementation registered")
                    .await?;
                return Err(ControllerError::NoStageImpl { node: next });
            };

            let ctx = StageContext {
                snapshot,
                node,
                toolkit: Arc::clone(&self.toolkit),
            };

            match stage.execute(&ctx).await {
                Ok(StageOutcome::Complete { meta }) => {
                    self.complete_node(run_id, next, meta).await?;
                }
                Ok(StageOutcome::NeedsGate { request, meta }) => {
                    self.suspend_at_gate(run_id, next, request, meta).await?;
                    return Ok(());
                }
                Err(err) => {
                    self.fail_run(run_id, next, &format!("{:#}", err)).await?;
                    return Err(ControllerError::StageFailed {
                        node: next,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    async fn enter_node(
        &self,
        run_id: &str,
        snapshot: &RunSnapshot,
        key: NodeKey,
    ) -> Result<(), ControllerError> {
        let node = snapshot
            .node(key)
            .ok_or_else(|| ControllerError::Other(anyhow::anyhow!("Node {} missing", key)))?;

        let starting = node.status != NodeStatus::InProgress;
        let id = run_id.to_string();
        let stale = node.is_stale();
        let mut meta = node.meta.clone();
        self.db
            .call(move |db| {
                if stale {
                    // A rebuild bumps the version; the gate rows of the old
                    // build are thereby superseded.
                    db.bump_node_version(&id, key)?;
                    if let Some(obj) = meta.as_object_mut() {
                        obj.remove("stale");
                        obj.remove("gate_responses");
                    }
                    db.set_node_meta(&id, key, &meta)?;
                }
                db.set_node_status(&id, key, NodeStatus::InProgress)?;
                db.set_current_stage(&id, key)?;
                db.set_pipeline_status(&id, PipelineStatus::Running)
            })
            .await?;

        if starting {
            let version = if stale {
                node.active_version + 1
            } else {
                node.active_version
            };
            tracing::info!(run_id, node = %key, version, "stage start");
            self.hub.emit(run_id, RunEvent::StageStart { node: key, version });
        }
        Ok(())
    }

    async fn complete_node(
        &self,
        run_id: &str,
        key: NodeKey,
        meta: serde_json::Value,
    ) -> Result<(), ControllerError> {
        let auto_approved = meta
            .get("auto_approved")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let status = if auto_approved {
            NodeStatus::AutoApproved
        } else {
            NodeStatus::Complete
        };

        {
            let id = run_id.to_string();
            let meta = meta.clone();
            self.db
                .call(move |db| {
                    db.set_node_meta(&id, key, &meta)?;
                    db.set_node_status(&id, key, status)?;
                    // Unlock direct dependents whose dependencies are now met.
                    let nodes = db.get_nodes(&id)?;
                    let graph = StageGraph::pipeline();
                    for dependent in graph.dependents(key) {
                        let locked = nodes
                            .iter()
                            .find(|n| n.node_key == dependent)
                            .map(|n| n.status == NodeStatus::Locked)
                            .unwrap_or(false);
                        if locked && graph.dependencies_satisfied(dependent, &nodes) {
                            db.set_node_status(&id, dependent, NodeStatus::Pending)?;
                        }
                    }
                    db.set_active_node(&id, None)
                })
                .await?;
        }

        // Surface research readiness whenever the stage reports it.
        if let Some(score) = meta.get("readiness").and_then(|v| v.as_f64()) {
            self.hub.emit(
                run_id,
                RunEvent::ReadinessUpdate {
                    node: key,
                    score,
                    threshold: self.toolkit.readiness_threshold,
                },
            );
        }

        tracing::info!(run_id, node = %key, "stage complete");
        self.hub.emit(
            run_id,
            RunEvent::StageComplete {
                node: key,
                detail: None,
            },
        );
        self.replans.complete_if_rebuilt(run_id).await.map_err(|e| {
            ControllerError::Other(anyhow::anyhow!("replan completion check failed: {}", e))
        })?;
        Ok(())
    }

    async fn suspend_at_gate(
        &self,
        run_id: &str,
        key: NodeKey,
        request: GateRequest,
        meta: serde_json::Value,
    ) -> Result<(), ControllerError> {
        let active = request.context.clone();
        {
            let id = run_id.to_string();
            self.db
                .call(move |db| {
                    db.set_node_meta(&id, key, &meta)?;
                    db.set_node_status(&id, key, NodeStatus::Blocked)?;
                    db.set_active_node(&id, active.as_deref())
                })
                .await?;
        }

        if let Some(score) = self
            .snapshot(run_id)
            .await?
            .node(key)
            .and_then(|n| n.meta.get("readiness"))
            .and_then(|v| v.as_f64())
        {
            self.hub.emit(
                run_id,
                RunEvent::ReadinessUpdate {
                    node: key,
                    score,
                    threshold: self.toolkit.readiness_threshold,
                },
            );
        }

        let version = {
            let id = run_id.to_string();
            self.db
                .call(move |db| db.get_node(&id, key))
                .await?
                .map(|n| n.active_version)
                .unwrap_or(1)
        };

        match self.gates.open(run_id, version, request).await {
            Ok(_) => {
                self.set_status(run_id, PipelineStatus::Blocked).await?;
                Ok(())
            }
            // Lost a race against another opener for this run; stay blocked.
            Err(GateError::AlreadyOpen { .. }) => {
                self.set_status(run_id, PipelineStatus::Blocked).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fail_run(&self, run_id: &str, key: NodeKey, message: &str) -> Result<(), ControllerError> {
        // The node keeps its last good snapshot; only the run state flips.
        self.set_status(run_id, PipelineStatus::Error).await?;
        tracing::warn!(run_id, node = %key, error = message, "stage failed");
        self.hub.emit(
            run_id,
            RunEvent::StageFailed {
                node: key,
                error: message.to_string(),
            },
        );
        Ok(())
    }

    async fn set_status(&self, run_id: &str, status: PipelineStatus) -> Result<(), ControllerError> {
        let id = run_id.to_string();
        self.db
            .call(move |db| db.set_pipeline_status(&id, status))
            .await?;
        Ok(())
    }

    // ── Gate resolution ──────────────────────────────────────────────

    /// Resolve the currently open gate and resume the loop. The recorded
    /// response is merged into the node's meta so the re-invoked stage
    /// implementation sees it.
    pub async fn resolve_gate(
        &self,
        run_id: &str,
        gate_id: &str,
        response: serde_json::Value,
    ) -> Result<Gate, ControllerError> {
        let run = self.load_run(run_id).await?;
        if run.restart_pending {
            return Err(ControllerError::RestartPending {
                id: run_id.to_string(),
            });
        }

        let gate = self.gates.resolve(run_id, gate_id, response.clone()).await?;
        let approved = response
            .get("approved")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        // Record the response on the node for idempotent re-entry.
        {
            let id = run_id.to_string();
            let gate_id = gate_id.to_string();
            let node_key = gate.node_key;
            self.db
                .call(move |db| {
                    let node = db
                        .get_node(&id, node_key)?
                        .ok_or_else(|| anyhow::anyhow!("Node {} missing", node_key))?;
                    let mut meta = match node.meta {
                        serde_json::Value::Object(map) => serde_json::Value::Object(map),
                        _ => serde_json::json!({}),
                    };
                    if !meta["gate_responses"].is_object() {
                        meta["gate_responses"] = serde_json::json!({});
                    }
                    meta["gate_responses"][&gate_id] = response;
                    db.set_node_meta(&id, node_key, &meta)?;
                    db.set_node_status(&id, node_key, NodeStatus::InProgress)?;
                    db.set_pipeline_status(&id, PipelineStatus::Running)
                })
                .await?;
        }

        // An approved contextual gate (e.g. a section) completes a sub-unit
        // of the stage; surface it before the loop opens the next one.
        if approved {
            if let Some((node, Some(context))) = parse_gate_id(gate_id) {
                self.hub.emit(
                    run_id,
                    RunEvent::StageComplete {
                        node,
                        detail: Some(context),
                    },
                );
            }
        }

        // The gate itself resolved; a downstream stage failure is already
        // surfaced as run state and a stage_failed event.
        match self.drive(run_id).await {
            Ok(()) | Err(ControllerError::StageFailed { .. }) => Ok(gate),
            Err(err) => Err(err),
        }
    }

    /// Approve every still-open required section in a bundle, in section
    /// order, without re-running the suggestion engine for the bundled
    /// approvals.
    pub async fn approve_bundle(
        &self,
        run_id: &str,
        bundle: BundleKey,
    ) -> Result<Vec<String>, ControllerError> {
        let snapshot = self.snapshot(run_id).await?;
        let sections_node = snapshot
            .node(NodeKey::Sections)
            .cloned()
            .ok_or_else(|| ControllerError::Other(anyhow::anyhow!("Sections node missing")))?;

        let approved =
            stages::approved_sections(&sections_node.meta, sections_node.active_version);
        let remaining = self.toolkit.bundles.remaining_required(bundle, &approved);

        // Pre-approve everything still outstanding in the bundle; the stage
        // sees these as already reviewed and will not open gates for them.
        let mut resolved = Vec::new();
        {
            let id = run_id.to_string();
            let remaining = remaining.clone();
            self.db
                .call(move |db| {
                    let node = db
                        .get_node(&id, NodeKey::Sections)?
                        .ok_or_else(|| anyhow::anyhow!("Sections node missing"))?;
                    let mut meta = match node.meta {
                        serde_json::Value::Object(map) => serde_json::Value::Object(map),
                        _ => serde_json::json!({}),
                    };
                    if !meta["sections"].is_object() {
                        meta["sections"] = serde_json::json!({});
                    }
                    for section in &remaining {
                        let entry = &mut meta["sections"][section.as_str()];
                        if !entry.is_object() {
                            *entry = serde_json::json!({});
                        }
                        entry["approved"] = serde_json::Value::Bool(true);
                        entry["via"] = serde_json::Value::String("bundle".into());
                        entry["version"] = serde_json::Value::from(node.active_version);
                    }
                    db.set_node_meta(&id, NodeKey::Sections, &meta)
                })
                .await?;
        }

        // The single open gate, if it belongs to the bundle, resolves through
        // the gate manager so retries still observe exactly-once semantics.
        if let Some(open_gate) = snapshot.run.pending_gate.clone() {
            let belongs = parse_gate_id(&open_gate)
                .and_then(|(node, ctx)| match (node, ctx) {
                    (NodeKey::Sections, Some(ctx)) => {
                        ctx.parse::<crate::suggest::SectionKind>().ok()
                    }
                    _ => None,
                })
                .map(|section| remaining.contains(&section))
                .unwrap_or(false);
            if belongs {
                self.resolve_gate(
                    run_id,
                    &open_gate,
                    serde_json::json!({"approved": true, "via": "bundle"}),
                )
                .await?;
                resolved.push(open_gate);
                return Ok(resolved);
            }
        }

        self.drive(run_id).await?;
        Ok(resolved)
    }

    // ── Administrative operations ────────────────────────────────────

    /// Bypass the research readiness threshold and move straight to
    /// drafting with whatever evidence has been gathered.
    pub async fn force_advance(&self, run_id: &str) -> Result<RunSnapshot, ControllerError> {
        let snapshot = self.snapshot(run_id).await?;
        let research = snapshot
            .node(NodeKey::Research)
            .cloned()
            .ok_or_else(|| ControllerError::Other(anyhow::anyhow!("Research node missing")))?;

        if !research.status.is_satisfied() {
            self.gates.expire_all(run_id).await?;
            let id = run_id.to_string();
            let mut meta = match research.meta {
                serde_json::Value::Object(map) => serde_json::Value::Object(map),
                _ => serde_json::json!({}),
            };
            meta["force_advanced"] = serde_json::Value::Bool(true);
            self.db
                .call(move |db| {
                    db.set_node_meta(&id, NodeKey::Research, &meta)?;
                    db.set_pipeline_status(&id, PipelineStatus::Running)
                })
                .await?;
            tracing::info!(run_id, "readiness threshold bypassed by force-advance");
        }

        self.drive(run_id).await?;
        self.snapshot(run_id).await
    }

    /// Administrative abort: the run transitions to `error`, any open gate is
    /// force-expired, and the loop is released. In-flight stage work is
    /// discarded on return.
    pub async fn abort(&self, run_id: &str) -> Result<RunSnapshot, ControllerError> {
        let run = self.load_run(run_id).await?;
        self.gates.expire_all(run_id).await?;
        self.set_status(run_id, PipelineStatus::Error).await?;
        tracing::warn!(run_id, "run aborted");
        self.hub.emit(
            run_id,
            RunEvent::StageFailed {
                node: run.current_stage,
                error: "aborted by operator".to_string(),
            },
        );
        self.snapshot(run_id).await
    }

    /// Archive an ended run. The snapshot stays queryable read-only.
    pub async fn archive(&self, run_id: &str) -> Result<(), ControllerError> {
        self.load_run(run_id).await?;
        let id = run_id.to_string();
        self.db.call(move |db| db.archive_run(&id)).await?;
        Ok(())
    }

    /// Sections already approved, for bundle progress reporting.
    pub async fn approved_sections(
        &self,
        run_id: &str,
    ) -> Result<HashSet<crate::suggest::SectionKind>, ControllerError> {
        let snapshot = self.snapshot(run_id).await?;
        Ok(snapshot
            .node(NodeKey::Sections)
            .map(|n| stages::approved_sections(&n.meta, n.active_version))
            .unwrap_or_default())
    }

    /// Current review-bundle aggregation, recomputed from section statuses.
    pub async fn bundles(
        &self,
        run_id: &str,
    ) -> Result<Vec<crate::review::ReviewBundle>, ControllerError> {
        let approved = self.approved_sections(run_id).await?;
        Ok(self.toolkit.bundles.compute(&approved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TailorDb;

    fn controller() -> (Arc<RunController>, DbHandle) {
        let db = DbHandle::new(TailorDb::new_in_memory().unwrap());
        let hub = Arc::new(EventHub::new());
        let ctrl = RunController::new(db.clone(), hub, PipelineSettings::default());
        (Arc::new(ctrl), db)
    }

    fn controller_with_hub() -> (Arc<RunController>, Arc<EventHub>) {
        let db = DbHandle::new(TailorDb::new_in_memory().unwrap());
        let hub = Arc::new(EventHub::new());
        let ctrl = RunController::new(db, Arc::clone(&hub), PipelineSettings::default());
        (Arc::new(ctrl), hub)
    }

    fn intake_payload() -> serde_json::Value {
        serde_json::json!({
            "resume_text": "...",
            "job_requirements": [
                {"text": "Kubernetes", "criticality": "must_have"},
            ],
            "keywords": ["platform"],
        })
    }

    fn five_evidence() -> serde_json::Value {
        serde_json::json!({
            "evidence": [
                "Ran Kubernetes in production for 3 years",
                "Cut deploy time by 80%",
                "Led a team of 4",
                "Built the platform CI",
                "Owned incident response",
            ]
        })
    }

    /// Drive a fresh run to its first gate (research readiness).
    async fn run_to_research_gate(ctrl: &RunController) -> String {
        let run = ctrl.create_run(Some(intake_payload())).await.unwrap();
        let snapshot = ctrl.start(&run.id).await.unwrap();
        assert_eq!(snapshot.run.pending_gate.as_deref(), Some("research"));
        assert_eq!(snapshot.run.pipeline_status, PipelineStatus::Blocked);
        run.id
    }

    /// Drive a fresh run all the way to the first section gate.
    async fn run_to_sections(ctrl: &RunController) -> String {
        let run_id = run_to_research_gate(ctrl).await;
        ctrl.resolve_gate(&run_id, "research", five_evidence())
            .await
            .unwrap();
        // Kubernetes is covered by evidence, so no interview gate opens;
        // the next suspension is the first section review.
        let snapshot = ctrl.snapshot(&run_id).await.unwrap();
        assert_eq!(
            snapshot.run.pending_gate.as_deref(),
            Some("sections:headline")
        );
        run_id
    }

    #[tokio::test]
    async fn test_run_starts_idle_and_blocks_at_first_gate() {
        let (ctrl, _db) = controller();
        let run = ctrl.create_run(Some(intake_payload())).await.unwrap();
        assert_eq!(run.pipeline_status, PipelineStatus::Idle);

        let snapshot = ctrl.start(&run.id).await.unwrap();
        assert_eq!(snapshot.run.pipeline_status, PipelineStatus::Blocked);
        assert_eq!(snapshot.run.pending_gate.as_deref(), Some("research"));
        // Intake completed; research is suspended.
        assert_eq!(
            snapshot.node(NodeKey::Intake).unwrap().status,
            NodeStatus::Complete
        );
        assert_eq!(
            snapshot.node(NodeKey::Research).unwrap().status,
            NodeStatus::Blocked
        );
        // Downstream remains locked.
        assert_eq!(
            snapshot.node(NodeKey::Export).unwrap().status,
            NodeStatus::Locked
        );
    }

    #[tokio::test]
    async fn test_double_resolve_first_wins_second_conflicts() {
        let (ctrl, db) = controller();
        let run_id = run_to_research_gate(&ctrl).await;

        ctrl.resolve_gate(&run_id, "research", five_evidence())
            .await
            .unwrap();
        let err = ctrl
            .resolve_gate(&run_id, "research", five_evidence())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Gate(GateError::Conflict { .. })
        ));

        // pending_gate moved on to the next checkpoint, not stuck.
        let run = db
            .call(move |db| db.get_run(&run_id))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(run.pending_gate.as_deref(), Some("research"));
    }

    #[tokio::test]
    async fn test_cold_resume_returns_to_same_gate() {
        let (ctrl, db) = controller();
        let run_id = run_to_sections(&ctrl).await;
        let before = ctrl.snapshot(&run_id).await.unwrap();

        // Fresh controller over the same store: no in-memory state survives.
        let hub = Arc::new(EventHub::new());
        let revived = RunController::new(db.clone(), hub, PipelineSettings::default());
        let resumed = revived.resume_all().await.unwrap();
        assert_eq!(resumed, 1);

        let after = revived.snapshot(&run_id).await.unwrap();
        assert_eq!(after.run.pending_gate, before.run.pending_gate);
        assert_eq!(after.run.pipeline_status, PipelineStatus::Blocked);
        // Completed stages were not re-invoked: versions and statuses match.
        for key in NodeKey::all() {
            let b = before.node(*key).unwrap();
            let a = after.node(*key).unwrap();
            assert_eq!(a.status, b.status, "status drifted for {}", key);
            assert_eq!(a.active_version, b.active_version, "version drifted for {}", key);
        }

        // And the revived controller still drives the run forward.
        revived
            .resolve_gate(
                &run_id,
                "sections:headline",
                serde_json::json!({"approved": true}),
            )
            .await
            .unwrap();
        let next = revived.snapshot(&run_id).await.unwrap();
        assert_eq!(next.run.pending_gate.as_deref(), Some("sections:summary"));
    }

    #[tokio::test]
    async fn test_section_approval_emits_detail_and_advances_active_node() {
        let (ctrl, hub) = controller_with_hub();
        let run_id = run_to_sections(&ctrl).await;

        // Approve headline, then watch summary's approval closely.
        ctrl.resolve_gate(
            &run_id,
            "sections:headline",
            serde_json::json!({"approved": true}),
        )
        .await
        .unwrap();

        let snapshot = ctrl.snapshot(&run_id).await.unwrap();
        assert_eq!(snapshot.run.pending_gate.as_deref(), Some("sections:summary"));
        assert_eq!(snapshot.run.active_node.as_deref(), Some("summary"));

        let mut rx = hub.subscribe(&run_id);
        ctrl.resolve_gate(
            &run_id,
            "sections:summary",
            serde_json::json!({"approved": true}),
        )
        .await
        .unwrap();

        // The sub-stage completion for "summary" was emitted.
        let mut saw_summary_complete = false;
        while let Ok(envelope) = rx.try_recv() {
            if let RunEvent::StageComplete {
                node: NodeKey::Sections,
                detail: Some(detail),
            } = &envelope.event
            {
                if detail.as_str() == "summary" {
                    saw_summary_complete = true;
                }
            }
        }
        assert!(saw_summary_complete);

        // active_node advanced to the next section in review order.
        let snapshot = ctrl.snapshot(&run_id).await.unwrap();
        assert_eq!(snapshot.run.active_node.as_deref(), Some("experience"));

        // Resubmitting the already-resolved gate is a conflict, not success.
        let err = ctrl
            .resolve_gate(
                &run_id,
                "sections:summary",
                serde_json::json!({"approved": true}),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Gate(GateError::Conflict { .. } | GateError::Expired { .. })
        ));
    }

    #[tokio::test]
    async fn test_pipeline_runs_to_completion() {
        let (ctrl, _db) = controller();
        let run_id = run_to_sections(&ctrl).await;

        for gate in [
            "sections:headline",
            "sections:summary",
            "sections:experience",
            "sections:skills",
            "sections:education",
            "quality",
        ] {
            ctrl.resolve_gate(&run_id, gate, serde_json::json!({"approved": true}))
                .await
                .unwrap();
        }

        let snapshot = ctrl.snapshot(&run_id).await.unwrap();
        assert_eq!(snapshot.run.pipeline_status, PipelineStatus::Complete);
        assert!(snapshot.run.pending_gate.is_none());
        for key in NodeKey::all() {
            assert!(
                snapshot.node(*key).unwrap().status.is_satisfied(),
                "{} not satisfied",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_force_advance_bypasses_readiness() {
        let (ctrl, _db) = controller();
        let run_id = run_to_research_gate(&ctrl).await;

        let snapshot = ctrl.force_advance(&run_id).await.unwrap();
        let research = snapshot.node(NodeKey::Research).unwrap();
        assert!(research.status.is_satisfied());
        assert_eq!(research.meta["force_advanced"], true);
        // The prior research gate no longer resolves.
        let err = ctrl
            .resolve_gate(&run_id, "research", five_evidence())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Gate(GateError::Expired { .. } | GateError::Conflict { .. })
        ));
        // The run moved on to drafting checkpoints.
        assert!(
            snapshot
                .run
                .pending_gate
                .as_deref()
                .map(|g| g.starts_with("sections:") || g == "interview")
                .unwrap_or(false)
        );
    }

    #[tokio::test]
    async fn test_approve_remaining_in_bundle() {
        let (ctrl, _db) = controller();
        let run_id = run_to_sections(&ctrl).await;

        // Clear the headline bundle first.
        for gate in ["sections:headline", "sections:summary"] {
            ctrl.resolve_gate(&run_id, gate, serde_json::json!({"approved": true}))
                .await
                .unwrap();
        }
        let snapshot = ctrl.snapshot(&run_id).await.unwrap();
        assert_eq!(
            snapshot.run.pending_gate.as_deref(),
            Some("sections:experience")
        );

        let resolved = ctrl
            .approve_bundle(&run_id, BundleKey::CoreExperience)
            .await
            .unwrap();
        assert_eq!(resolved, vec!["sections:experience".to_string()]);

        let snapshot = ctrl.snapshot(&run_id).await.unwrap();
        let sections = snapshot.node(NodeKey::Sections).unwrap();
        // Both required sections approved; skills without another gate.
        assert_eq!(sections.meta["sections"]["experience"]["approved"], true);
        assert_eq!(sections.meta["sections"]["skills"]["via"], "bundle");
        // The non-required third section was not bundle-approved.
        assert_ne!(sections.meta["sections"]["achievements"]["via"], "bundle");
        // Review moved into the supporting bundle.
        assert_eq!(
            snapshot.run.pending_gate.as_deref(),
            Some("sections:education")
        );
    }

    #[tokio::test]
    async fn test_abort_expires_gate_and_errors_run() {
        let (ctrl, _db) = controller();
        let run_id = run_to_research_gate(&ctrl).await;

        let snapshot = ctrl.abort(&run_id).await.unwrap();
        assert_eq!(snapshot.run.pipeline_status, PipelineStatus::Error);
        assert!(snapshot.run.pending_gate.is_none());

        let err = ctrl
            .resolve_gate(&run_id, "research", five_evidence())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Gate(GateError::Expired { .. } | GateError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_replan_restart_discards_stale_review_decisions() {
        let (ctrl, _db) = controller();
        let run_id = run_to_sections(&ctrl).await;
        ctrl.resolve_gate(
            &run_id,
            "sections:headline",
            serde_json::json!({"approved": true}),
        )
        .await
        .unwrap();

        // Benchmark edit at gap_analysis while sections already has review
        // decisions: destructive, so confirmation is demanded.
        let outcome = ctrl
            .replans()
            .request(
                &run_id,
                NodeKey::GapAnalysis,
                serde_json::json!({"seniority": "staff"}),
            )
            .await
            .unwrap();
        assert!(outcome.requires_restart);

        // Gate resolution is frozen until the restart is confirmed.
        let err = ctrl
            .resolve_gate(
                &run_id,
                "sections:summary",
                serde_json::json!({"approved": true}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::RestartPending { .. }));

        ctrl.replans().confirm_restart(&run_id).await.unwrap();
        ctrl.drive(&run_id).await.unwrap();

        // The pipeline rebuilt forward from gap_analysis and re-gated the
        // first section; the old approval no longer counts.
        let snapshot = ctrl.snapshot(&run_id).await.unwrap();
        assert_eq!(
            snapshot.run.pending_gate.as_deref(),
            Some("sections:headline")
        );
        let sections = snapshot.node(NodeKey::Sections).unwrap();
        assert_eq!(sections.active_version, 2);
        assert!(ctrl.approved_sections(&run_id).await.unwrap().is_empty());
        // Upstream of the edit was untouched.
        assert_eq!(snapshot.node(NodeKey::Research).unwrap().active_version, 1);
    }

    #[tokio::test]
    async fn test_nonrestart_replan_reenters_on_next_iteration() {
        let (ctrl, _db) = controller();
        let run_id = run_to_research_gate(&ctrl).await;

        // The run is still at research; editing gap_analysis downstream of
        // the current position needs no confirmation.
        let outcome = ctrl
            .replans()
            .request(&run_id, NodeKey::GapAnalysis, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(!outcome.requires_restart);

        // The open research gate still resolves; the loop then rebuilds the
        // stale nodes without any confirmation step.
        ctrl.resolve_gate(&run_id, "research", five_evidence())
            .await
            .unwrap();
        let snapshot = ctrl.snapshot(&run_id).await.unwrap();
        assert_eq!(
            snapshot.node(NodeKey::GapAnalysis).unwrap().active_version,
            2
        );
        assert_eq!(
            snapshot.run.pending_gate.as_deref(),
            Some("sections:headline")
        );
    }

    #[tokio::test]
    async fn test_archived_run_rejects_operations() {
        let (ctrl, _db) = controller();
        let run = ctrl.create_run(None).await.unwrap();
        ctrl.archive(&run.id).await.unwrap();

        let err = ctrl.start(&run.id).await.unwrap_err();
        assert!(matches!(err, ControllerError::RunArchived { .. }));
        // The snapshot stays queryable read-only.
        assert!(ctrl.snapshot(&run.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_runs_are_independent() {
        let (ctrl, _db) = controller();
        let a = run_to_research_gate(&ctrl).await;
        let b = run_to_research_gate(&ctrl).await;

        ctrl.resolve_gate(&a, "research", five_evidence())
            .await
            .unwrap();

        let snap_a = ctrl.snapshot(&a).await.unwrap();
        let snap_b = ctrl.snapshot(&b).await.unwrap();
        assert_eq!(snap_a.run.pending_gate.as_deref(), Some("sections:headline"));
        assert_eq!(snap_b.run.pending_gate.as_deref(), Some("research"));
    }
}
