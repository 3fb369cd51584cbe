//! Default stage implementations.
//!
//! These are deliberately mechanical: real deployments swap richer
//! implementations in per node (`RunController::with_stage`). What matters
//! here is the contract — each one is idempotent on re-entry, records its
//! interim work in node meta, and requests gates through `StageOutcome`
//! rather than talking to the gate manager directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{StageContext, StageImpl, StageOutcome};
use crate::gate::{GateRequest, gate_id};
use crate::pipeline::NodeKey;
use crate::review::{BundleKey, ReviewStrategy};
use crate::suggest::{SectionKind, SuggestionInputs, SuggestionIntent, suggestion_id};

/// Registry of the built-in implementations, one per node.
pub fn default_registry() -> HashMap<NodeKey, Arc<dyn StageImpl>> {
    let mut registry: HashMap<NodeKey, Arc<dyn StageImpl>> = HashMap::new();
    registry.insert(NodeKey::Intake, Arc::new(IntakeStage));
    registry.insert(NodeKey::Research, Arc::new(ResearchStage));
    registry.insert(NodeKey::GapAnalysis, Arc::new(GapAnalysisStage));
    registry.insert(NodeKey::Interview, Arc::new(InterviewStage));
    registry.insert(NodeKey::Blueprint, Arc::new(BlueprintStage));
    registry.insert(NodeKey::Sections, Arc::new(SectionsStage));
    registry.insert(NodeKey::Quality, Arc::new(QualityStage));
    registry.insert(NodeKey::Export, Arc::new(ExportStage));
    registry
}

fn as_object(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        _ => json!({}),
    }
}

/// Sections marked approved in the sections node meta at the given node
/// version. Approvals recorded against an older version — before a replan
/// rebuilt the node — do not count.
pub fn approved_sections(meta: &Value, version: i64) -> HashSet<SectionKind> {
    meta.get("sections")
        .and_then(|s| s.as_object())
        .map(|map| {
            map.iter()
                .filter(|(_, entry)| {
                    entry
                        .get("approved")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false)
                        && entry.get("version").and_then(|v| v.as_i64()).unwrap_or(1) == version
                })
                .filter_map(|(name, _)| name.parse::<SectionKind>().ok())
                .collect()
        })
        .unwrap_or_default()
}

// ── Intake ───────────────────────────────────────────────────────────

/// Normalizes the uploaded material. The interesting parsing is an external
/// concern; this records that intake ran and preserves whatever was seeded.
struct IntakeStage;

#[async_trait]
impl StageImpl for IntakeStage {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let mut meta = as_object(&ctx.node.meta);
        meta["parsed"] = Value::Bool(true);
        Ok(StageOutcome::Complete { meta })
    }
}

// ── Research ─────────────────────────────────────────────────────────

/// Gathers evidence until the readiness threshold is met, gating for more
/// material when it is not. Force-advance bypasses the threshold.
struct ResearchStage;

const RESEARCH_EVIDENCE_TARGET: usize = 5;

fn readiness_score(meta: &Value) -> f64 {
    let count = meta
        .get("evidence")
        .and_then(|e| e.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    (count as f64 / RESEARCH_EVIDENCE_TARGET as f64).min(1.0)
}

#[async_trait]
impl StageImpl for ResearchStage {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let mut meta = as_object(&ctx.node.meta);

        // Evidence supplied through the research gate merges in, unique by
        // text, so re-entry never duplicates.
        if let Some(response) = ctx.node.gate_response(&gate_id(NodeKey::Research, None)) {
            let new_items: Vec<Value> = response
                .get("evidence")
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default();
            let mut evidence = meta
                .get("evidence")
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default();
            for item in new_items {
                if !evidence.contains(&item) {
                    evidence.push(item);
                }
            }
            meta["evidence"] = Value::Array(evidence);
        }

        let score = readiness_score(&meta);
        meta["readiness"] = json!(score);

        let forced = meta
            .get("force_advanced")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if forced || score >= ctx.toolkit.readiness_threshold {
            return Ok(StageOutcome::Complete { meta });
        }

        let payload = json!({
            "readiness": score,
            "threshold": ctx.toolkit.readiness_threshold,
            "prompt": "More evidence is needed before drafting. Add accomplishments, metrics, or project notes.",
        });
        Ok(StageOutcome::NeedsGate {
            request: GateRequest::new(NodeKey::Research, payload),
            meta,
        })
    }
}

// ── Gap analysis ─────────────────────────────────────────────────────

/// Crosses job requirements against gathered evidence and derives the
/// suggestion-engine inputs for every later review gate. Runs without a
/// gate; a benchmark edit replans straight through here.
struct GapAnalysisStage;

#[async_trait]
impl StageImpl for GapAnalysisStage {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let mut meta = as_object(&ctx.node.meta);
        let intake = ctx.upstream_meta(NodeKey::Intake);
        let research = ctx.upstream_meta(NodeKey::Research);

        let evidence_texts: Vec<String> = research
            .get("evidence")
            .and_then(|e| e.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| {
                        i.as_str()
                            .map(String::from)
                            .or_else(|| i.get("text").and_then(|t| t.as_str()).map(String::from))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut gaps = Vec::new();
        if let Some(requirements) = intake.get("job_requirements").and_then(|r| r.as_array()) {
            for req in requirements {
                let text = req
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                let criticality = req
                    .get("criticality")
                    .and_then(|c| c.as_str())
                    .unwrap_or("nice_to_have");
                // A requirement backed by quantified evidence is resolved
                // and produces no gap.
                let covering: Vec<&String> = evidence_texts
                    .iter()
                    .filter(|e| e.to_lowercase().contains(&text.to_lowercase()))
                    .collect();
                let deficit = if covering.is_empty() {
                    "no_evidence"
                } else if !covering
                    .iter()
                    .any(|e| e.chars().any(|c| c.is_ascii_digit()))
                {
                    "no_metric"
                } else {
                    continue;
                };
                gaps.push(json!({
                    "requirement": text,
                    "criticality": criticality,
                    "deficit": deficit,
                }));
            }
        }

        let evidence_items: Vec<Value> = evidence_texts
            .iter()
            .map(|text| {
                json!({
                    "text": text,
                    "has_metric": text.chars().any(|c| c.is_ascii_digit()),
                })
            })
            .collect();
        let keywords: Vec<Value> = intake
            .get("keywords")
            .and_then(|k| k.as_array())
            .cloned()
            .unwrap_or_default();

        meta["inputs"] = json!({
            "gaps": gaps,
            "evidence": evidence_items,
            "keywords": keywords,
        });
        Ok(StageOutcome::Complete { meta })
    }
}

// ── Interview ────────────────────────────────────────────────────────

/// Asks the candidate about each unresolved gap, one gate for the whole
/// question set.
struct InterviewStage;

#[async_trait]
impl StageImpl for InterviewStage {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let mut meta = as_object(&ctx.node.meta);
        let interview_gate = gate_id(NodeKey::Interview, None);

        if let Some(response) = ctx.node.gate_response(&interview_gate) {
            meta["answers"] = response
                .get("answers")
                .cloned()
                .unwrap_or_else(|| json!({}));
            return Ok(StageOutcome::Complete { meta });
        }

        let gap_inputs = ctx.upstream_meta(NodeKey::GapAnalysis);
        let questions: Vec<Value> = gap_inputs
            .get("inputs")
            .and_then(|i| i.get("gaps"))
            .and_then(|g| g.as_array())
            .map(|gaps| {
                gaps.iter()
                    .filter_map(|gap| {
                        let requirement = gap.get("requirement")?.as_str()?;
                        Some(json!({
                            "id": suggestion_id(SuggestionIntent::AddressRequirement, requirement),
                            "requirement": requirement,
                            "text": format!(
                                "Tell us about your experience with: {}",
                                requirement
                            ),
                        }))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if questions.is_empty() {
            meta["answers"] = json!({});
            return Ok(StageOutcome::Complete { meta });
        }

        Ok(StageOutcome::NeedsGate {
            request: GateRequest::new(NodeKey::Interview, json!({"questions": questions})),
            meta,
        })
    }
}

// ── Blueprint ────────────────────────────────────────────────────────

/// Lays out a draft plan per section from the interview answers. No gate;
/// the per-section review happens downstream.
struct BlueprintStage;

#[async_trait]
impl StageImpl for BlueprintStage {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let mut meta = as_object(&ctx.node.meta);
        let answers = ctx
            .upstream_meta(NodeKey::Interview)
            .get("answers")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let mut plan = json!({});
        for bundle in BundleKey::all() {
            for section in bundle.sections() {
                plan[section.as_str()] = json!({
                    "bundle": bundle.as_str(),
                    "draft": "",
                });
            }
        }
        meta["plan"] = plan;
        meta["answers_used"] = answers;
        Ok(StageOutcome::Complete { meta })
    }
}

// ── Sections ─────────────────────────────────────────────────────────

/// Walks the review plan bundle by bundle. Each required section not yet
/// approved gets a gate whose payload carries the ranked (and optionally
/// enriched) suggestions; non-required sections auto-approve under the
/// bundled strategy. Already-approved sections — including bundle
/// pre-approvals — are never re-ranked.
struct SectionsStage;

#[async_trait]
impl StageImpl for SectionsStage {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let mut meta = as_object(&ctx.node.meta);
        if !meta["sections"].is_object() {
            meta["sections"] = json!({});
        }

        let inputs: SuggestionInputs = ctx
            .upstream_meta(NodeKey::GapAnalysis)
            .get("inputs")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or_default()
            .unwrap_or_default();
        let blueprint = ctx.upstream_meta(NodeKey::Blueprint);
        let version = ctx.node.active_version;

        for (section, required) in ctx.toolkit.bundles.review_plan() {
            let name = section.as_str();
            let entry = &meta["sections"][name];
            let already_approved = entry
                .get("approved")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
                && entry.get("version").and_then(|v| v.as_i64()).unwrap_or(1) == version;
            if already_approved {
                continue;
            }

            let section_gate = gate_id(NodeKey::Sections, Some(name));
            let text = section_text(&meta, &blueprint, section);

            // A recorded gate response settles this section.
            if let Some(response) = ctx.node.gate_response(&section_gate) {
                let approved = response
                    .get("approved")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                if approved {
                    meta["sections"][name] = json!({
                        "approved": true,
                        "via": "gate",
                        "version": version,
                        "text": response.get("text").and_then(|t| t.as_str()).unwrap_or(&text),
                    });
                    continue;
                }
                // Rejected with edits: keep the new text and re-review below.
                if let Some(new_text) = response.get("text").and_then(|t| t.as_str()) {
                    meta["sections"][name] = json!({
                        "approved": false,
                        "text": new_text,
                    });
                }
            }

            if !required {
                let auto = ctx
                    .toolkit
                    .bundles
                    .strategy()
                    == ReviewStrategy::Bundled;
                meta["sections"][name] = json!({
                    "approved": true,
                    "via": if auto { "auto" } else { "draft" },
                    "version": version,
                    "text": text,
                });
                continue;
            }

            // Pass 1 is pure and infallible; pass 2 is bounded and falls
            // back silently.
            let text = section_text(&meta, &blueprint, section);
            let ranked = ctx.toolkit.engine.rank(section, &text, &inputs);
            let suggestions = ctx.toolkit.enricher.enrich(ranked).await;

            let approved = approved_sections(&meta, version);
            let bundle = BundleKey::for_section(section);
            let remaining = ctx.toolkit.bundles.remaining_required(bundle, &approved);
            let payload = json!({
                "section": name,
                "bundle": bundle.as_str(),
                "text": text,
                "suggestions": suggestions,
                "bundle_remaining": remaining.len(),
            });
            return Ok(StageOutcome::NeedsGate {
                request: GateRequest::new(NodeKey::Sections, payload).with_context(name),
                meta,
            });
        }

        Ok(StageOutcome::Complete { meta })
    }
}

fn section_text(meta: &Value, blueprint: &Value, section: SectionKind) -> String {
    meta["sections"][section.as_str()]
        .get("text")
        .and_then(|t| t.as_str())
        .map(String::from)
        .unwrap_or_else(|| {
            blueprint["plan"][section.as_str()]
                .get("draft")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string()
        })
}

// ── Quality ──────────────────────────────────────────────────────────

/// Final whole-document check. Gates for sign-off under the sequential
/// strategy; auto-approves under the bundled strategy.
struct QualityStage;

#[async_trait]
impl StageImpl for QualityStage {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let mut meta = as_object(&ctx.node.meta);
        let sections = ctx.upstream_meta(NodeKey::Sections);
        let sections_version = ctx
            .snapshot
            .node(NodeKey::Sections)
            .map(|n| n.active_version)
            .unwrap_or(1);
        let approved = approved_sections(&sections, sections_version);
        meta["sections_approved"] = json!(approved.len());

        let quality_gate = gate_id(NodeKey::Quality, None);
        if ctx.node.gate_response(&quality_gate).is_some() {
            return Ok(StageOutcome::Complete { meta });
        }

        if ctx.toolkit.bundles.strategy() == ReviewStrategy::Bundled {
            meta["auto_approved"] = Value::Bool(true);
            return Ok(StageOutcome::Complete { meta });
        }

        Ok(StageOutcome::NeedsGate {
            request: GateRequest::new(
                NodeKey::Quality,
                json!({
                    "sections_approved": approved.len(),
                    "prompt": "Final review before export.",
                }),
            ),
            meta,
        })
    }
}

// ── Export ───────────────────────────────────────────────────────────

/// Hands the approved document to the export surface. Encodings are out of
/// scope; this records completion.
struct ExportStage;

#[async_trait]
impl StageImpl for ExportStage {
    async fn execute(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let mut meta = as_object(&ctx.node.meta);
        meta["exported"] = Value::Bool(true);
        Ok(StageOutcome::Complete { meta })
    }
}
