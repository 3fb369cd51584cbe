//! Two-pass suggestion ranking for section review gates.
//!
//! Pass 1 (this module) is a pure function from unresolved gaps, evidence,
//! and keywords to a ranked, capped suggestion list. It never fails and never
//! blocks. Pass 2 (`enrich`) optionally reorders and rewords the list through
//! an external service under a hard timeout, falling back to pass-1 output on
//! any error.
//!
//! Suggestion ids are stable hashes of the semantic target, so recomputing
//! for the same underlying gap yields the same id — the client diffs "still
//! open" vs "newly resolved" without engine cooperation.

pub mod enrich;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use enrich::{EnrichmentConfig, SuggestionEnricher};

// ── Scoring inputs ───────────────────────────────────────────────────

/// How critical a job requirement is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    MustHave,
    NiceToHave,
    Implicit,
}

impl Criticality {
    pub fn weight(&self) -> u32 {
        match self {
            Self::MustHave => 3,
            Self::NiceToHave => 2,
            Self::Implicit => 1,
        }
    }
}

/// How weak the supporting evidence for a requirement is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceDeficit {
    NoEvidence,
    NoMetric,
    Weak,
}

impl EvidenceDeficit {
    pub fn weight(&self) -> u32 {
        match self {
            Self::NoEvidence => 3,
            Self::NoMetric => 2,
            Self::Weak => 1,
        }
    }
}

/// The resume section a suggestion applies to. Experience sections score
/// highest for relevance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Summary,
    Headline,
    Experience,
    Skills,
    Achievements,
    Education,
    Projects,
    Certifications,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Headline => "headline",
            Self::Experience => "experience",
            Self::Skills => "skills",
            Self::Achievements => "achievements",
            Self::Education => "education",
            Self::Projects => "projects",
            Self::Certifications => "certifications",
        }
    }

    pub fn relevance_weight(&self) -> u32 {
        match self {
            Self::Experience | Self::Achievements => 3,
            Self::Summary | Self::Skills | Self::Projects => 2,
            Self::Headline | Self::Education | Self::Certifications => 1,
        }
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(Self::Summary),
            "headline" => Ok(Self::Headline),
            "experience" => Ok(Self::Experience),
            "skills" => Ok(Self::Skills),
            "achievements" => Ok(Self::Achievements),
            "education" => Ok(Self::Education),
            "projects" => Ok(Self::Projects),
            "certifications" => Ok(Self::Certifications),
            _ => Err(format!("Invalid section: {}", s)),
        }
    }
}

/// An unresolved requirement gap from the gap analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementGap {
    pub requirement: String,
    pub criticality: Criticality,
    pub deficit: EvidenceDeficit,
}

/// An evidence item gathered during research, not yet woven into a section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub text: String,
    pub has_metric: bool,
}

/// Everything pass 1 scores against a section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestionInputs {
    #[serde(default)]
    pub gaps: Vec<RequirementGap>,
    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

// ── Suggestions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionIntent {
    AddressRequirement,
    WeaveEvidence,
    IntegrateKeyword,
    QuantifyBullet,
}

impl SuggestionIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddressRequirement => "address_requirement",
            Self::WeaveEvidence => "weave_evidence",
            Self::IntegrateKeyword => "integrate_keyword",
            Self::QuantifyBullet => "quantify_bullet",
        }
    }
}

impl std::fmt::Display for SuggestionIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority tier, derived from the numeric priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    High,
    Medium,
    Low,
}

impl PriorityTier {
    pub fn from_priority(priority: u32) -> Self {
        if priority >= 6 {
            Self::High
        } else if priority >= 3 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Declarative rule for auto-clearing a suggestion when the section text
/// changes, without re-invoking the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ResolvedWhen {
    KeywordPresent { keyword: String },
    TargetReferenced { target: String },
    AlwaysRecheck,
}

impl ResolvedWhen {
    /// Test the rule against new section text.
    pub fn is_resolved(&self, section_text: &str) -> bool {
        let lower = section_text.to_lowercase();
        match self {
            Self::KeywordPresent { keyword } => lower.contains(&keyword.to_lowercase()),
            Self::TargetReferenced { target } => {
                // Referenced if a meaningful portion of the target's words
                // appear in the text.
                let words: Vec<String> = target
                    .to_lowercase()
                    .split_whitespace()
                    .filter(|w| w.len() > 3)
                    .map(String::from)
                    .collect();
                if words.is_empty() {
                    return lower.contains(&target.to_lowercase());
                }
                let hits = words.iter().filter(|w| lower.contains(w.as_str())).count();
                hits * 2 >= words.len()
            }
            Self::AlwaysRecheck => false,
        }
    }
}

/// One ranked edit suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub intent: SuggestionIntent,
    pub target_id: String,
    pub question_text: String,
    pub options: Vec<String>,
    pub priority: u32,
    pub priority_tier: PriorityTier,
    pub resolved_when: ResolvedWhen,
}

/// Stable id for a suggestion: a hash of its semantic target, never random.
pub fn suggestion_id(intent: SuggestionIntent, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(intent.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

// ── Pass 1 ───────────────────────────────────────────────────────────

/// Deterministic pass-1 ranking. Pure and infallible.
pub struct SuggestionEngine {
    cap: usize,
}

impl Default for SuggestionEngine {
    fn default() -> Self {
        Self { cap: 5 }
    }
}

impl SuggestionEngine {
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    /// Score every unresolved gap, unused evidence item, and missing keyword
    /// against the section text; sort descending by priority and cap.
    pub fn rank(
        &self,
        section: SectionKind,
        section_text: &str,
        inputs: &SuggestionInputs,
    ) -> Vec<Suggestion> {
        let relevance = section.relevance_weight();
        let mut suggestions: Vec<Suggestion> = Vec::new();

        for gap in &inputs.gaps {
            let rule = ResolvedWhen::TargetReferenced {
                target: gap.requirement.clone(),
            };
            if rule.is_resolved(section_text) {
                continue;
            }
            let priority = gap.criticality.weight() * gap.deficit.weight() * relevance;
            suggestions.push(Suggestion {
                id: suggestion_id(SuggestionIntent::AddressRequirement, &gap.requirement),
                intent: SuggestionIntent::AddressRequirement,
                target_id: gap.requirement.clone(),
                question_text: format!(
                    "The job asks for \"{}\" — how does your {} back this up?",
                    gap.requirement, section
                ),
                options: vec![
                    "Add a new bullet".to_string(),
                    "Rework an existing bullet".to_string(),
                    "Not applicable".to_string(),
                ],
                priority,
                priority_tier: PriorityTier::from_priority(priority),
                resolved_when: rule,
            });
        }

        for item in &inputs.evidence {
            let rule = ResolvedWhen::TargetReferenced {
                target: item.text.clone(),
            };
            if rule.is_resolved(section_text) {
                continue;
            }
            let deficit = if item.has_metric {
                EvidenceDeficit::Weak
            } else {
                EvidenceDeficit::NoMetric
            };
            let priority = Criticality::NiceToHave.weight() * deficit.weight() * relevance;
            suggestions.push(Suggestion {
                id: suggestion_id(SuggestionIntent::WeaveEvidence, &item.text),
                intent: SuggestionIntent::WeaveEvidence,
                target_id: item.text.clone(),
                question_text: format!(
                    "You mentioned \"{}\" — worth weaving into your {}?",
                    item.text, section
                ),
                options: vec!["Weave it in".to_string(), "Leave it out".to_string()],
                priority,
                priority_tier: PriorityTier::from_priority(priority),
                resolved_when: rule,
            });
        }

        for keyword in &inputs.keywords {
            let rule = ResolvedWhen::KeywordPresent {
                keyword: keyword.clone(),
            };
            if rule.is_resolved(section_text) {
                continue;
            }
            let priority =
                Criticality::Implicit.weight() * EvidenceDeficit::NoEvidence.weight() * relevance;
            suggestions.push(Suggestion {
                id: suggestion_id(SuggestionIntent::IntegrateKeyword, keyword),
                intent: SuggestionIntent::IntegrateKeyword,
                target_id: keyword.clone(),
                question_text: format!("\"{}\" is missing from your {} — add it?", keyword, section),
                options: vec!["Add it".to_string(), "Skip".to_string()],
                priority,
                priority_tier: PriorityTier::from_priority(priority),
                resolved_when: rule,
            });
        }

        for bullet in unquantified_bullets(section_text) {
            let priority =
                Criticality::Implicit.weight() * EvidenceDeficit::NoMetric.weight() * relevance;
            suggestions.push(Suggestion {
                id: suggestion_id(SuggestionIntent::QuantifyBullet, &bullet),
                intent: SuggestionIntent::QuantifyBullet,
                target_id: bullet.clone(),
                question_text: format!("Can you put a number on \"{}\"?", bullet),
                options: vec!["Add a metric".to_string(), "Keep as is".to_string()],
                priority,
                priority_tier: PriorityTier::from_priority(priority),
                resolved_when: ResolvedWhen::AlwaysRecheck,
            });
        }

        // Descending by priority; ties break on id so recomputation yields
        // the same relative order.
        suggestions.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        suggestions.truncate(self.cap);
        suggestions
    }
}

/// Bullet lines in the section text that carry no digits.
fn unquantified_bullets(section_text: &str) -> Vec<String> {
    section_text
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let body = trimmed
                .strip_prefix('-')
                .or_else(|| trimmed.strip_prefix('*'))
                .or_else(|| trimmed.strip_prefix('•'))?;
            let body = body.trim();
            if body.is_empty() || body.chars().any(|c| c.is_ascii_digit()) {
                None
            } else {
                Some(body.to_string())
            }
        })
        .collect()
}
