//! Section review bundling.
//!
//! Sections are grouped into fixed bundles reviewed in dependency order:
//! headline → core_experience → supporting. Bundle state is purely derived
//! from section review states — recomputing it from scratch is always
//! possible, and nothing here is independently authoritative.
//!
//! Which sections require manual review, and which may be skipped under the
//! bundled strategy, is a policy input rather than hard-coded: the reference
//! behavior for auto-approval is underspecified, so the criteria live behind
//! the `ReviewPolicy` trait.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::suggest::SectionKind;

/// The fixed review bundles, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleKey {
    Headline,
    CoreExperience,
    Supporting,
}

impl BundleKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Headline => "headline",
            Self::CoreExperience => "core_experience",
            Self::Supporting => "supporting",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Headline => "Headline & Summary",
            Self::CoreExperience => "Core Experience",
            Self::Supporting => "Supporting Sections",
        }
    }

    /// All bundles in review order.
    pub fn all() -> &'static [BundleKey] {
        &[Self::Headline, Self::CoreExperience, Self::Supporting]
    }

    /// The sections belonging to this bundle, in section order.
    pub fn sections(&self) -> &'static [SectionKind] {
        match self {
            Self::Headline => &[SectionKind::Headline, SectionKind::Summary],
            Self::CoreExperience => &[
                SectionKind::Experience,
                SectionKind::Skills,
                SectionKind::Achievements,
            ],
            Self::Supporting => &[
                SectionKind::Education,
                SectionKind::Projects,
                SectionKind::Certifications,
            ],
        }
    }

    /// The bundle a section belongs to.
    pub fn for_section(section: SectionKind) -> BundleKey {
        for key in Self::all() {
            if key.sections().contains(&section) {
                return *key;
            }
        }
        unreachable!("every section belongs to a bundle")
    }
}

impl std::fmt::Display for BundleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "headline" => Ok(Self::Headline),
            "core_experience" => Ok(Self::CoreExperience),
            "supporting" => Ok(Self::Supporting),
            _ => Err(format!("Invalid bundle key: {}", s)),
        }
    }
}

/// Review strategy for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStrategy {
    /// Every required section gets its own gate.
    #[default]
    Sequential,
    /// Required sections gate; non-critical sections may auto-approve.
    Bundled,
}

impl ReviewStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Bundled => "bundled",
        }
    }
}

impl FromStr for ReviewStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "bundled" => Ok(Self::Bundled),
            _ => Err(format!("Invalid review strategy: {}", s)),
        }
    }
}

/// Status of a review bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    Pending,
    InProgress,
    Complete,
    AutoApproved,
}

/// Aggregated view of one bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewBundle {
    pub key: BundleKey,
    pub label: String,
    pub total_sections: usize,
    pub review_required: usize,
    pub reviewed_required: usize,
    pub status: BundleStatus,
}

/// Policy input deciding which sections need manual review and which may be
/// skipped under the bundled strategy.
pub trait ReviewPolicy: Send + Sync {
    fn review_required(&self, section: SectionKind) -> bool;

    /// Whether a non-required section may be auto-approved under the given
    /// strategy.
    fn auto_approves(&self, strategy: ReviewStrategy, section: SectionKind) -> bool {
        strategy == ReviewStrategy::Bundled && !self.review_required(section)
    }
}

/// Default policy: the sections that shape the first read of a resume
/// require review; the long tail does not.
#[derive(Debug, Default)]
pub struct DefaultReviewPolicy;

impl ReviewPolicy for DefaultReviewPolicy {
    fn review_required(&self, section: SectionKind) -> bool {
        matches!(
            section,
            SectionKind::Headline
                | SectionKind::Summary
                | SectionKind::Experience
                | SectionKind::Skills
                | SectionKind::Education
        )
    }
}

/// Aggregates section review state into bundles.
pub struct BundleCoordinator<P: ReviewPolicy = DefaultReviewPolicy> {
    policy: P,
    strategy: ReviewStrategy,
}

impl Default for BundleCoordinator<DefaultReviewPolicy> {
    fn default() -> Self {
        Self::new(DefaultReviewPolicy, ReviewStrategy::default())
    }
}

impl<P: ReviewPolicy> BundleCoordinator<P> {
    pub fn new(policy: P, strategy: ReviewStrategy) -> Self {
        Self { policy, strategy }
    }

    pub fn strategy(&self) -> ReviewStrategy {
        self.strategy
    }

    /// Whether a section needs its own review gate.
    pub fn needs_gate(&self, section: SectionKind) -> bool {
        self.policy.review_required(section)
    }

    /// Recompute every bundle from the set of approved sections.
    pub fn compute(&self, approved: &HashSet<SectionKind>) -> Vec<ReviewBundle> {
        BundleKey::all()
            .iter()
            .map(|key| self.compute_bundle(*key, approved))
            .collect()
    }

    fn compute_bundle(&self, key: BundleKey, approved: &HashSet<SectionKind>) -> ReviewBundle {
        let sections = key.sections();
        let required: Vec<SectionKind> = sections
            .iter()
            .copied()
            .filter(|s| self.policy.review_required(*s))
            .collect();
        let reviewed_required = required.iter().filter(|s| approved.contains(s)).count();

        let status = if required.is_empty() {
            if self.strategy == ReviewStrategy::Bundled {
                BundleStatus::AutoApproved
            } else if sections.iter().all(|s| approved.contains(s)) {
                BundleStatus::Complete
            } else {
                BundleStatus::Pending
            }
        } else if reviewed_required == required.len() {
            BundleStatus::Complete
        } else if reviewed_required > 0 {
            BundleStatus::InProgress
        } else {
            BundleStatus::Pending
        };

        ReviewBundle {
            key,
            label: key.label().to_string(),
            total_sections: sections.len(),
            review_required: required.len(),
            reviewed_required,
            status,
        }
    }

    /// The bundle currently under review: the first, in dependency order,
    /// that is neither complete nor auto-approved.
    pub fn current_bundle(&self, approved: &HashSet<SectionKind>) -> Option<BundleKey> {
        self.compute(approved)
            .into_iter()
            .find(|b| !matches!(b.status, BundleStatus::Complete | BundleStatus::AutoApproved))
            .map(|b| b.key)
    }

    /// Required sections in the bundle still awaiting review, in section
    /// order. "Approve remaining in bundle" walks exactly this list.
    pub fn remaining_required(
        &self,
        key: BundleKey,
        approved: &HashSet<SectionKind>,
    ) -> Vec<SectionKind> {
        key.sections()
            .iter()
            .copied()
            .filter(|s| self.policy.review_required(*s) && !approved.contains(s))
            .collect()
    }

    /// Every section, in bundle order then section order, paired with
    /// whether it requires review. The sections stage iterates this.
    pub fn review_plan(&self) -> Vec<(SectionKind, bool)> {
        BundleKey::all()
            .iter()
            .flat_map(|key| key.sections())
            .map(|s| (*s, self.policy.review_required(*s)))
            .collect()
    }
}
