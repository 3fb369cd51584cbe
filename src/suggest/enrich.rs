//! Pass 2: optional reordering and rewording through an external service.
//!
//! Callers never wait past the configured timeout and never see an error —
//! on any failure the pass-1 list is returned unchanged. A response that
//! drops, invents, or retargets suggestion ids is discarded wholesale: the
//! service may reword and reorder, never change what a suggestion is about.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Suggestion;

/// Configuration for the enrichment service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Service endpoint; enrichment is skipped entirely when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Hard upper bound on the round trip.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    suggestions: &'a [Suggestion],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    suggestions: Vec<RerankItem>,
}

/// One reworded suggestion in service order. Only the wording fields may
/// differ from the original.
#[derive(Debug, Deserialize)]
struct RerankItem {
    id: String,
    #[serde(default)]
    question_text: Option<String>,
    #[serde(default)]
    options: Option<Vec<String>>,
}

/// Pass-2 client.
pub struct SuggestionEnricher {
    client: reqwest::Client,
    config: EnrichmentConfig,
}

impl SuggestionEnricher {
    pub fn new(config: EnrichmentConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Submit the pass-1 list for reranking. Falls back to the input,
    /// unchanged in content and order, on timeout or any error.
    pub async fn enrich(&self, suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
        let Some(endpoint) = self.config.endpoint.clone() else {
            return suggestions;
        };
        if suggestions.is_empty() {
            return suggestions;
        }

        let outcome = tokio::time::timeout(
            self.config.timeout(),
            self.request(&endpoint, &suggestions),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => match apply_rerank(&suggestions, &response.suggestions) {
                Some(enriched) => enriched,
                None => {
                    tracing::debug!("enrichment response altered suggestion ids; discarded");
                    suggestions
                }
            },
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "enrichment request failed; using pass-1 order");
                suggestions
            }
            Err(_) => {
                tracing::debug!(
                    timeout_secs = self.config.timeout_secs,
                    "enrichment timed out; using pass-1 order"
                );
                suggestions
            }
        }
    }

    async fn request(
        &self,
        endpoint: &str,
        suggestions: &[Suggestion],
    ) -> Result<RerankResponse, reqwest::Error> {
        self.client
            .post(endpoint)
            .json(&RerankRequest { suggestions })
            .send()
            .await?
            .error_for_status()?
            .json::<RerankResponse>()
            .await
    }
}

/// Apply a rerank response to the original list. Returns None when the
/// response's id set does not exactly match the original — ids and intents
/// must survive enrichment.
fn apply_rerank(original: &[Suggestion], items: &[RerankItem]) -> Option<Vec<Suggestion>> {
    if items.len() != original.len() {
        return None;
    }
    let by_id: HashMap<&str, &Suggestion> =
        original.iter().map(|s| (s.id.as_str(), s)).collect();
    if by_id.len() != original.len() {
        return None;
    }

    let mut out = Vec::with_capacity(items.len());
    let mut seen: Vec<&str> = Vec::with_capacity(items.len());
    for item in items {
        let base = *by_id.get(item.id.as_str())?;
        if seen.contains(&item.id.as_str()) {
            return None;
        }
        seen.push(item.id.as_str());

        let mut suggestion = base.clone();
        if let Some(text) = &item.question_text {
            suggestion.question_text = text.clone();
        }
        if let Some(options) = &item.options {
            suggestion.options = options.clone();
        }
        out.push(suggestion);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggest::{
        PriorityTier, ResolvedWhen, SuggestionIntent, suggestion_id,
    };

    fn suggestion(target: &str, priority: u32) -> Suggestion {
        Suggestion {
            id: suggestion_id(SuggestionIntent::IntegrateKeyword, target),
            intent: SuggestionIntent::IntegrateKeyword,
            target_id: target.to_string(),
            question_text: format!("Add {}?", target),
            options: vec!["Add it".into(), "Skip".into()],
            priority,
            priority_tier: PriorityTier::from_priority(priority),
            resolved_when: ResolvedWhen::KeywordPresent {
                keyword: target.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_no_endpoint_returns_input_unchanged() {
        let enricher = SuggestionEnricher::new(EnrichmentConfig::default());
        let input = vec![suggestion("terraform", 6), suggestion("ansible", 3)];
        let ids: Vec<String> = input.iter().map(|s| s.id.clone()).collect();
        let out = enricher.enrich(input).await;
        let out_ids: Vec<String> = out.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, out_ids);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_falls_back_to_pass_1() {
        let enricher = SuggestionEnricher::new(EnrichmentConfig {
            endpoint: Some("http://127.0.0.1:1/rerank".into()),
            timeout_secs: 1,
        });
        let input = vec![suggestion("terraform", 6), suggestion("ansible", 3)];
        let expected: Vec<String> = input.iter().map(|s| s.id.clone()).collect();
        let out = enricher.enrich(input).await;
        let got: Vec<String> = out.iter().map(|s| s.id.clone()).collect();
        // Content and order both match pass 1 exactly.
        assert_eq!(expected, got);
    }

    #[test]
    fn test_apply_rerank_reorders_and_rewords() {
        let original = vec![suggestion("terraform", 6), suggestion("ansible", 3)];
        let items = vec![
            RerankItem {
                id: original[1].id.clone(),
                question_text: Some("Terraform's sibling — add Ansible?".into()),
                options: None,
            },
            RerankItem {
                id: original[0].id.clone(),
                question_text: None,
                options: None,
            },
        ];
        let out = apply_rerank(&original, &items).unwrap();
        assert_eq!(out[0].id, original[1].id);
        assert_eq!(out[0].question_text, "Terraform's sibling — add Ansible?");
        // Intent and target survive rewording.
        assert_eq!(out[0].intent, original[1].intent);
        assert_eq!(out[0].target_id, original[1].target_id);
        assert_eq!(out[1].id, original[0].id);
    }

    #[test]
    fn test_apply_rerank_rejects_dropped_ids() {
        let original = vec![suggestion("terraform", 6), suggestion("ansible", 3)];
        let items = vec![RerankItem {
            id: original[0].id.clone(),
            question_text: None,
            options: None,
        }];
        assert!(apply_rerank(&original, &items).is_none());
    }

    #[test]
    fn test_apply_rerank_rejects_invented_ids() {
        let original = vec![suggestion("terraform", 6)];
        let items = vec![RerankItem {
            id: "deadbeefdeadbeef".into(),
            question_text: None,
            options: None,
        }];
        assert!(apply_rerank(&original, &items).is_none());
    }

    #[test]
    fn test_apply_rerank_rejects_duplicate_ids() {
        let original = vec![suggestion("terraform", 6), suggestion("ansible", 3)];
        let items = vec![
            RerankItem {
                id: original[0].id.clone(),
                question_text: None,
                options: None,
            },
            RerankItem {
                id: original[0].id.clone(),
                question_text: None,
                options: None,
            },
        ];
        assert!(apply_rerank(&original, &items).is_none());
    }
}
