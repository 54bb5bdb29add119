use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AgentContext, AgentKind, AgentReply, INVALID_INPUT_MESSAGE, StepAgent};
use crate::capability::Metadata;
use crate::config::{AgentProfiles, GenerationProfile};
use crate::rag::{RagOrchestrator, RagResult, Strategy};

const NAME: &str = "SearchAgent";
const DEFAULT_TOP_K: usize = 5;
const NO_FILTERED_RESULTS: &str = "No results found with the applied filters.";

/// Answers instructions from the document collection
pub struct SearchAgent {
    rag: Arc<RagOrchestrator>,
    profile: GenerationProfile,
}

/// Metadata restrictions for [`SearchAgent::search_with_filters`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Only chunks from this file
    pub source: Option<String>,
    /// Only chunks of this file type, e.g. `md`
    pub file_type: Option<String>,
    /// Matches to retrieve, 5 when unset
    pub top_k: Option<usize>,
}

impl SearchFilters {
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    fn metadata(&self) -> Metadata {
        let mut filter = Metadata::new();
        if let Some(source) = &self.source {
            filter.insert("source".into(), source.clone().into());
        }
        if let Some(file_type) = &self.file_type {
            filter.insert("file_type".into(), file_type.clone().into());
        }
        filter
    }
}

/// Strategy and result count inferred from the instruction wording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SearchParams {
    strategy: Strategy,
    top_k: usize,
}

impl SearchParams {
    fn from_instruction(instruction: &str) -> Self {
        let lower = instruction.to_lowercase();
        let has_word = |w: &str| lower.split(|c: char| !c.is_alphanumeric()).any(|t| t == w);

        let strategy = if lower.contains("detailed") || lower.contains("comprehensive") {
            Strategy::Advanced
        } else if lower.contains("quick") || lower.contains("brief") {
            Strategy::Basic
        } else if lower.contains("complex") || lower.contains("multi-part") {
            Strategy::Recursive
        } else {
            Strategy::Adaptive
        };

        let top_k = if lower.contains("more results") || has_word("all") {
            10
        } else if has_word("few") || has_word("top") {
            3
        } else {
            DEFAULT_TOP_K
        };

        Self { strategy, top_k }
    }
}

impl SearchAgent {
    pub fn new(rag: Arc<RagOrchestrator>) -> Self {
        Self {
            rag,
            profile: AgentProfiles::default().search,
        }
    }

    /// Sampling parameters for filtered answers
    pub fn with_profile(mut self, profile: GenerationProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Search only the chunks matching `filters` and answer from the best three
    pub async fn search_with_filters(&self, query: &str, filters: &SearchFilters) -> AgentReply {
        if query.trim().is_empty() {
            return AgentReply::failure(NAME, INVALID_INPUT_MESSAGE);
        }

        let top_k = filters.top_k.unwrap_or(DEFAULT_TOP_K);
        let outcome = self
            .rag
            .query_filtered(query, top_k, &filters.metadata(), self.profile)
            .await;
        match outcome {
            Ok(Some(result)) => AgentReply::success(NAME, result.text)
                .with_sources(result.sources)
                .with_data(json!({
                    "filters_applied": filters,
                    "results_count": result.results.len(),
                })),
            Ok(None) => AgentReply::success(NAME, NO_FILTERED_RESULTS).with_data(json!({
                "filters_applied": filters,
                "results_count": 0,
            })),
            Err(e) => {
                tracing::error!("filtered search failed: {}", e);
                AgentReply::failure(NAME, format!("Filtered search error: {e}"))
            }
        }
    }

    fn metadata_line(strategy: Strategy, result: &RagResult) -> String {
        let mut parts = vec![
            format!("Search method: {}", strategy.label()),
            format!("Found {} relevant passages", result.results.len()),
        ];
        if !result.sources.is_empty() {
            parts.push(format!("Sources: {}", result.sources.join(", ")));
        }
        parts.join(" | ")
    }
}

#[async_trait]
impl StepAgent for SearchAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Search
    }

    async fn handle_message(&self, instruction: &str, _context: &AgentContext) -> AgentReply {
        if instruction.trim().is_empty() {
            return AgentReply::failure(NAME, INVALID_INPUT_MESSAGE);
        }

        let collection_size = self.rag.collection_size().await;
        if collection_size == 0 {
            return AgentReply::failure(
                NAME,
                "No documents available for search. Please upload some documents first.",
            );
        }

        let params = SearchParams::from_instruction(instruction);
        tracing::debug!(?params, collection_size, "search agent query");
        let result = self.rag.query(instruction, params.top_k, params.strategy).await;

        if result.error {
            return AgentReply::failure(
                NAME,
                format!("Search encountered an error: {}", result.text),
            );
        }

        let text = format!(
            "{}\n\n{}",
            result.text,
            Self::metadata_line(params.strategy, &result)
        );
        AgentReply::success(NAME, text)
            .with_sources(result.sources.clone())
            .with_data(json!({
                "sources": result.sources,
                "workflow_used": result.workflow,
                "results_count": result.results.len(),
                "collection_size": collection_size,
                "refined": result.refined,
            }))
    }
}
