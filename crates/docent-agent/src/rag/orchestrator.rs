//! The strategy implementations

use docent_ai::{GenerateRequest, ModelTask, SharedGenerator};

use super::analysis::{
    QueryProfile, add_citations, distinct_sources, merge_results, quality_score, rerank,
};
use super::{FallbackOutcome, RagResult, Strategy};
use crate::capability::{Metadata, RetrievedMatch, SearchHit, SharedSearch, SharedStore};
use crate::config::{GenerationProfile, RagConfig};
use crate::error::Result;

const MAX_TOKENS: u32 = 1024;
/// Answers scoring below this are sent back for one refinement pass
const REFINE_THRESHOLD: f32 = 0.8;
/// Matches handed to the model by a filtered query
const FILTERED_CONTEXT_MATCHES: usize = 3;

const BASIC_PROMPT: &str = "You are a helpful assistant that answers questions using only the \
provided context. If the context does not contain the answer, say so.";

const EXPAND_PROMPT: &str = "Expand the following query to include related terms and synonyms \
that would help find relevant documents. Keep the expansion concise and focused. Return only the \
expanded query.";

const ADVANCED_PROMPT: &str = "You are an expert assistant that provides comprehensive answers \
based on provided context. Analyze the context carefully and provide a detailed, well-structured \
response. Include relevant details and cite sources when appropriate.";

const STRUCTURED_PROMPT: &str = "Generate a comprehensive, well-structured response using the \
provided contexts. Organize the information logically and provide a complete answer to the \
question.";

const REFINE_PROMPT: &str = "The following response may need improvement. Refine it to be more \
comprehensive and helpful. Maintain accuracy and add more detail if possible.";

/// One sub-topic of a recursive answer
struct PlanComponent {
    id: &'static str,
    search_query: String,
}

/// Runs retrieval strategies over the retrieval, generation and search capabilities
pub struct RagOrchestrator {
    store: SharedStore,
    generator: SharedGenerator,
    search: SharedSearch,
    config: RagConfig,
}

impl RagOrchestrator {
    pub fn new(
        store: SharedStore,
        generator: SharedGenerator,
        search: SharedSearch,
        config: RagConfig,
    ) -> Self {
        Self {
            store,
            generator,
            search,
            config,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Run `strategy` for `text`. Capability failures become a result with `error` set.
    pub async fn query(&self, text: &str, k: usize, strategy: Strategy) -> RagResult {
        tracing::info!(strategy = %strategy, k, "rag query");
        match strategy {
            Strategy::Adaptive => self.adaptive(text, k).await,
            fixed => self.run_fixed(text, k, fixed).await,
        }
    }

    async fn run_fixed(&self, text: &str, k: usize, strategy: Strategy) -> RagResult {
        let outcome = match strategy {
            Strategy::Advanced => self.advanced(text, k).await,
            Strategy::Recursive => return self.recursive(text, k).await,
            _ => self.basic(text, k).await,
        };
        outcome.unwrap_or_else(|e| {
            tracing::warn!(strategy = %strategy, "rag query failed: {}", e);
            RagResult::failure(strategy, e)
        })
    }

    async fn run_basic(&self, text: &str, k: usize) -> RagResult {
        self.basic(text, k).await.unwrap_or_else(|e| {
            tracing::warn!("basic rag query failed: {}", e);
            RagResult::failure(Strategy::Basic, e)
        })
    }

    /// Run `strategy`, then search the web if asked to or if nothing useful came back
    pub async fn query_with_fallback(
        &self,
        text: &str,
        k: usize,
        strategy: Strategy,
        force: bool,
    ) -> FallbackOutcome {
        let rag = self.query(text, k, strategy).await;
        let no_context = rag.sources.is_empty() && !rag.context_used;
        let used_fallback = force || no_context || rag.is_nothing_found();
        if !used_fallback {
            return FallbackOutcome {
                rag,
                web: None,
                used_fallback,
            };
        }

        tracing::info!(force, no_context, "falling back to internet search");
        let web = match self.search_web(text).await {
            Ok(hits) => Some(hits),
            Err(e) => {
                tracing::warn!("internet search fallback failed: {}", e);
                None
            }
        };
        FallbackOutcome {
            rag,
            web,
            used_fallback,
        }
    }

    /// Web search bounded by the configured fallback count
    pub async fn search_web(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.search
            .search(query, self.config.search_fallback_results)
            .await
    }

    /// Number of stored chunks, 0 when the store cannot be reached
    pub async fn collection_size(&self) -> usize {
        match self.store.stats().await {
            Ok(stats) => stats.count,
            Err(e) => {
                tracing::warn!("collection stats unavailable: {}", e);
                0
            }
        }
    }

    /// Answer from up to `k` matches whose metadata contains every `filter`
    /// entry. `None` when nothing passes the filter.
    pub async fn query_filtered(
        &self,
        text: &str,
        k: usize,
        filter: &Metadata,
        profile: GenerationProfile,
    ) -> Result<Option<RagResult>> {
        tracing::info!(k, filters = filter.len(), "filtered rag query");
        let matches = self.store.query(text, k, Some(filter)).await?;
        if matches.is_empty() {
            return Ok(None);
        }

        let context = &matches[..matches.len().min(FILTERED_CONTEXT_MATCHES)];
        let request = GenerateRequest::new(context_prompt(context, text))
            .system(BASIC_PROMPT)
            .temperature(profile.temperature)
            .max_tokens(profile.max_tokens)
            .task(ModelTask::Search);
        let answer = self.generator.generate(&request).await?;
        Ok(Some(RagResult {
            text: add_citations(&answer, context),
            sources: distinct_sources(context),
            workflow: Strategy::Basic,
            results: matches,
            context_used: true,
            error: false,
            refined: false,
        }))
    }

    async fn generate(&self, prompt: String, system: &str, temperature: f32) -> Result<String> {
        let request = GenerateRequest::new(prompt)
            .system(system)
            .temperature(temperature)
            .max_tokens(MAX_TOKENS)
            .task(ModelTask::Search);
        Ok(self.generator.generate(&request).await?)
    }

    async fn basic(&self, text: &str, k: usize) -> Result<RagResult> {
        let matches = self.store.query(text, k, None).await?;
        if matches.is_empty() {
            return Ok(RagResult::no_documents(Strategy::Basic));
        }

        let answer = self
            .generate(context_prompt(&matches, text), BASIC_PROMPT, 0.1)
            .await?;
        Ok(RagResult {
            text: add_citations(&answer, &matches),
            sources: distinct_sources(&matches),
            workflow: Strategy::Basic,
            results: matches,
            context_used: true,
            error: false,
            refined: false,
        })
    }

    async fn expand_query(&self, text: &str) -> String {
        match self.generate(text.to_string(), EXPAND_PROMPT, 0.3).await {
            Ok(expanded) if !expanded.trim().is_empty() => expanded.trim().to_string(),
            Ok(_) => text.to_string(),
            Err(e) => {
                tracing::warn!("query expansion failed, using original query: {}", e);
                text.to_string()
            }
        }
    }

    async fn advanced(&self, text: &str, k: usize) -> Result<RagResult> {
        let expanded = self.expand_query(text).await;
        tracing::debug!(expanded = %expanded, "expanded query");

        let semantic = self.store.query(&expanded, k, None).await?;
        let keyword = self.store.query(text, k, None).await?;
        let top = rerank(merge_results(semantic, keyword), self.config.rerank_top_n);
        if top.is_empty() {
            return Ok(RagResult::no_documents(Strategy::Advanced));
        }

        let answer = self
            .generate(context_prompt(&top, text), ADVANCED_PROMPT, 0.1)
            .await?;
        Ok(RagResult {
            text: add_citations(&answer, &top),
            sources: distinct_sources(&top),
            workflow: Strategy::Advanced,
            results: top,
            context_used: true,
            error: false,
            refined: false,
        })
    }

    fn plan_components(text: &str) -> Vec<PlanComponent> {
        vec![
            PlanComponent {
                id: "main",
                search_query: text.to_string(),
            },
            PlanComponent {
                id: "details",
                search_query: format!("{text} details examples"),
            },
        ]
    }

    /// Falls back to basic when the initial retrieval is empty or anything fails
    async fn recursive(&self, text: &str, k: usize) -> RagResult {
        match self.recursive_inner(text, k).await {
            Ok(Some(result)) => result,
            Ok(None) => self.run_basic(text, k).await,
            Err(e) => {
                tracing::warn!("recursive strategy failed, falling back to basic: {}", e);
                self.run_basic(text, k).await
            }
        }
    }

    async fn recursive_inner(&self, text: &str, k: usize) -> Result<Option<RagResult>> {
        let initial = self.store.query(text, k, None).await?;
        if initial.is_empty() {
            return Ok(None);
        }

        let mut contexts = Vec::new();
        let mut results: Vec<RetrievedMatch> = Vec::new();
        for component in Self::plan_components(text) {
            let hits = self
                .store
                .query(&component.search_query, self.config.recursive_component_k, None)
                .await?;
            if hits.is_empty() {
                continue;
            }
            contexts.push(join_contents(&hits));
            results.extend(hits.into_iter().map(|mut m| {
                m.metadata
                    .insert("component".to_string(), component.id.into());
                m
            }));
        }
        if results.is_empty() {
            return Ok(None);
        }

        let prompt = format!("Context:\n{}\n\nQuestion: {text}", contexts.join("\n\n"));
        let answer = self.generate(prompt, STRUCTURED_PROMPT, 0.2).await?;
        Ok(Some(RagResult {
            text: answer,
            sources: distinct_sources(&results),
            workflow: Strategy::Recursive,
            results,
            context_used: true,
            error: false,
            refined: false,
        }))
    }

    async fn adaptive(&self, text: &str, k: usize) -> RagResult {
        let profile = QueryProfile::analyze(text);
        let chosen = if profile.is_simple_factual {
            Strategy::Basic
        } else if profile.is_multi_part {
            Strategy::Recursive
        } else {
            Strategy::Advanced
        };
        tracing::debug!(?profile, chosen = %chosen, "adaptive strategy selection");

        let mut result = self.run_fixed(text, k, chosen).await;
        let score = quality_score(&result);
        if score < REFINE_THRESHOLD && !result.error {
            let prompt = format!("Original query: {text}\nOriginal response: {}", result.text);
            match self.generate(prompt, REFINE_PROMPT, 0.3).await {
                Ok(refined) => {
                    result.text = refined;
                    result.refined = true;
                }
                Err(e) => tracing::warn!(score, "refinement failed, keeping initial answer: {}", e),
            }
        }
        result.workflow = Strategy::Adaptive;
        result
    }
}

fn join_contents(matches: &[RetrievedMatch]) -> String {
    matches
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn context_prompt(matches: &[RetrievedMatch], question: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {question}", join_contents(matches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::capability::InMemoryStore;
    use crate::rag::NO_DOCUMENTS_MESSAGE;
    use crate::test_support::{BrokenStore, RecordingSearch, ScriptedGenerator, seeded_store};

    const DOCS: &[(&str, &str)] = &[
        ("policy.md", "Refund policy: refunds are issued within 30 days of purchase."),
        ("faq.md", "Refund requests need an order number and receipt details."),
        ("shipping.md", "Orders ship within five business days."),
    ];

    fn orchestrator(
        store: SharedStore,
        generator: Arc<ScriptedGenerator>,
        search: Arc<RecordingSearch>,
    ) -> RagOrchestrator {
        RagOrchestrator::new(store, generator, search, RagConfig::default())
    }

    #[tokio::test]
    async fn test_basic_empty_collection_returns_fixed_text() {
        let generator = ScriptedGenerator::fixed("unused");
        let rag = orchestrator(
            Arc::new(InMemoryStore::new()),
            generator.clone(),
            Arc::default(),
        );

        let result = rag.query("asdkfjasldkfj", 3, Strategy::Basic).await;
        assert!(!result.error);
        assert!(result.sources.is_empty());
        assert_eq!(result.text, NO_DOCUMENTS_MESSAGE);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_basic_generates_with_context_and_citations() {
        let generator = ScriptedGenerator::fixed("Refunds take 30 days.");
        let rag = orchestrator(seeded_store(DOCS).await, generator.clone(), Arc::default());

        let result = rag.query("refund policy", 3, Strategy::Basic).await;
        assert!(result.context_used);
        assert_eq!(result.sources, vec!["policy.md", "faq.md"]);
        assert!(result.text.starts_with("Refunds take 30 days."));
        assert!(result.text.ends_with("Sources: policy.md, faq.md"));

        let calls = generator.calls.lock();
        assert_eq!(calls[0].temperature, 0.1);
        assert!(calls[0].prompt.contains("Question: refund policy"));
        assert!(calls[0].prompt.contains("issued within 30 days"));
    }

    #[tokio::test]
    async fn test_store_failure_is_soft() {
        let rag = orchestrator(
            Arc::new(BrokenStore),
            ScriptedGenerator::fixed("x"),
            Arc::default(),
        );
        let result = rag.query("anything", 3, Strategy::Advanced).await;
        assert!(result.error);
        assert!(result.text.contains("store offline"));
        assert_eq!(result.workflow, Strategy::Advanced);
    }

    #[tokio::test]
    async fn test_advanced_merges_without_duplicates() {
        // Expansion echoes the query so both retrievals return the same chunks
        let generator = ScriptedGenerator::new(|req| {
            if req.temperature == 0.3 {
                Ok("refund".to_string())
            } else {
                Ok("Comprehensive answer".to_string())
            }
        });
        let rag = orchestrator(seeded_store(DOCS).await, generator.clone(), Arc::default());

        let result = rag.query("refund", 5, Strategy::Advanced).await;
        assert_eq!(result.workflow, Strategy::Advanced);
        assert_eq!(result.results.len(), 2);
        let mut contents: Vec<_> = result.results.iter().map(|r| &r.content).collect();
        contents.dedup();
        assert_eq!(contents.len(), 2);
        assert!(result.text.contains("Sources:"));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_advanced_survives_expansion_failure() {
        let generator = ScriptedGenerator::new(|req| {
            if req.temperature == 0.3 {
                Err(docent_ai::Error::Timeout(std::time::Duration::from_secs(1)))
            } else {
                Ok("answer".to_string())
            }
        });
        let rag = orchestrator(seeded_store(DOCS).await, generator, Arc::default());
        let result = rag.query("shipping orders", 3, Strategy::Advanced).await;
        assert!(!result.error);
        assert_eq!(result.sources, vec!["shipping.md"]);
    }

    #[tokio::test]
    async fn test_recursive_tags_components() {
        let generator = ScriptedGenerator::fixed("Structured answer");
        let rag = orchestrator(seeded_store(DOCS).await, generator.clone(), Arc::default());

        let result = rag.query("refund", 3, Strategy::Recursive).await;
        assert_eq!(result.workflow, Strategy::Recursive);
        assert_eq!(result.text, "Structured answer");
        assert!(result.results.iter().any(|r| r.metadata["component"] == "main"));
        assert!(result.results.iter().any(|r| r.metadata["component"] == "details"));
        assert_eq!(generator.calls.lock()[0].temperature, 0.2);
    }

    #[tokio::test]
    async fn test_recursive_falls_back_to_basic_when_empty() {
        let rag = orchestrator(
            Arc::new(InMemoryStore::new()),
            ScriptedGenerator::fixed("x"),
            Arc::default(),
        );
        let result = rag.query("refund", 3, Strategy::Recursive).await;
        assert_eq!(result.workflow, Strategy::Basic);
        assert_eq!(result.text, NO_DOCUMENTS_MESSAGE);
    }

    #[tokio::test]
    async fn test_adaptive_keeps_good_answer() {
        let generator = ScriptedGenerator::fixed("Refunds are issued within 30 days.");
        let rag = orchestrator(seeded_store(DOCS).await, generator.clone(), Arc::default());

        let result = rag.query("What is the refund policy", 3, Strategy::Adaptive).await;
        assert_eq!(result.workflow, Strategy::Adaptive);
        assert!(!result.refined);
        // Simple factual query runs basic: one generation, no refinement
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_adaptive_refines_weak_answer() {
        let generator = ScriptedGenerator::new(|req| {
            if req.prompt.starts_with("Original query:") {
                Ok("A refined, fuller answer".to_string())
            } else {
                Ok("unused".to_string())
            }
        });
        let rag = orchestrator(seeded_store(DOCS).await, generator.clone(), Arc::default());

        // Nothing matches, so the basic answer is the no-documents text (score 0.4)
        let weak = rag.query("When is the zzz", 3, Strategy::Adaptive).await;
        assert!(weak.refined);
        assert_eq!(weak.text, "A refined, fuller answer");
        assert_eq!(weak.workflow, Strategy::Adaptive);
        assert!(weak.sources.is_empty());
        assert_eq!(generator.call_count(), 1);
        assert_eq!(generator.calls.lock()[0].temperature, 0.3);
    }

    #[tokio::test]
    async fn test_adaptive_does_not_refine_errors() {
        let generator = ScriptedGenerator::fixed("unused");
        let rag = orchestrator(Arc::new(BrokenStore), generator.clone(), Arc::default());

        let result = rag.query("When is the sale", 3, Strategy::Adaptive).await;
        assert!(result.error);
        assert!(!result.refined);
        assert_eq!(result.workflow, Strategy::Adaptive);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_fires_when_nothing_found() {
        let search = Arc::new(RecordingSearch::default());
        let rag = orchestrator(
            Arc::new(InMemoryStore::new()),
            ScriptedGenerator::fixed("x"),
            search.clone(),
        );

        let outcome = rag.query_with_fallback("rust async", 3, Strategy::Basic, false).await;
        assert!(outcome.used_fallback);
        assert_eq!(outcome.web.as_ref().unwrap().len(), 3);
        assert_eq!(search.queries.lock()[0], ("rust async".to_string(), 3));
    }

    #[tokio::test]
    async fn test_fallback_skipped_when_context_found_unless_forced() {
        let search = Arc::new(RecordingSearch::default());
        let rag = orchestrator(
            seeded_store(DOCS).await,
            ScriptedGenerator::fixed("Refunds within 30 days."),
            search.clone(),
        );

        let outcome = rag.query_with_fallback("refund", 3, Strategy::Basic, false).await;
        assert!(!outcome.used_fallback);
        assert!(outcome.web.is_none());

        let forced = rag.query_with_fallback("refund", 3, Strategy::Basic, true).await;
        assert!(forced.used_fallback);
        assert!(forced.web.is_some());
        assert_eq!(search.queries.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_search_failure_is_logged_not_raised() {
        let search = Arc::new(RecordingSearch {
            fail: true,
            ..Default::default()
        });
        let rag = orchestrator(Arc::new(InMemoryStore::new()), ScriptedGenerator::fixed("x"), search);
        let outcome = rag.query_with_fallback("anything", 3, Strategy::Basic, false).await;
        assert!(outcome.used_fallback);
        assert!(outcome.web.is_none());
        assert!(!outcome.rag.error);
    }

    #[tokio::test]
    async fn test_query_filtered_only_uses_matching_chunks() {
        let generator = ScriptedGenerator::fixed("Bring the order number.");
        let rag = orchestrator(seeded_store(DOCS).await, generator.clone(), Arc::default());
        let mut filter = Metadata::new();
        filter.insert("source".into(), "faq.md".into());

        let result = rag
            .query_filtered("refund", 5, &filter, GenerationProfile::new(0.2, 300))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.sources, vec!["faq.md"]);
        assert_eq!(result.text, "Bring the order number.\n\nSources: faq.md");
        let calls = generator.calls.lock();
        assert_eq!(calls[0].temperature, 0.2);
        assert_eq!(calls[0].max_tokens, 300);
        assert!(!calls[0].prompt.contains("Refund policy"));
        drop(calls);

        filter.insert("source".into(), "missing.md".into());
        let none = rag
            .query_filtered("refund", 5, &filter, GenerationProfile::new(0.2, 300))
            .await
            .unwrap();
        assert!(none.is_none());
        assert_eq!(generator.call_count(), 1);
    }
}
