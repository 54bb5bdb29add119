//! In-process lexical retrieval store

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{CollectionStats, Metadata, RetrievalStore, RetrievedMatch, metadata_matches};
use crate::error::Result;

/// Normalise a query into lowercase alphanumeric terms longer than two characters
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .map(str::to_lowercase)
        .filter(|token| token.chars().count() > 2)
        .collect()
}

struct StoredChunk {
    id: String,
    content: String,
    metadata: Metadata,
}

/// Keeps chunks in memory and ranks them by query-term overlap.
///
/// Distance is the fraction of query terms missing from a chunk, so an
/// exact content match (or a chunk containing every term) scores 0.0.
/// Chunks sharing no term with the query are not returned.
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn distance(query: &str, terms: &[String], content: &str) -> Option<f32> {
        if content.trim() == query.trim() {
            return Some(0.0);
        }
        if terms.is_empty() {
            return None;
        }
        let body = content.to_lowercase();
        let matched = terms.iter().filter(|t| body.contains(t.as_str())).count();
        if matched == 0 {
            return None;
        }
        Some(1.0 - matched as f32 / terms.len() as f32)
    }
}

#[async_trait]
impl RetrievalStore for InMemoryStore {
    async fn store(&self, content: &str, metadata: Metadata) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.chunks.write().push(StoredChunk {
            id: id.clone(),
            content: content.to_string(),
            metadata,
        });
        Ok(id)
    }

    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<RetrievedMatch>> {
        let terms = query_terms(text);
        let chunks = self.chunks.read();

        let mut scored: Vec<RetrievedMatch> = chunks
            .iter()
            .filter(|c| filter.is_none_or(|f| metadata_matches(&c.metadata, f)))
            .filter_map(|c| {
                Self::distance(text, &terms, &c.content).map(|distance| RetrievedMatch {
                    content: c.content.clone(),
                    metadata: c.metadata.clone(),
                    distance,
                })
            })
            .collect();

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        tracing::debug!(query = text, hits = scored.len(), "in-memory query");
        Ok(scored)
    }

    async fn stats(&self) -> Result<CollectionStats> {
        Ok(CollectionStats {
            count: self.chunks.read().len(),
        })
    }

    async fn delete_where(&self, filter: &Metadata) -> Result<usize> {
        let mut chunks = self.chunks.write();
        let before = chunks.len();
        chunks.retain(|c| !metadata_matches(&c.metadata, filter));
        let removed = before - chunks.len();
        if removed > 0 {
            tracing::debug!(removed, "deleted chunks");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chunks = self.chunks.read();
        f.debug_struct("InMemoryStore")
            .field("chunks", &chunks.len())
            .field("ids", &chunks.iter().map(|c| c.id.as_str()).collect::<Vec<_>>())
            .finish()
    }
}
