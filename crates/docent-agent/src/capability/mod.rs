//! External capabilities consumed by the assistant
//!
//! Retrieval, internet search and text extraction are reached only through
//! the traits defined here, so tests and deployments can substitute their
//! own backends.

mod extract;
mod memory;
mod search;

pub use extract::{PlainTextExtractor, chunk_words};
pub use memory::{InMemoryStore, query_terms};
pub use search::{DisabledSearch, GoogleSearch};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Free-form chunk metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One ranked retrieval match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedMatch {
    pub content: String,
    pub metadata: Metadata,
    /// Lower is more relevant
    pub distance: f32,
}

impl RetrievedMatch {
    /// The `source` metadata entry, if present
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// Collection size report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub count: usize,
}

/// One web search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Vector (or lexical) similarity store
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    /// Store a chunk and return its id
    async fn store(&self, content: &str, metadata: Metadata) -> Result<String>;

    /// Return up to `k` matches ordered by ascending distance
    async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<RetrievedMatch>>;

    /// Number of stored chunks
    async fn stats(&self) -> Result<CollectionStats>;

    /// Remove every chunk whose metadata contains all `filter` entries
    async fn delete_where(&self, filter: &Metadata) -> Result<usize>;
}

/// Internet search
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;
}

/// Document text extraction
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract plain text from a file
    async fn extract(&self, path: &Path) -> Result<String>;

    /// Split text into overlapping word windows
    fn chunk(&self, text: &str, size: usize, overlap: usize) -> Vec<String> {
        chunk_words(text, size, overlap)
    }
}

pub type SharedStore = Arc<dyn RetrievalStore>;
pub type SharedSearch = Arc<dyn WebSearch>;
pub type SharedExtractor = Arc<dyn TextExtractor>;

/// Check whether `metadata` contains every entry of `filter`
pub fn metadata_matches(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, value)| metadata.get(key) == Some(value))
}
