//! Multi-strategy retrieval-augmented generation

mod analysis;
mod orchestrator;

pub use analysis::{QueryProfile, add_citations, merge_results, quality_score, rerank};
pub use orchestrator::RagOrchestrator;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::capability::{RetrievedMatch, SearchHit};

/// Reply when retrieval finds nothing
pub const NO_DOCUMENTS_MESSAGE: &str =
    "I couldn't find any relevant documents to answer your question.";

/// Reply from a search that found nothing usable
pub const NO_INFORMATION_MESSAGE: &str = "No relevant information found";

/// A retrieval and generation recipe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One retrieval, one generation
    #[default]
    Basic,
    /// Query expansion, two retrievals, merge, rerank, cite
    Advanced,
    /// Plan sub-topics, retrieve each, synthesize
    Recursive,
    /// Pick one of the above from the query, score and maybe refine
    Adaptive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Basic => "basic",
            Strategy::Advanced => "advanced",
            Strategy::Recursive => "recursive",
            Strategy::Adaptive => "adaptive",
        }
    }

    /// How the strategy is described to users
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::Basic => "Quick search",
            Strategy::Advanced => "Comprehensive search",
            Strategy::Recursive => "Multi-stage search",
            Strategy::Adaptive => "Smart search",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(Strategy::Basic),
            "advanced" => Ok(Strategy::Advanced),
            "recursive" => Ok(Strategy::Recursive),
            "adaptive" => Ok(Strategy::Adaptive),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Outcome of one orchestrated query. Never an error: failures set `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagResult {
    pub text: String,
    pub sources: Vec<String>,
    pub workflow: Strategy,
    pub results: Vec<RetrievedMatch>,
    pub context_used: bool,
    pub error: bool,
    pub refined: bool,
}

impl RagResult {
    /// Nothing relevant was retrieved
    pub fn no_documents(workflow: Strategy) -> Self {
        Self {
            text: NO_DOCUMENTS_MESSAGE.to_string(),
            sources: Vec::new(),
            workflow,
            results: Vec::new(),
            context_used: false,
            error: false,
            refined: false,
        }
    }

    /// A capability failed along the way
    pub fn failure(workflow: Strategy, message: impl fmt::Display) -> Self {
        Self {
            text: format!("Error processing query: {message}"),
            error: true,
            ..Self::no_documents(workflow)
        }
    }

    /// True when the text is one of the canonical nothing-found replies
    pub fn is_nothing_found(&self) -> bool {
        self.text.contains(NO_DOCUMENTS_MESSAGE) || self.text.contains(NO_INFORMATION_MESSAGE)
    }
}

/// A RAG result plus optional web search results, side by side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackOutcome {
    pub rag: RagResult,
    pub web: Option<Vec<SearchHit>>,
    pub used_fallback: bool,
}
