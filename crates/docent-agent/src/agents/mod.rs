//! Specialized agents and their static registry
//!
//! Every agent turns a natural-language instruction into an action and a
//! textual [`AgentReply`]. Agents never return errors: bad input and failed
//! capabilities become failure replies with a readable reason.

mod calc;
mod file;
mod function;
mod multimedia;
mod search;

pub use file::FileAgent;
pub use function::{FunctionAgent, FunctionCall, FunctionName};
pub use multimedia::{MediaCategory, MultimediaAgent};
pub use search::{SearchAgent, SearchFilters};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reply text for empty or whitespace-only instructions
pub const INVALID_INPUT_MESSAGE: &str = "Invalid input: message must be a non-empty string.";

/// The agent types a task step can be assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    #[serde(rename = "SearchAgent")]
    Search,
    #[serde(rename = "FileAgent")]
    File,
    #[serde(rename = "FunctionAgent")]
    Function,
    #[serde(rename = "MultimediaAgent")]
    Multimedia,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Search,
        AgentKind::File,
        AgentKind::Function,
        AgentKind::Multimedia,
    ];

    /// Canonical name, as used in plans
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Search => "SearchAgent",
            AgentKind::File => "FileAgent",
            AgentKind::Function => "FunctionAgent",
            AgentKind::Multimedia => "MultimediaAgent",
        }
    }

    /// One-line capability summary for planning prompts
    pub fn description(&self) -> &'static str {
        match self {
            AgentKind::Search => "searches the uploaded documents and answers from them",
            AgentKind::File => "lists, inspects, ingests, deletes and reports on uploaded files",
            AgentKind::Function => {
                "runs utility functions: calculations, text transforms, UUIDs, encoding, dates"
            }
            AgentKind::Multimedia => "stores and lists image, audio and video uploads",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let stem = normalized.strip_suffix("agent").unwrap_or(&normalized);
        match stem {
            "search" => Ok(AgentKind::Search),
            "file" => Ok(AgentKind::File),
            "function" => Ok(AgentKind::Function),
            "multimedia" | "media" => Ok(AgentKind::Multimedia),
            _ => Err(s.to_string()),
        }
    }
}

/// What an agent knows about the call besides the instruction
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub session_id: Option<String>,
    pub task_id: Option<Uuid>,
    pub step_number: Option<u32>,
    /// Results of the steps this one depends on, by step number
    pub dependency_results: Vec<(u32, String)>,
}

impl AgentContext {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

/// Result of an agent handling one instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub text: String,
    pub success: bool,
    pub error: bool,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<serde_json::Value>,
    pub assistant: String,
    pub timestamp: DateTime<Utc>,
}

impl AgentReply {
    /// Create a successful reply
    pub fn success(assistant: &str, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
            error: false,
            sources: Vec::new(),
            additional_data: None,
            assistant: assistant.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a failure reply
    pub fn failure(assistant: &str, text: impl Into<String>) -> Self {
        Self {
            success: false,
            error: true,
            ..Self::success(assistant, text)
        }
    }

    /// Attach source identifiers
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Attach structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// Trait for step-executing agents
#[async_trait]
pub trait StepAgent: Send + Sync {
    /// Which slot of the registry this agent fills
    fn kind(&self) -> AgentKind;

    /// Handle one instruction
    async fn handle_message(&self, instruction: &str, context: &AgentContext) -> AgentReply;
}

/// Type alias for a shared agent
pub type SharedAgent = Arc<dyn StepAgent>;

/// One agent per [`AgentKind`], fixed at construction
#[derive(Clone)]
pub struct AgentRegistry {
    search: SharedAgent,
    file: SharedAgent,
    function: SharedAgent,
    multimedia: SharedAgent,
}

impl AgentRegistry {
    pub fn new(
        search: SharedAgent,
        file: SharedAgent,
        function: SharedAgent,
        multimedia: SharedAgent,
    ) -> Self {
        Self {
            search,
            file,
            function,
            multimedia,
        }
    }

    pub fn get(&self, kind: AgentKind) -> &SharedAgent {
        match kind {
            AgentKind::Search => &self.search,
            AgentKind::File => &self.file,
            AgentKind::Function => &self.function,
            AgentKind::Multimedia => &self.multimedia,
        }
    }

    /// Swap in a different agent for one kind
    pub fn with_agent(mut self, kind: AgentKind, agent: SharedAgent) -> Self {
        match kind {
            AgentKind::Search => self.search = agent,
            AgentKind::File => self.file = agent,
            AgentKind::Function => self.function = agent,
            AgentKind::Multimedia => self.multimedia = agent,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kind_parses_leniently() {
        assert_eq!("SearchAgent".parse::<AgentKind>(), Ok(AgentKind::Search));
        assert_eq!("search".parse::<AgentKind>(), Ok(AgentKind::Search));
        assert_eq!("file_agent".parse::<AgentKind>(), Ok(AgentKind::File));
        assert_eq!("Multimedia Agent".parse::<AgentKind>(), Ok(AgentKind::Multimedia));
        assert!("WeatherAgent".parse::<AgentKind>().is_err());
    }

    #[test]
    fn test_agent_kind_serde_uses_canonical_names() {
        let json = serde_json::to_string(&AgentKind::Function).unwrap();
        assert_eq!(json, "\"FunctionAgent\"");
        for kind in AgentKind::ALL {
            assert_eq!(kind.name().parse::<AgentKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_reply_builders() {
        let ok = AgentReply::success("SearchAgent", "found")
            .with_sources(vec!["a.md".into()])
            .with_data(serde_json::json!({"k": 1}));
        assert!(ok.success && !ok.error);
        assert_eq!(ok.sources, vec!["a.md"]);

        let bad = AgentReply::failure("FileAgent", "nope");
        assert!(!bad.success && bad.error);
        assert_eq!(bad.assistant, "FileAgent");
    }
}
