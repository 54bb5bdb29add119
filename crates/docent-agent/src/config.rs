//! Tunables for the assistant core
//!
//! Every struct deserializes with `#[serde(default)]` so a config file only
//! needs to name the values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Conversation Store limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Messages kept per conversation; older ones are evicted first
    pub max_messages: usize,
    /// Inactivity after which a conversation is removed by the sweep
    pub expiry_hours: u64,
    /// Character budget for the context window handed to the model
    pub context_chars: usize,
}

impl ConversationConfig {
    pub fn expiry(&self) -> Duration {
        hours(self.expiry_hours)
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            expiry_hours: 24,
            context_chars: 2000,
        }
    }
}

/// Whole hours as a duration, saturating for absurd config values
fn hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

/// RAG Orchestrator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Default number of matches per retrieval
    pub top_k: usize,
    /// Results kept after reranking in the advanced strategy
    pub rerank_top_n: usize,
    /// Hits requested from the web search fallback
    pub search_fallback_results: usize,
    /// Matches retrieved per component in the recursive strategy
    pub recursive_component_k: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            rerank_top_n: 3,
            search_fallback_results: 3,
            recursive_component_k: 2,
        }
    }
}

/// Task Engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskEngineConfig {
    /// Plans with more steps are rejected
    pub max_steps: usize,
    /// Ready steps dispatched together in one round
    pub max_concurrent_steps: usize,
    /// Executions allowed per step before it fails permanently
    pub max_retries: u32,
    /// Deadline for a single step execution
    pub step_timeout_secs: u64,
    /// Age after which finished tasks are swept
    pub task_max_age_hours: u64,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_concurrent_steps: 3,
            max_retries: 3,
            step_timeout_secs: 300,
            task_max_age_hours: 24,
        }
    }
}

impl TaskEngineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn task_max_age(&self) -> Duration {
        hours(self.task_max_age_hours)
    }
}

/// Document chunking windows, in words
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// Sampling parameters for one assistant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationProfile {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationProfile {
    pub const fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

/// Generation parameters for the assistants that call the model directly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfiles {
    /// Conversational replies
    pub concierge: GenerationProfile,
    /// Filtered document answers
    pub search: GenerationProfile,
    /// Function-call extraction
    pub function: GenerationProfile,
}

impl Default for AgentProfiles {
    fn default() -> Self {
        Self {
            concierge: GenerationProfile::new(0.2, 1024),
            search: GenerationProfile::new(0.2, 1024),
            function: GenerationProfile::new(0.1, 512),
        }
    }
}

pub const DEFAULT_CONCIERGE_PROMPT: &str = "You are the Docent Concierge, the front desk of a \
document assistant. You answer questions about the user's uploaded documents, help them manage \
files, and break larger requests into steps. Be concise, friendly and accurate. When you do \
not know something, say so instead of guessing.";

/// Concierge behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConciergeConfig {
    /// Messages longer than this are rejected before any model call
    pub max_message_chars: usize,
    /// System prompt for conversational replies
    pub system_prompt: String,
}

impl Default for ConciergeConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 10_000,
            system_prompt: DEFAULT_CONCIERGE_PROMPT.to_string(),
        }
    }
}
