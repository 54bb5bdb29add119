//! docent-agent: retrieval orchestration, specialized agents and task execution
//!
//! This crate holds the assistant core. The [`Concierge`] receives every
//! conversational turn, keeps per-session history in the
//! [`ConversationStore`], answers from documents through the
//! [`RagOrchestrator`] and hands multi-step requests to the [`TaskEngine`],
//! which runs them on the specialized agents.

pub mod agents;
pub mod capability;
pub mod concierge;
pub mod config;
pub mod conversation;
pub mod error;
pub mod intent;
pub mod maintenance;
pub mod rag;
pub mod task;

#[cfg(test)]
mod test_support;

pub use agents::{AgentContext, AgentKind, AgentRegistry, AgentReply, SharedAgent, StepAgent};
pub use concierge::{Concierge, Response};
pub use config::{
    AgentProfiles, ChunkConfig, ConciergeConfig, ConversationConfig, GenerationProfile, RagConfig,
    TaskEngineConfig,
};
pub use conversation::{Conversation, ConversationState, ConversationStore, Role, Turn};
pub use error::{Error, PlanError, Result};
pub use intent::{Intent, IntentClassifier, LlmIntentClassifier};
pub use maintenance::{spawn_sweeper, sweep};
pub use rag::{FallbackOutcome, RagOrchestrator, RagResult, Strategy};
pub use task::{TaskEngine, TaskEvent, TaskOutcome, TaskStatus};
