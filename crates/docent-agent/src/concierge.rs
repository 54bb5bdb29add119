//! Concierge: the single entry point for a conversational turn

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use docent_ai::{GenerateRequest, ModelTask, SharedGenerator};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agents::INVALID_INPUT_MESSAGE;
use crate::capability::Metadata;
use crate::config::{AgentProfiles, ConciergeConfig, GenerationProfile};
use crate::conversation::{ConversationStore, Role, Turn};
use crate::intent::{Intent, LlmIntentClassifier, SharedClassifier};
use crate::rag::{RagOrchestrator, Strategy};
use crate::task::TaskEngine;

pub const WELCOME_PROMPT: &str = "Welcome! Please tell me your name to get started.";

/// Classification and quick answers see this fraction of the context budget
const SHORT_CONTEXT_DIVISOR: usize = 4;
const SIMPLE_RAG_K: usize = 2;
const SIMPLE_TEMPERATURE: f32 = 0.4;
const META_TEMPERATURE: f32 = 0.3;

const STATS_PHRASES: &[&str] = &[
    "system stats",
    "system statistics",
    "show stats",
    "get stats",
    "system status",
    "show system stats",
    "system info",
];
const TIME_PHRASES: &[&str] = &["what time", "current time", "time is it", "show time"];
const HELP_PHRASES: &[&str] = &["help", "what can you do", "capabilities", "commands"];

const META_SYSTEM_PROMPT: &str = "You are the Docent Concierge. Answer questions about this \
assistant's capabilities, how it works and what it can do. Be helpful and informative.

Key capabilities:
- Document search and retrieval using retrieval-augmented generation
- Conversations with context awareness
- File upload and processing (PDF, DOCX, TXT, MD, CSV)
- Task decomposition and multi-step execution
- Internet search when the documents have no answer";

const SIMPLE_SYSTEM_PROMPT: &str = "You are the Docent Concierge assistant. Give a clear, \
informative answer to the user's question. You can search documents and help with various \
tasks. Be conversational and helpful. If you don't know something, say so honestly.";

const HELP_TEXT: &str = "Docent Help:

I can help you with:
- Searching through uploaded documents
- Answering questions using available knowledge
- Processing and analyzing files
- Breaking larger requests into steps and running them

Commands:
- Upload documents, then ask questions about them
- Ask for system statistics or the current time
- Ask about my capabilities

Just type your question or request naturally!";

/// Reply to one conversational turn. Failures set `error`; there is no error path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub error: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
}

impl Response {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
            error: false,
            timestamp: Utc::now(),
            additional_data: None,
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            error: true,
            ..Self::success(text)
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// Validates, runs the first-contact flow, classifies and routes each message
pub struct Concierge {
    conversations: Arc<ConversationStore>,
    rag: Arc<RagOrchestrator>,
    tasks: Arc<TaskEngine>,
    classifier: SharedClassifier,
    generator: SharedGenerator,
    config: ConciergeConfig,
    profile: GenerationProfile,
}

impl Concierge {
    pub fn new(
        conversations: Arc<ConversationStore>,
        rag: Arc<RagOrchestrator>,
        tasks: Arc<TaskEngine>,
        generator: SharedGenerator,
        config: ConciergeConfig,
    ) -> Self {
        Self {
            conversations,
            rag,
            tasks,
            classifier: Arc::new(LlmIntentClassifier::new(generator.clone())),
            generator,
            config,
            profile: AgentProfiles::default().concierge,
        }
    }

    /// Replace the LLM classifier
    pub fn with_classifier(mut self, classifier: SharedClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_profile(mut self, profile: GenerationProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn rag(&self) -> &Arc<RagOrchestrator> {
        &self.rag
    }

    pub fn tasks(&self) -> &Arc<TaskEngine> {
        &self.tasks
    }

    /// Recent history within the configured character budget, or a quarter
    /// of it when `short`
    fn context(&self, session_id: &str, short: bool) -> String {
        let budget = self.conversations.config().context_chars;
        let budget = if short {
            budget / SHORT_CONTEXT_DIVISOR
        } else {
            budget
        };
        self.conversations.context_window(session_id, budget)
    }

    /// Handle one user message for `session_id`
    pub async fn handle(&self, message: &str, session_id: &str) -> Response {
        let message = message.trim();
        if message.is_empty() {
            return Response::failure(INVALID_INPUT_MESSAGE);
        }
        let length = message.chars().count();
        if length > self.config.max_message_chars {
            tracing::debug!(length, "rejected oversized message");
            return Response::failure(format!(
                "Invalid input: message is {length} characters long, the limit is {}.",
                self.config.max_message_chars
            ));
        }

        match self.conversations.begin_turn(session_id, WELCOME_PROMPT) {
            Turn::Welcome => return Response::success(WELCOME_PROMPT),
            Turn::Introduction => return self.register_user(message, session_id).await,
            Turn::Message => {}
        }

        self.conversations
            .append_message(session_id, Role::User, message, Vec::new());

        let context = self.context(session_id, true);
        let intent = self.classifier.classify(message, &context).await;

        let response = match intent {
            Intent::DocumentSearch => self.document_search(message).await,
            Intent::TaskRequest => self.task_request(message, session_id).await,
            Intent::Meta => self.meta_query(message).await,
            Intent::SimpleQuery => self.simple_query(message, session_id).await,
            Intent::Clarification | Intent::Feedback => {
                self.direct_response(message, session_id).await
            }
        };

        self.conversations.append_message(
            session_id,
            Role::Assistant,
            &response.text,
            response.sources.clone(),
        );
        response
    }

    /// Record `name` as the user's name for a session that was just activated
    async fn register_user(&self, name: &str, session_id: &str) -> Response {
        let user_id = format!("{name}-{}", Local::now().format("%Y%m%d%H%M%S"));
        self.conversations.set_user_info(session_id, "user_id", &user_id);
        self.conversations.set_user_info(session_id, "username", name);

        let mut metadata = Metadata::new();
        metadata.insert("user_id".into(), user_id.clone().into());
        metadata.insert("username".into(), name.into());
        metadata.insert("session_id".into(), session_id.into());
        metadata.insert("type".into(), "session_start".into());
        let record = format!("User {name} started session with user_id {user_id}.");
        if let Err(e) = self.rag.store().store(&record, metadata).await {
            tracing::warn!(session_id, "failed to store session provenance: {}", e);
        }

        self.conversations
            .append_message(session_id, Role::User, name, Vec::new());
        let greeting = format!("Hello {name}! How can I assist you today?");
        self.conversations
            .append_message(session_id, Role::Assistant, &greeting, Vec::new());
        tracing::info!(session_id, %user_id, "session started");
        Response::success(greeting)
    }

    async fn document_search(&self, message: &str) -> Response {
        let outcome = self
            .rag
            .query_with_fallback(message, self.rag.config().top_k, Strategy::Adaptive, false)
            .await;
        let rag = outcome.rag;
        if rag.error && outcome.web.is_none() {
            return Response::failure("Error searching documents");
        }

        let mut text = rag.text;
        let mut data = json!({
            "workflow": rag.workflow,
            "refined": rag.refined,
            "context_used": rag.context_used,
        });
        if let Some(hits) = outcome.web.filter(|h| !h.is_empty()) {
            text.push_str("\n\nFrom the web:");
            for (i, hit) in hits.iter().enumerate() {
                text.push_str(&format!("\n{}. {} ({})\n   {}", i + 1, hit.title, hit.link, hit.snippet));
            }
            data["web_results"] = json!(hits);
        }
        Response::success(text)
            .with_sources(rag.sources)
            .with_data(data)
    }

    async fn task_request(&self, message: &str, session_id: &str) -> Response {
        match self.tasks.run_task(message, session_id).await {
            Ok(outcome) => Response::success(outcome.final_text).with_data(json!({
                "task_id": outcome.task_id,
                "steps_completed": outcome.steps_completed,
                "total_steps": outcome.total_steps,
                "execution_time": outcome.execution_time.as_secs_f64(),
            })),
            Err(e) => {
                tracing::warn!("task execution failed, answering directly: {}", e);
                self.direct_response(message, session_id).await
            }
        }
    }

    async fn meta_query(&self, message: &str) -> Response {
        let request = GenerateRequest::new(message)
            .system(META_SYSTEM_PROMPT)
            .temperature(META_TEMPERATURE)
            .max_tokens(self.profile.max_tokens)
            .task(ModelTask::General);
        match self.generator.generate(&request).await {
            Ok(text) => Response::success(text),
            Err(e) => {
                tracing::warn!("meta query failed: {}", e);
                Response::failure("Error processing system query")
            }
        }
    }

    async fn simple_query(&self, message: &str, session_id: &str) -> Response {
        if let Some(text) = self.direct_function(message).await {
            return Response::success(text);
        }

        if self.rag.collection_size().await > 0 {
            let result = self.rag.query(message, SIMPLE_RAG_K, Strategy::Basic).await;
            if !result.sources.is_empty() && !result.error && !result.is_nothing_found() {
                return Response::success(result.text)
                    .with_sources(result.sources)
                    .with_data(json!({ "context_used": true }));
            }
        }

        let context = self.context(session_id, true);
        let request = GenerateRequest::new(with_context(&context, "Question", message))
            .system(SIMPLE_SYSTEM_PROMPT)
            .temperature(SIMPLE_TEMPERATURE)
            .max_tokens(self.profile.max_tokens)
            .task(ModelTask::General);
        match self.generator.generate(&request).await {
            Ok(text) => Response::success(text),
            Err(e) => {
                tracing::warn!("simple query failed: {}", e);
                Response::failure("Error processing query")
            }
        }
    }

    async fn direct_response(&self, message: &str, session_id: &str) -> Response {
        let context = self.context(session_id, false);
        let request = GenerateRequest::new(with_context(&context, "User", message))
            .system(self.config.system_prompt.clone())
            .temperature(self.profile.temperature)
            .max_tokens(self.profile.max_tokens)
            .task(ModelTask::General);
        match self.generator.generate(&request).await {
            Ok(text) => Response::success(text),
            Err(e) => {
                tracing::warn!("direct response failed: {}", e);
                Response::failure(
                    "I'm sorry, I couldn't generate a response right now. Please try again.",
                )
            }
        }
    }

    /// Deterministic answers for time, stats and help requests
    async fn direct_function(&self, message: &str) -> Option<String> {
        let lower = message.to_lowercase();
        let mentions = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

        if mentions(STATS_PHRASES) {
            Some(self.system_stats().await)
        } else if mentions(TIME_PHRASES) {
            Some(format!(
                "Current time: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            ))
        } else if mentions(HELP_PHRASES) {
            Some(HELP_TEXT.to_string())
        } else {
            None
        }
    }

    /// Collection, conversation and task counts
    pub async fn system_stats(&self) -> String {
        let chunks = self.rag.collection_size().await;
        let conversations = self.conversations.stats();
        let (tasks, active_tasks) = self.tasks.counts();
        format!(
            "System Statistics:\n\n\
             Documents: {chunks} chunks indexed\n\
             Active Conversations: {}\n\
             Total Messages: {}\n\
             Average Messages per Conversation: {}\n\
             Tasks: {tasks} ({active_tasks} running)",
            conversations.total_conversations,
            conversations.total_messages,
            conversations.average_messages_per_conversation,
        )
    }
}

fn with_context(context: &str, label: &str, message: &str) -> String {
    if context.is_empty() {
        message.to_string()
    } else {
        format!("Conversation context:\n{context}\n\n{label}: {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::agents::{AgentKind, AgentRegistry};
    use crate::capability::{InMemoryStore, RetrievalStore, SharedStore};
    use crate::config::{ConversationConfig, RagConfig, TaskEngineConfig};
    use crate::conversation::ConversationState;
    use crate::intent::IntentClassifier;
    use crate::rag::NO_DOCUMENTS_MESSAGE;
    use crate::test_support::{BrokenStore, FlakyAgent, RecordingSearch, ScriptedGenerator};

    struct FixedIntent(Intent);

    #[async_trait]
    impl IntentClassifier for FixedIntent {
        async fn classify(&self, _message: &str, _context: &str) -> Intent {
            self.0
        }
    }

    const PLAN: &str = r#"{"task_analysis": "one lookup", "steps": [
        {"step_number": 1, "instruction": "Find our refund policy",
         "suggested_agent_type": "SearchAgent", "dependencies": []}]}"#;

    fn generator() -> Arc<ScriptedGenerator> {
        ScriptedGenerator::new(|req| {
            let system = req.system_prompt.as_deref().unwrap_or_default();
            if req.prompt.starts_with("Task to decompose") {
                Ok(PLAN.to_string())
            } else if system.starts_with("You are a result synthesis") {
                Ok("Refunds are issued within 30 days.".to_string())
            } else if system.starts_with("You are the Docent Concierge. Answer questions") {
                Ok("I search documents and run tasks.".to_string())
            } else {
                Ok(format!("generated: {}", req.prompt))
            }
        })
    }

    fn concierge_with(
        store: SharedStore,
        generator: Arc<ScriptedGenerator>,
        intent: Intent,
    ) -> Concierge {
        concierge_with_history(store, generator, intent, ConversationConfig::default())
    }

    fn concierge_with_history(
        store: SharedStore,
        generator: Arc<ScriptedGenerator>,
        intent: Intent,
        history: ConversationConfig,
    ) -> Concierge {
        let rag = Arc::new(RagOrchestrator::new(
            store,
            generator.clone(),
            Arc::new(RecordingSearch::default()),
            RagConfig::default(),
        ));
        let agents = AgentRegistry::new(
            FlakyAgent::new(AgentKind::Search, 0),
            FlakyAgent::new(AgentKind::File, 0),
            FlakyAgent::new(AgentKind::Function, 0),
            FlakyAgent::new(AgentKind::Multimedia, 0),
        );
        let tasks = Arc::new(TaskEngine::new(
            generator.clone(),
            agents,
            TaskEngineConfig::default(),
        ));
        Concierge::new(
            Arc::new(ConversationStore::new(history)),
            rag,
            tasks,
            generator,
            ConciergeConfig::default(),
        )
        .with_classifier(Arc::new(FixedIntent(intent)))
    }

    /// Run the first-contact exchange so the session is active
    async fn activate(concierge: &Concierge, session: &str) {
        concierge.handle("hello", session).await;
        concierge.handle("Ada", session).await;
    }

    #[tokio::test]
    async fn test_first_contact_flow() {
        let store = Arc::new(InMemoryStore::new());
        let concierge = concierge_with(store.clone(), generator(), Intent::SimpleQuery);

        let first = concierge.handle("What is our refund policy?", "s1").await;
        assert_eq!(first.text, WELCOME_PROMPT);
        assert!(!first.error);
        let conv = concierge.conversations().get("s1").unwrap();
        assert_eq!(conv.state, ConversationState::AwaitingUsername);

        let second = concierge.handle("Ada", "s1").await;
        assert_eq!(second.text, "Hello Ada! How can I assist you today?");
        let conv = concierge.conversations().get("s1").unwrap();
        assert_eq!(conv.state, ConversationState::Active);
        assert_eq!(conv.user_info["username"], "Ada");
        assert!(conv.user_info["user_id"].starts_with("Ada-"));
        assert_eq!(conv.user_info["user_id"].len(), "Ada-".len() + 14);

        let provenance = store
            .query("User Ada started session", 1, None)
            .await
            .unwrap();
        assert_eq!(provenance[0].metadata["type"], "session_start");
        assert_eq!(provenance[0].metadata["session_id"], "s1");

        let third = concierge.handle("Tell me a joke", "s1").await;
        assert_ne!(third.text, WELCOME_PROMPT);
        assert!(!third.text.starts_with("Hello"));
        assert_eq!(concierge.conversations().get("s1").unwrap().messages.len(), 5);
    }

    #[tokio::test]
    async fn test_provenance_failure_does_not_block_greeting() {
        let concierge = concierge_with(Arc::new(BrokenStore), generator(), Intent::SimpleQuery);
        concierge.handle("hi", "s1").await;
        let reply = concierge.handle("Grace", "s1").await;
        assert_eq!(reply.text, "Hello Grace! How can I assist you today?");
        assert!(!reply.error);
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized_input() {
        let generator = generator();
        let concierge = concierge_with(
            Arc::new(InMemoryStore::new()),
            generator.clone(),
            Intent::SimpleQuery,
        );

        let empty = concierge.handle("   ", "s1").await;
        assert!(empty.error);
        assert_eq!(empty.text, INVALID_INPUT_MESSAGE);

        let oversized = concierge.handle(&"x".repeat(10_001), "s1").await;
        assert!(oversized.error);
        assert!(oversized.text.contains("10000"));
        assert_eq!(generator.call_count(), 0);
        assert!(concierge.conversations().get("s1").is_none());
    }

    #[tokio::test]
    async fn test_simple_query_direct_functions() {
        let generator = generator();
        let concierge = concierge_with(
            Arc::new(InMemoryStore::new()),
            generator.clone(),
            Intent::SimpleQuery,
        );
        activate(&concierge, "s1").await;

        let time = concierge.handle("What time is it?", "s1").await;
        assert!(time.text.starts_with("Current time: "));

        let stats = concierge.handle("show stats please", "s1").await;
        assert!(stats.text.starts_with("System Statistics:"));
        assert!(stats.text.contains("Documents: 1 chunks indexed"));
        assert!(stats.text.contains("Active Conversations: 1"));

        let help = concierge.handle("help", "s1").await;
        assert!(help.text.starts_with("Docent Help:"));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_simple_query_falls_back_to_conversation() {
        let generator = generator();
        let concierge = concierge_with(
            Arc::new(InMemoryStore::new()),
            generator.clone(),
            Intent::SimpleQuery,
        );
        activate(&concierge, "s1").await;

        let reply = concierge.handle("Tell me about penguins", "s1").await;
        assert!(reply.text.starts_with("generated: "));
        let calls = generator.calls.lock();
        let last = calls.last().unwrap();
        assert_eq!(last.temperature, 0.4);
        assert!(last.prompt.ends_with("Question: Tell me about penguins"));
    }

    #[tokio::test]
    async fn test_simple_query_uses_documents_when_relevant() {
        let store = crate::test_support::seeded_store(&[(
            "handbook.md",
            "penguins live in the southern hemisphere",
        )])
        .await;
        let concierge = concierge_with(store, generator(), Intent::SimpleQuery);
        activate(&concierge, "s1").await;

        let reply = concierge.handle("where do penguins live", "s1").await;
        assert_eq!(reply.sources, vec!["handbook.md".to_string()]);
        assert_eq!(reply.additional_data.unwrap()["context_used"], true);
    }

    #[tokio::test]
    async fn test_document_search_route() {
        let store = crate::test_support::seeded_store(&[(
            "policy.txt",
            "refund policy: refunds within 30 days",
        )])
        .await;
        let concierge = concierge_with(store, generator(), Intent::DocumentSearch);
        activate(&concierge, "s1").await;

        let reply = concierge.handle("refund policy", "s1").await;
        assert!(!reply.error);
        assert!(reply.sources.contains(&"policy.txt".to_string()));
        let data = reply.additional_data.unwrap();
        assert!(data.get("workflow").is_some());
        assert!(data.get("refined").is_some());
    }

    #[tokio::test]
    async fn test_document_search_attaches_web_results_when_nothing_found() {
        let concierge = concierge_with(
            Arc::new(InMemoryStore::new()),
            generator(),
            Intent::DocumentSearch,
        );
        activate(&concierge, "s1").await;

        let reply = concierge.handle("quantum chromodynamics", "s1").await;
        assert!(reply.text.contains(NO_DOCUMENTS_MESSAGE));
        assert!(reply.text.contains("From the web:"));
        let data = reply.additional_data.unwrap();
        assert_eq!(data["web_results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_task_request_route() {
        let concierge = concierge_with(
            Arc::new(InMemoryStore::new()),
            generator(),
            Intent::TaskRequest,
        );
        activate(&concierge, "s1").await;

        let reply = concierge
            .handle("Find our refund policy and summarize it in two sentences", "s1")
            .await;
        assert_eq!(reply.text, "Refunds are issued within 30 days.");
        let data = reply.additional_data.unwrap();
        assert_eq!(data["steps_completed"], 1);
        assert_eq!(data["total_steps"], 1);
        assert!(data.get("task_id").is_some());
        assert_eq!(concierge.tasks().counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_task_request_falls_back_to_direct_response() {
        let generator = ScriptedGenerator::new(|req| {
            if req.prompt.starts_with("Task to decompose") {
                Ok("I would rather not plan this".to_string())
            } else {
                Ok("direct answer".to_string())
            }
        });
        let concierge = concierge_with(
            Arc::new(InMemoryStore::new()),
            generator.clone(),
            Intent::TaskRequest,
        );
        activate(&concierge, "s1").await;

        let reply = concierge.handle("Plan my product launch", "s1").await;
        assert_eq!(reply.text, "direct answer");
        assert!(!reply.error);
        let last = generator.calls.lock().last().cloned().unwrap();
        assert_eq!(
            last.system_prompt.as_deref(),
            Some(crate::config::DEFAULT_CONCIERGE_PROMPT)
        );
    }

    #[tokio::test]
    async fn test_meta_and_feedback_routes() {
        let meta = concierge_with(Arc::new(InMemoryStore::new()), generator(), Intent::Meta);
        activate(&meta, "s1").await;
        let reply = meta.handle("What can this assistant do for me?", "s1").await;
        assert_eq!(reply.text, "I search documents and run tasks.");

        let feedback = concierge_with(
            Arc::new(InMemoryStore::new()),
            generator(),
            Intent::Feedback,
        );
        activate(&feedback, "s1").await;
        let reply = feedback.handle("That was useful, thanks", "s1").await;
        assert!(reply.text.contains("User: That was useful, thanks"));
    }

    #[tokio::test]
    async fn test_context_budget_comes_from_conversation_config() {
        let tight = concierge_with_history(
            Arc::new(InMemoryStore::new()),
            generator(),
            Intent::Feedback,
            ConversationConfig {
                context_chars: 60,
                ..ConversationConfig::default()
            },
        );
        activate(&tight, "s1").await;
        let reply = tight.handle("That was useful, thanks", "s1").await;
        assert!(reply.text.contains("user: That was useful, thanks"));
        assert!(!reply.text.contains("Hello Ada"));

        let roomy = concierge_with(Arc::new(InMemoryStore::new()), generator(), Intent::Feedback);
        activate(&roomy, "s1").await;
        let reply = roomy.handle("That was useful, thanks", "s1").await;
        assert!(reply.text.contains("assistant: Hello Ada! How can I assist you today?"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_soft() {
        let concierge = concierge_with(
            Arc::new(InMemoryStore::new()),
            ScriptedGenerator::failing(),
            Intent::Clarification,
        );
        activate(&concierge, "s1").await;
        let reply = concierge.handle("What did you mean?", "s1").await;
        assert!(reply.error);
        assert!(reply.text.contains("Please try again"));
        let conv = concierge.conversations().get("s1").unwrap();
        assert_eq!(conv.messages.back().unwrap().text, reply.text);
    }
}
