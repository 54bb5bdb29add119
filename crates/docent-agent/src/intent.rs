//! Classifying what a message asks for

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use docent_ai::{GenerateRequest, ModelTask, SharedGenerator};
use serde::{Deserialize, Serialize};

/// The route a message takes through the concierge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// General knowledge, system functions or a brief reply
    #[default]
    SimpleQuery,
    /// Find information in the uploaded documents
    DocumentSearch,
    /// A multi-step request that needs planning
    TaskRequest,
    Clarification,
    Feedback,
    /// A question about the assistant itself
    Meta,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::SimpleQuery,
        Intent::DocumentSearch,
        Intent::TaskRequest,
        Intent::Clarification,
        Intent::Feedback,
        Intent::Meta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::SimpleQuery => "simple_query",
            Intent::DocumentSearch => "document_search",
            Intent::TaskRequest => "task_request",
            Intent::Clarification => "clarification",
            Intent::Feedback => "feedback",
            Intent::Meta => "meta",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
            .to_lowercase();
        Intent::ALL
            .into_iter()
            .find(|i| i.as_str() == normalized)
            .ok_or_else(|| s.to_string())
    }
}

/// Decides the [`Intent`] of a message. Never fails: unknown means simple query.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, message: &str, context: &str) -> Intent;
}

pub type SharedClassifier = Arc<dyn IntentClassifier>;

const CLASSIFIER_SYSTEM_PROMPT: &str = "Classify the user's message into one of these \
categories, using the conversation context:

- simple_query: a direct question answerable from general knowledge, a system function (time, \
stats, help) or a brief reply
- document_search: a request to find specific information in the uploaded documents
- task_request: a complex request that needs several steps
- clarification: asking for clarification of, or a follow-up to, the previous answer
- feedback: feedback on the previous answer
- meta: a question about this assistant, its capabilities or how it works

Requests such as \"show stats\", \"what time is it\" or \"help\" are simple_query. Respond with \
only the category name.";

/// Classifies with one low-temperature model call
pub struct LlmIntentClassifier {
    generator: SharedGenerator,
}

impl LlmIntentClassifier {
    pub fn new(generator: SharedGenerator) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, message: &str, context: &str) -> Intent {
        let prompt = format!("Conversation context:\n{context}\n\nCurrent message: {message}");
        let request = GenerateRequest::new(prompt)
            .system(CLASSIFIER_SYSTEM_PROMPT)
            .temperature(0.1)
            .max_tokens(20)
            .task(ModelTask::Classification);

        match self.generator.generate(&request).await {
            Ok(raw) => {
                let intent = raw.parse().unwrap_or_else(|_| {
                    tracing::debug!(reply = %raw.trim(), "unrecognized intent, using simple_query");
                    Intent::SimpleQuery
                });
                tracing::info!(%intent, "classified message");
                intent
            }
            Err(e) => {
                tracing::warn!("intent classification failed: {}", e);
                Intent::SimpleQuery
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGenerator;

    #[test]
    fn test_parse_tolerates_noise() {
        assert_eq!("document_search".parse::<Intent>(), Ok(Intent::DocumentSearch));
        assert_eq!(" Task_Request.\n".parse::<Intent>(), Ok(Intent::TaskRequest));
        assert_eq!("\"meta\"".parse::<Intent>(), Ok(Intent::Meta));
        assert!("smalltalk".parse::<Intent>().is_err());
    }

    #[tokio::test]
    async fn test_llm_classifier() {
        let generator = ScriptedGenerator::fixed("task_request");
        let classifier = LlmIntentClassifier::new(generator.clone());
        assert_eq!(classifier.classify("plan my week", "").await, Intent::TaskRequest);

        let request = &generator.calls.lock()[0];
        assert_eq!(request.temperature, 0.1);
        assert_eq!(request.task, ModelTask::Classification);
        assert!(request.prompt.ends_with("Current message: plan my week"));
    }

    #[tokio::test]
    async fn test_defaults_to_simple_query() {
        let unknown = LlmIntentClassifier::new(ScriptedGenerator::fixed("chitchat"));
        assert_eq!(unknown.classify("hi", "").await, Intent::SimpleQuery);

        let failing = LlmIntentClassifier::new(ScriptedGenerator::failing());
        assert_eq!(failing.classify("hi", "").await, Intent::SimpleQuery);
    }
}
