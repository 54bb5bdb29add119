//! Request and provider types

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Known generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    OpenAI,
    Anthropic,
    Groq,
    OpenRouter,
    Ollama,
}

impl Provider {
    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Google => "Google",
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Groq => "Groq",
            Provider::OpenRouter => "OpenRouter",
            Provider::Ollama => "Ollama",
        }
    }

    /// Environment variables checked for this provider's API key, in order
    pub fn api_key_env_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::Google => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            Provider::OpenAI => &["OPENAI_API_KEY"],
            Provider::Anthropic => &["ANTHROPIC_API_KEY"],
            Provider::Groq => &["GROQ_API_KEY"],
            Provider::OpenRouter => &["OPENROUTER_API_KEY"],
            Provider::Ollama => &[],
        }
    }

    /// Whether requests can be made without an API key
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Provider::Ollama)
    }

    /// Default API base URL
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Google => "https://generativelanguage.googleapis.com/v1beta",
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Default model used for general generation
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Google => "gemini-2.0-flash",
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-5-haiku-latest",
            Provider::Groq => "llama-3.3-70b-versatile",
            Provider::OpenRouter => "google/gemini-2.0-flash-001",
            Provider::Ollama => "llama3.2",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_lowercase())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" | "gemini" => Ok(Provider::Google),
            "openai" => Ok(Provider::OpenAI),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "groq" => Ok(Provider::Groq),
            "openrouter" => Ok(Provider::OpenRouter),
            "ollama" => Ok(Provider::Ollama),
            other => Err(Error::InvalidConfig(format!("unknown provider: {other}"))),
        }
    }
}

/// The kind of work a generation call performs.
///
/// Providers may route each kind to a different model, e.g. a cheap
/// model for classification and a stronger one for task planning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    #[default]
    General,
    Reasoning,
    Fast,
    Classification,
    Search,
}

/// Maps each [`ModelTask`] to a concrete model id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSelection {
    /// Model used when no override exists for a task
    pub default: String,
    /// Per-task overrides
    pub overrides: HashMap<ModelTask, String>,
}

impl ModelSelection {
    /// Use one model for every task
    pub fn single(model: impl Into<String>) -> Self {
        Self {
            default: model.into(),
            overrides: HashMap::new(),
        }
    }

    /// Add an override for a task
    pub fn with_override(mut self, task: ModelTask, model: impl Into<String>) -> Self {
        self.overrides.insert(task, model.into());
        self
    }

    /// Resolve the model id for a task
    pub fn model_for(&self, task: ModelTask) -> &str {
        self.overrides
            .get(&task)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}

/// A single text generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// User prompt
    pub prompt: String,
    /// Optional system instruction
    pub system_prompt: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Kind of work, used for model routing
    pub task: ModelTask,
}

impl GenerateRequest {
    /// Create a request with default sampling parameters
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.2,
            max_tokens: 1024,
            task: ModelTask::General,
        }
    }

    /// Set the system prompt
    pub fn system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the maximum number of output tokens
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the model task
    pub fn task(mut self, task: ModelTask) -> Self {
        self.task = task;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str_aliases() {
        assert_eq!("gemini".parse::<Provider>().unwrap(), Provider::Google);
        assert_eq!(" OpenAI ".parse::<Provider>().unwrap(), Provider::OpenAI);
        assert!("nonsense".parse::<Provider>().is_err());
    }

    #[test]
    fn test_model_selection_override() {
        let selection = ModelSelection::single("gemini-2.0-flash")
            .with_override(ModelTask::Reasoning, "gemini-2.5-pro");
        assert_eq!(selection.model_for(ModelTask::Reasoning), "gemini-2.5-pro");
        assert_eq!(selection.model_for(ModelTask::Classification), "gemini-2.0-flash");
    }

    #[test]
    fn test_request_builder() {
        let req = GenerateRequest::new("hi")
            .system("be brief")
            .temperature(0.4)
            .max_tokens(64)
            .task(ModelTask::Fast);
        assert_eq!(req.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(req.temperature, 0.4);
        assert_eq!(req.max_tokens, 64);
        assert_eq!(req.task, ModelTask::Fast);
    }
}
