//! OpenAI-compatible Chat Completions provider
//!
//! Also serves Groq, OpenRouter and Ollama, which expose the same API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    generator::Generator,
    types::{GenerateRequest, ModelSelection, Provider},
};

/// OpenAI API client
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    models: ModelSelection,
    label: &'static str,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::for_provider(Provider::OpenAI, Some(api_key.into()))
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(api_key))
    }

    /// Create a client for any provider speaking the chat completions API
    pub fn for_provider(provider: Provider, api_key: Option<String>) -> Self {
        let label = match provider {
            Provider::Groq => "groq",
            Provider::OpenRouter => "openrouter",
            Provider::Ollama => "ollama",
            _ => "openai",
        };
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: provider.default_base_url().to_string(),
            models: ModelSelection::single(provider.default_model()),
            label,
        }
    }

    /// Override the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set model routing
    pub fn with_models(mut self, models: ModelSelection) -> Self {
        self.models = models;
        self
    }

    fn build_request(&self, request: &GenerateRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: self.models.model_for(request.task).to_string(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[async_trait]
impl Generator for OpenAIProvider {
    fn name(&self) -> &str {
        self.label
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let body = self.build_request(request);
        tracing::debug!(model = %body.model, task = ?request.task, "chat completion");

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(Error::RateLimited { retry_after });
        }
        if status.as_u16() == 401 {
            return Err(Error::InvalidApiKey);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ChatErrorResponse>(&text) {
                Ok(body) => Error::api(
                    body.error.error_type.unwrap_or_else(|| status.as_u16().to_string()),
                    body.error.message,
                ),
                Err(_) => Error::api(status.as_u16().to_string(), text),
            });
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::UnexpectedResponse("no content in completion".into()))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: ChatError,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}
