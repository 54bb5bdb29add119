//! Provider implementations

pub mod anthropic;
pub mod google;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::generator::SharedGenerator;
use crate::retry::{ResilientGenerator, RetryConfig};
use crate::types::{ModelSelection, Provider};

/// Everything needed to construct a generator for a provider
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub models: ModelSelection,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl ProviderSettings {
    /// Settings with the provider's default model and no key
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: None,
            models: ModelSelection::single(provider.default_model()),
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }

    /// Look up the API key from the provider's environment variables
    pub fn api_key_from_env(&self) -> Option<String> {
        self.provider
            .api_key_env_vars()
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
    }
}

/// Build a retrying, deadline-bounded generator for the configured provider.
///
/// Fails with [`Error::InvalidApiKey`] when the provider needs a key and
/// none was supplied.
pub fn build_generator(settings: &ProviderSettings) -> Result<SharedGenerator> {
    let api_key = settings.api_key.clone().or_else(|| settings.api_key_from_env());
    if settings.provider.requires_api_key() && api_key.is_none() {
        return Err(Error::InvalidApiKey);
    }
    if settings.models.default.is_empty() {
        return Err(Error::InvalidConfig("no model configured".into()));
    }

    let inner: SharedGenerator = match settings.provider {
        Provider::Google => {
            let mut p = google::GoogleProvider::new(api_key.unwrap_or_default())
                .with_models(settings.models.clone());
            if let Some(url) = &settings.base_url {
                p = p.with_base_url(url.clone());
            }
            Arc::new(p)
        }
        Provider::Anthropic => {
            let mut p = anthropic::AnthropicProvider::new(api_key.unwrap_or_default())
                .with_models(settings.models.clone());
            if let Some(url) = &settings.base_url {
                p = p.with_base_url(url.clone());
            }
            Arc::new(p)
        }
        Provider::OpenAI | Provider::Groq | Provider::OpenRouter | Provider::Ollama => {
            let mut p = openai::OpenAIProvider::for_provider(settings.provider, api_key)
                .with_models(settings.models.clone());
            if let Some(url) = &settings.base_url {
                p = p.with_base_url(url.clone());
            }
            Arc::new(p)
        }
    };

    Ok(Arc::new(
        ResilientGenerator::new(inner)
            .with_retry_config(settings.retry.clone())
            .with_timeout(settings.timeout),
    ))
}
