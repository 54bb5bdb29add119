//! Error types for docent-ai

use std::time::Duration;

use thiserror::Error;

/// Result type alias using docent-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when calling a text generation provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// The provider did not answer within the configured deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::RateLimited { .. } | Error::Timeout(_) => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("overloaded")
                    || et.contains("resource_exhausted")
                    || et.contains("unavailable")
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
                    || msg.contains("quota")
            }
            _ => false,
        }
    }
}

/// Check if an error message describes a transient failure.
///
/// Used for errors that reached us already flattened to text, where the
/// typed check in [`Error::is_retryable`] is not available.
pub fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        return true;
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection") {
        return true;
    }
    if ["500", "502", "503", "504"].iter().any(|code| lower.contains(code)) {
        return true;
    }
    lower.contains("overloaded")
}
