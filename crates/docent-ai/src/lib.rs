//! docent-ai: text generation capability
//!
//! A single non-streaming `generate` call over several LLM providers, with
//! per-task model routing, a per-call deadline and retry on transient errors.

pub mod error;
pub mod generator;
pub mod providers;
pub mod retry;
pub mod types;

pub use error::{Error, Result, is_retryable_error};
pub use generator::{Generator, SharedGenerator};
pub use providers::{ProviderSettings, build_generator};
pub use retry::{ResilientGenerator, RetryConfig};
pub use types::{GenerateRequest, ModelSelection, ModelTask, Provider};
