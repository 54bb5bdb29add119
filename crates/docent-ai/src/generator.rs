//! The text generation capability

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::GenerateRequest;

/// Something that turns a prompt into text.
///
/// Implementations must be assumed fallible and slow; callers decide how
/// to degrade when a call fails.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Generate a completion for the request
    async fn generate(&self, request: &GenerateRequest) -> Result<String>;
}

/// Type alias for a shared generator
pub type SharedGenerator = Arc<dyn Generator>;
