//! Inference provider trait

use async_trait::async_trait;

use crate::error::Result;

/// Trait for a text-in, text-out model service
///
/// Implementations:
/// - `OllamaInference`: local Ollama server
///
/// `invoke` makes a single attempt; retries are the caller's concern.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Send a prompt and return the raw completion text
    async fn invoke(&self, prompt: &str) -> Result<String>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}
