//! CompletionProvider trait definition.
//!
//! The stream manager asks a provider for a full completion and synthesizes
//! incremental chunks from it, so the port only needs a single request/response
//! call.

use courier_types::llm::{CompletionRequest, CompletionResponse, LlmError};

/// Trait for completion backends (echo, OpenAI-compatible APIs).
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
/// Implementations live in courier-infra.
pub trait CompletionProvider: Send + Sync + 'static {
    /// Human-readable provider name (e.g., "echo", "openai").
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    ///
    /// Errors carry their retry class via [`LlmError::class`].
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;
}
