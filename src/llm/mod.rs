//! Model provider seams.
//!
//! The RAG engine and the chat loop only talk to models through the two
//! traits defined here, so tests can swap in scripted providers and the
//! Ollama client stays a leaf.

pub mod ollama;
pub mod types;


use async_trait::async_trait;

use crate::Result;
use crate::tools::ToolDefinition;

pub use ollama::{ModelInfo, ModelShow, OllamaClient};
pub use types::{
    AssistantReply, ChatMessage, Generation, GenerationOptions, RequestOptions, Role,
    ToolCallRequest,
};

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Fails with [`crate::RagError::EmbeddingFailure`] when no vector comes back.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Produces text from a prompt or a transcript.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation>;

    /// One conversational turn. `tools` is empty for models that cannot call tools.
    async fn converse(
        &self,
        transcript: &[ChatMessage],
        options: &GenerationOptions,
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply>;
}
