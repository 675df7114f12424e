//! Model backend used by the default agent pipeline.
//!
//! `LlmBackend` is the seam the agent loop calls; `OllamaClient` is the shipped implementation.

mod ollama;

use async_trait::async_trait;

pub use ollama::{
    ChatMessage, ChatResponse, OllamaClient, ToolCall, ToolCallFunction, ToolDefinition,
    ToolFunctionDefinition,
};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model api error: {0}")]
    Api(String),
}

/// A chat-completion backend with optional function calling.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatResponse, LlmError>;
}
