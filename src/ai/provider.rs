//! Chat provider interface consumed by the agent loop.
//!
//! The HTTP client behind this trait is an external collaborator; the core
//! only depends on the exchange shape. Providers that support native tool
//! calling return structured [`ToolCallRef`]s; plain-text providers return
//! an empty list and the loop parses tool calls out of the reply text.

use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse};

/// Result type for provider calls. The error is the provider's own message;
/// the loop wraps it into a `chat_error`.
pub type ProviderResult<T> = Result<T, String>;

/// Callback receiving partial assistant text during a streaming reply.
pub type ChunkSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Complete a chat request and return the full reply.
    async fn chat(&self, request: ChatRequest) -> ProviderResult<ChatResponse>;

    /// Streaming variant: partial text is reported through `on_chunk`; the
    /// full reply is still returned at the end. The default adapter calls
    /// [`chat`](Self::chat) and emits the reply as a single chunk.
    async fn chat_streaming(
        &self,
        request: ChatRequest,
        on_chunk: ChunkSink<'_>,
    ) -> ProviderResult<ChatResponse> {
        let response = self.chat(request).await?;
        if !response.content.is_empty() {
            on_chunk(&response.content);
        }
        Ok(response)
    }

    /// Provider identifier for logs.
    fn name(&self) -> &str;
}
