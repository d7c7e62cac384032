//! Model-facing layer: conversation types, the provider trait, and context
//! window management.

pub mod context;
pub mod provider;
pub mod types;

pub use context::{
    HeuristicSummarizer, MessageMapping, ModelSummarizer, Summarizer, TruncateResult, Truncator,
    estimate_tokens, to_provider_messages,
};
pub use provider::{ChatProvider, ChunkSink, ProviderResult};
pub use types::{ChatRequest, ChatResponse, Conversation, Message, Role, ToolCallRef};
