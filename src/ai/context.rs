//! Context-window management: truncation and summarization.
//!
//! Long conversations are split into a verbatim recent tail and a
//! summarized prefix so the model input stays bounded no matter how long a
//! session runs. The summarizer is pluggable: a model-backed one for
//! quality, a heuristic one for when no provider is available, and a
//! hard-coded placeholder as the last-resort fallback.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ai::provider::ChatProvider;
use crate::ai::types::{ChatRequest, Conversation, Message, Role};
use crate::error::SummarizeError;
use crate::util::truncate_chars;

/// Conversations longer than this get truncated.
pub const DEFAULT_SUMMARY_THRESHOLD: usize = 50;
/// How many trailing messages survive truncation verbatim.
pub const DEFAULT_MAX_FULL_MESSAGES: usize = 20;

/// Per-message cap on the text handed to the model summarizer.
const SUMMARY_INPUT_CHARS: usize = 2000;

/// Rough 4-chars-per-token approximation, for budgeting and UI only.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

pub fn estimate_message_tokens(messages: &[Message]) -> usize {
    // Small per-message overhead for role framing.
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content) + 4)
        .sum()
}

// ─── TruncateResult ───────────────────────────────────────────────────────────

/// Outcome of a truncation pass.
///
/// `summary` and `summary_range` are both set or both absent, and
/// `recent_messages` is always a contiguous tail of the source.
#[derive(Debug, Clone)]
pub struct TruncateResult {
    pub system_prompt: String,
    pub summary: Option<String>,
    /// Half-open index range `[start, end)` of summarized messages.
    pub summary_range: Option<(usize, usize)>,
    pub recent_messages: Vec<Message>,
    pub was_truncated: bool,
    pub tokens_saved: usize,
}

// ─── Summarizer ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizeError>;
}

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize agent conversations. Produce a bullet list of at \
most 300 words capturing: files and paths that were touched, functions and symbols discussed, \
errors encountered and how they were resolved, and decisions made. No preamble, no commentary.";

/// Model-backed summarizer. The reply-size budget is advisory: a model that
/// overruns 500 tokens is accepted as-is; only the prompt input is bounded.
pub struct ModelSummarizer {
    provider: Arc<dyn ChatProvider>,
}

impl ModelSummarizer {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizeError> {
        let transcript: String = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                format!("{role}: {}", truncate_chars(&m.content, SUMMARY_INPUT_CHARS))
            })
            .collect::<Vec<_>>()
            .join("\n");

        let request = ChatRequest::new(vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(format!("Summarize this conversation:\n\n{transcript}")),
        ])
        .with_temperature(0.3)
        .with_max_tokens(500);

        let response = self
            .provider
            .chat(request)
            .await
            .map_err(|reason| SummarizeError { reason })?;

        if response.content.trim().is_empty() {
            return Err(SummarizeError {
                reason: "model returned an empty summary".into(),
            });
        }
        Ok(response.content)
    }
}

/// Heuristic summarizer: message counts plus the first and last user
/// message, no model call.
pub struct HeuristicSummarizer;

#[async_trait]
impl Summarizer for HeuristicSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizeError> {
        let users = messages.iter().filter(|m| m.role == Role::User).count();
        let assistants = messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();

        let mut summary = format!(
            "Earlier conversation: {users} user and {assistants} assistant messages."
        );
        let mut user_texts = messages.iter().filter(|m| m.role == Role::User);
        if let Some(first) = user_texts.next() {
            summary.push_str(&format!(
                "\nFirst request: {}",
                truncate_chars(&first.content, 100)
            ));
        }
        if let Some(last) = messages.iter().rev().find(|m| m.role == Role::User) {
            summary.push_str(&format!(
                "\nMost recent request: {}",
                truncate_chars(&last.content, 100)
            ));
        }
        Ok(summary)
    }
}

// ─── Truncator ────────────────────────────────────────────────────────────────

/// Splits an over-long conversation into summary + verbatim tail.
pub struct Truncator {
    summary_threshold: usize,
    max_full_messages: usize,
    summarizer: Arc<dyn Summarizer>,
}

impl Truncator {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            summary_threshold: DEFAULT_SUMMARY_THRESHOLD,
            max_full_messages: DEFAULT_MAX_FULL_MESSAGES,
            summarizer,
        }
    }

    pub fn with_limits(mut self, summary_threshold: usize, max_full_messages: usize) -> Self {
        self.summary_threshold = summary_threshold;
        self.max_full_messages = max_full_messages;
        self
    }

    /// Truncate `conversation` if it is over the threshold. Summarizer
    /// failure degrades to a placeholder summary rather than failing the
    /// turn.
    pub async fn truncate(&self, conversation: &Conversation) -> TruncateResult {
        let messages = &conversation.messages;
        if messages.len() <= self.summary_threshold {
            return TruncateResult {
                system_prompt: conversation.system_prompt.clone(),
                summary: None,
                summary_range: None,
                recent_messages: messages.clone(),
                was_truncated: false,
                tokens_saved: 0,
            };
        }

        let split = messages.len() - self.max_full_messages;
        let head = &messages[..split];
        let tail = messages[split..].to_vec();

        let summary = match self.summarizer.summarize(head).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "summarizer failed, using placeholder");
                format!("Previous conversation ({} messages)", head.len())
            }
        };

        let head_tokens = estimate_message_tokens(head);
        let tokens_saved = head_tokens.saturating_sub(estimate_tokens(&summary));

        TruncateResult {
            system_prompt: conversation.system_prompt.clone(),
            summary: Some(summary),
            summary_range: Some((0, split)),
            recent_messages: tail,
            was_truncated: true,
            tokens_saved,
        }
    }
}

// ─── Mapping to provider messages ─────────────────────────────────────────────

/// How tool-result messages are handed to the transport. Chat APIs with a
/// native tool role keep `tool_call_id`; others need the result flattened
/// into system content. The transport chooses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageMapping {
    #[default]
    ToolRole,
    FlattenToSystem,
}

/// Render a truncation result into the message list sent to the provider.
pub fn to_provider_messages(result: &TruncateResult, mapping: MessageMapping) -> Vec<Message> {
    let mut out = Vec::with_capacity(result.recent_messages.len() + 2);

    if !result.system_prompt.is_empty() {
        out.push(Message::system(result.system_prompt.clone()));
    }

    if let Some(summary) = &result.summary {
        out.push(Message::system(format!(
            "Previous conversation summary:\n\n{summary}\n\n---\n\nRecent conversation continues below:"
        )));
    }

    for message in &result.recent_messages {
        match (message.role, mapping) {
            (Role::Tool, MessageMapping::FlattenToSystem) => {
                let id = message.tool_call_id.as_deref().unwrap_or("unknown");
                out.push(Message::system(format!(
                    "[tool result {id}]\n{}",
                    message.content
                )));
            }
            _ => out.push(message.clone()),
        }
    }

    out
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation_of(n: usize) -> Conversation {
        let mut conv = Conversation::new("S");
        for i in 0..n {
            conv.push(Message::user(format!("message {i}")));
        }
        conv
    }

    fn truncator() -> Truncator {
        Truncator::new(Arc::new(HeuristicSummarizer)).with_limits(50, 20)
    }

    #[test]
    fn token_estimate_is_quarter_of_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[tokio::test]
    async fn under_threshold_is_untouched() {
        let conv = conversation_of(50);
        let result = truncator().truncate(&conv).await;
        assert!(!result.was_truncated);
        assert!(result.summary.is_none());
        assert!(result.summary_range.is_none());
        assert_eq!(result.recent_messages.len(), 50);
        assert_eq!(result.tokens_saved, 0);
    }

    #[tokio::test]
    async fn over_threshold_splits_at_tail() {
        let conv = conversation_of(120);
        let result = truncator().truncate(&conv).await;
        assert!(result.was_truncated);
        assert_eq!(result.recent_messages.len(), 20);
        assert_eq!(result.summary_range, Some((0, 100)));
        assert!(result.summary.is_some());
        // Tail is contiguous from the source.
        assert_eq!(result.recent_messages[0].content, "message 100");
        assert_eq!(result.recent_messages[19].content, "message 119");
    }

    #[tokio::test]
    async fn summary_and_range_set_together() {
        let conv = conversation_of(51);
        let result = truncator().truncate(&conv).await;
        assert_eq!(result.summary.is_some(), result.summary_range.is_some());
    }

    #[tokio::test]
    async fn heuristic_summary_mentions_first_and_last() {
        let mut conv = Conversation::new("");
        conv.push(Message::user("first question"));
        for _ in 0..5 {
            conv.push(Message::assistant("answer"));
        }
        conv.push(Message::user("final question"));

        let summary = HeuristicSummarizer
            .summarize(&conv.messages)
            .await
            .unwrap();
        assert!(summary.contains("first question"));
        assert!(summary.contains("final question"));
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _messages: &[Message]) -> Result<String, SummarizeError> {
            Err(SummarizeError {
                reason: "boom".into(),
            })
        }
    }

    #[tokio::test]
    async fn summarizer_failure_falls_back_to_placeholder() {
        let conv = conversation_of(60);
        let truncator = Truncator::new(Arc::new(FailingSummarizer)).with_limits(50, 20);
        let result = truncator.truncate(&conv).await;
        assert!(result.was_truncated);
        assert_eq!(
            result.summary.as_deref(),
            Some("Previous conversation (40 messages)")
        );
    }

    #[tokio::test]
    async fn provider_messages_order_and_synthetic_summary() {
        let conv = conversation_of(120);
        let result = truncator().truncate(&conv).await;
        let rendered = to_provider_messages(&result, MessageMapping::ToolRole);

        assert_eq!(rendered[0].role, Role::System);
        assert_eq!(rendered[0].content, "S");
        assert!(rendered[1].content.starts_with("Previous conversation summary:"));
        assert_eq!(rendered.len(), 2 + 20);
    }

    #[tokio::test]
    async fn tool_messages_flatten_when_requested() {
        let mut conv = Conversation::new("");
        conv.push(Message::tool("c1", "tool output"));
        let result = truncator().truncate(&conv).await;

        let native = to_provider_messages(&result, MessageMapping::ToolRole);
        assert_eq!(native[0].role, Role::Tool);
        assert_eq!(native[0].tool_call_id.as_deref(), Some("c1"));

        let flat = to_provider_messages(&result, MessageMapping::FlattenToSystem);
        assert_eq!(flat[0].role, Role::System);
        assert!(flat[0].content.contains("c1"));
        assert!(flat[0].content.contains("tool output"));
    }
}
