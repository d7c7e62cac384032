//! Persisted conversation shape.
//!
//! Only the serialized schema and the atomic save/load pair live here; a
//! full session manager is an external collaborator. Field names are
//! wire-stable: renaming one breaks existing session files.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::types::{Conversation, Message, Role};
use crate::util::truncate_chars;

// ─── Stored shapes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_success: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConversation {
    pub id: String,
    pub summary: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<StoredMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentions: Option<Vec<String>>,
}

impl StoredConversation {
    /// Capture a live conversation under a fresh id.
    pub fn from_conversation(conversation: &Conversation, model: &str) -> Self {
        let now = Utc::now();
        let messages = conversation
            .messages
            .iter()
            .map(StoredMessage::from_message)
            .collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            summary: summarize_title(conversation),
            model: model.to_string(),
            created_at: now,
            updated_at: now,
            messages,
            tokens_used: None,
            mentions: None,
        }
    }

    /// Short single-line preview for listings, safe on multi-byte text.
    pub fn preview(&self, max_chars: usize) -> String {
        let source = if self.summary.is_empty() {
            self.messages
                .first()
                .map(|m| m.content.as_str())
                .unwrap_or("")
        } else {
            &self.summary
        };
        truncate_chars(&source.replace('\n', " "), max_chars)
    }
}

impl StoredMessage {
    pub fn from_message(message: &Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: role.to_string(),
            content: message.content.clone(),
            timestamp: message.timestamp,
            token_count: None,
            duration_ms: None,
            tokens_per_sec: None,
            ttft_ms: None,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            is_success: None,
        }
    }
}

/// First user message, clipped, as the default session title.
fn summarize_title(conversation: &Conversation) -> String {
    conversation
        .messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| truncate_chars(&m.content.replace('\n', " "), 80))
        .unwrap_or_default()
}

// ─── Persistence ──────────────────────────────────────────────────────────────

/// Save as UTF-8 JSON via temp file + fsync + rename, so a reader always
/// sees a complete document.
pub fn save_atomic(conversation: &StoredConversation, path: &Path) -> Result<(), String> {
    use std::io::Write;

    let json = serde_json::to_vec_pretty(conversation)
        .map_err(|e| format!("failed to serialize conversation: {e}"))?;

    let parent = path
        .parent()
        .ok_or_else(|| format!("'{}' has no parent directory", path.display()))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| format!("failed to create '{}': {e}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| format!("failed to create temp file: {e}"))?;
    tmp.write_all(&json)
        .map_err(|e| format!("failed to write session: {e}"))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| format!("failed to fsync session: {e}"))?;
    tmp.persist(path)
        .map_err(|e| format!("failed to rename session into place: {e}"))?;
    Ok(())
}

pub fn load(path: &Path) -> Result<StoredConversation, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| format!("failed to parse '{}': {e}", path.display()))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
