//! Error types for the agent runtime.
//!
//! Every variant carries a stable `kind()` tag so callers (and tests) can
//! match on failure classes without parsing display strings. Tool-level
//! errors never escape the agent loop as `Err` — they are folded into a
//! failed [`crate::tools::ToolOutcome`] and fed back to the model.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ─── SecurityError ────────────────────────────────────────────────────────────

/// Failures raised by path validation, secure opens, and command vetting.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("failed to resolve path '{path}': {reason}")]
    PathResolution { path: PathBuf, reason: String },

    #[error("path '{path}' resolves outside the allowed roots")]
    PathTraversal { path: PathBuf },

    #[error("path '{path}' is inside a blocked system location")]
    BlockedPath { path: PathBuf },

    #[error("path '{path}' is a shell startup or credential file")]
    BlockedShellFile { path: PathBuf },

    #[error("path '{path}' changed between validation and open")]
    ToctouDetected { path: PathBuf },

    #[error("failed to open '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file '{path}' is {size} bytes, over the {max} byte limit")]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("'{path}' is a directory")]
    IsDirectory { path: PathBuf },

    #[error("'{path}' appears to be a binary file")]
    IsBinary { path: PathBuf },

    #[error("'{path}' matches a sensitive file pattern")]
    SensitiveFile { path: PathBuf },

    #[error("command contains blocked sequence '{pattern}'")]
    CommandBlocked { pattern: String },

    #[error("command matches dangerous pattern '{pattern}'")]
    CommandPattern { pattern: String },

    #[error("command invokes privilege-escalation tool '{token}'")]
    CommandPrivileged { token: String },
}

impl SecurityError {
    /// Stable machine tag for this error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathResolution { .. } => "path_resolution",
            Self::PathTraversal { .. } => "path_traversal",
            Self::BlockedPath { .. } => "blocked_path",
            Self::BlockedShellFile { .. } => "blocked_shell_file",
            Self::ToctouDetected { .. } => "toctou_detected",
            Self::FileOpen { .. } => "file_open",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::IsDirectory { .. } => "is_directory",
            Self::IsBinary { .. } => "is_binary",
            Self::SensitiveFile { .. } => "sensitive_file",
            Self::CommandBlocked { .. } => "command_blocked",
            Self::CommandPattern { .. } => "command_pattern",
            Self::CommandPrivileged { .. } => "command_privileged",
        }
    }
}

// ─── WebError ─────────────────────────────────────────────────────────────────

/// Failures raised by the SSRF guard and the HTTP fetch path.
#[derive(Debug, Error)]
pub enum WebError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("URL scheme '{scheme}' is not allowed (http/https only)")]
    InvalidScheme { scheme: String },

    #[error("address {ip} is in a blocked network range")]
    BlockedIp { ip: std::net::IpAddr },

    #[error("host '{host}' is a blocked metadata or loopback host")]
    BlockedHost { host: String },

    #[error("redirect chain exceeded {max} hops")]
    TooManyRedirects { max: usize },

    #[error("response exceeded the {max} byte limit")]
    ResponseTooLarge { max: usize },

    #[error("DNS re-resolution for '{host}' produced a blocked address")]
    DnsRebinding { host: String },

    #[error("request failed: {0}")]
    Transport(String),
}

impl WebError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "invalid_url",
            Self::InvalidScheme { .. } => "invalid_scheme",
            Self::BlockedIp { .. } => "blocked_ip",
            Self::BlockedHost { .. } => "blocked_host",
            Self::TooManyRedirects { .. } => "too_many_redirects",
            Self::ResponseTooLarge { .. } => "response_too_large",
            Self::DnsRebinding { .. } => "dns_rebinding",
            Self::Transport(_) => "transport",
        }
    }
}

// ─── LoopError ────────────────────────────────────────────────────────────────

/// Terminal conditions of the agent loop. These are the only errors that
/// abort a run; everything else is fed back to the model as a tool result.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("reached the maximum of {max} iterations")]
    MaxIterationsReached { max: usize },

    #[error("loop exceeded its {0:?} time budget")]
    LoopTimeout(Duration),

    #[error("{count} consecutive iterations had only failing tool calls")]
    ConsecutiveToolFailures { count: usize },

    #[error("operation cancelled")]
    ContextCancelled,

    #[error("chat provider error: {0}")]
    Chat(String),
}

impl LoopError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MaxIterationsReached { .. } => "max_iterations_reached",
            Self::LoopTimeout(_) => "loop_timeout",
            Self::ConsecutiveToolFailures { .. } => "consecutive_tool_failures",
            Self::ContextCancelled => "context_cancelled",
            Self::Chat(_) => "chat_error",
        }
    }
}

// ─── SummarizeError ───────────────────────────────────────────────────────────

/// Summarizer failure. The truncator degrades to a placeholder summary
/// instead of propagating this.
#[derive(Debug, Error)]
#[error("summarization failed: {reason}")]
pub struct SummarizeError {
    pub reason: String,
}

impl SummarizeError {
    pub fn kind(&self) -> &'static str {
        "summarization_failed"
    }
}

// ─── MentionError ─────────────────────────────────────────────────────────────

/// Failures raised by mention fetchers (`@file`, `@clipboard`, `@git`, …).
#[derive(Debug, Error)]
pub enum MentionError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("clipboard is empty")]
    ClipboardEmpty,

    #[error("no clipboard utility available")]
    ClipboardUnavailable,

    #[error("'{dir}' is not inside a git repository")]
    NotGitRepo { dir: PathBuf },

    #[error("no error has been recorded this session")]
    NoErrorStored,

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Web(#[from] WebError),

    #[error("fetch failed: {0}")]
    Fetch(String),
}

impl MentionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileNotFound { .. } => "file_not_found",
            Self::ClipboardEmpty => "clipboard_empty",
            Self::ClipboardUnavailable => "clipboard_unavailable",
            Self::NotGitRepo { .. } => "not_git_repo",
            Self::NoErrorStored => "no_error_stored",
            Self::Security(e) => e.kind(),
            Self::Web(e) => e.kind(),
            Self::Fetch(_) => "fetch_failed",
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
