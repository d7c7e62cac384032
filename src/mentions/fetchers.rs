//! Content fetchers behind the mention expander.
//!
//! Each fetcher fills `Mention::content` or `Mention::error`. Subprocess
//! fetchers (clipboard, git) run under their own timeouts; `@url` goes
//! through the same SSRF-safe fetch path as the web tool.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::FileCache;
use crate::error::MentionError;
use crate::security::SecurityPolicy;
use crate::tools::glob::is_ignored_dir;
use crate::tools::html::html_to_text;
use crate::tools::read::{looks_binary, number_lines};
use crate::tools::web_fetch::fetch_validated;

use super::parser::{Mention, MentionKind, expand, parse_mentions};

/// Size cap for `@file` content, far below the read tool's cap.
const FILE_MENTION_MAX: u64 = 100 * 1024;
const CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(5);
const GIT_TIMEOUT: Duration = Duration::from_secs(10);
const URL_MENTION_MAX: usize = 100 * 1024;
const URL_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Last-error slot ──────────────────────────────────────────────────────────

/// Storage behind `@error`: the most recent error shown to the user.
#[derive(Default)]
pub struct LastErrorSlot {
    value: Mutex<Option<String>>,
}

impl LastErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: impl Into<String>) {
        if let Ok(mut slot) = self.value.lock() {
            *slot = Some(error.into());
        }
    }

    pub fn take_snapshot(&self) -> Option<String> {
        self.value.lock().ok().and_then(|s| s.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.value.lock() {
            *slot = None;
        }
    }
}

/// Process-wide default slot, for callers that do not inject their own.
pub fn global_error_slot() -> &'static LastErrorSlot {
    static SLOT: OnceLock<LastErrorSlot> = OnceLock::new();
    SLOT.get_or_init(LastErrorSlot::new)
}

// ─── Fetcher ──────────────────────────────────────────────────────────────────

/// Resolves mention content. Dependencies are injected so the file cache
/// and error slot can be shared with the rest of the runtime.
pub struct MentionFetcher {
    policy: Arc<SecurityPolicy>,
    cache: Arc<FileCache>,
    last_error: Arc<LastErrorSlot>,
    working_dir: PathBuf,
}

impl MentionFetcher {
    pub fn new(
        policy: Arc<SecurityPolicy>,
        cache: Arc<FileCache>,
        last_error: Arc<LastErrorSlot>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            policy,
            cache,
            last_error,
            working_dir,
        }
    }

    /// Parse, fetch every mention, and render the expanded message.
    pub async fn expand_message(&self, input: &str, cancel: &CancellationToken) -> String {
        let (mut mentions, clean) = parse_mentions(input);
        for mention in &mut mentions {
            if cancel.is_cancelled() {
                mention.error = Some("operation cancelled".to_string());
                continue;
            }
            match self.fetch(mention, cancel).await {
                Ok(content) => mention.content = Some(content),
                Err(e) => mention.error = Some(e.to_string()),
            }
        }
        expand(&mentions, &clean)
    }

    /// Fetch one mention's content.
    pub async fn fetch(
        &self,
        mention: &Mention,
        cancel: &CancellationToken,
    ) -> Result<String, MentionError> {
        match mention.kind {
            MentionKind::File => {
                let path = mention
                    .argument
                    .clone()
                    .ok_or_else(|| MentionError::Fetch("missing file path".into()))?;
                self.fetch_file(Path::new(&path))
            }
            MentionKind::Clipboard => self.fetch_clipboard(cancel).await,
            MentionKind::Git => self.fetch_git(mention.argument.as_deref(), cancel).await,
            MentionKind::Codebase => self.fetch_codebase(),
            MentionKind::Error => self
                .last_error
                .take_snapshot()
                .ok_or(MentionError::NoErrorStored),
            MentionKind::Url => {
                let url = mention
                    .argument
                    .clone()
                    .ok_or_else(|| MentionError::Fetch("missing url".into()))?;
                self.fetch_url(&url, cancel).await
            }
        }
    }

    // ── @file ─────────────────────────────────────────────────────────────────

    fn fetch_file(&self, path: &Path) -> Result<String, MentionError> {
        let real = self.policy.validate_path(path)?;
        if let Some((cached, _)) = self.cache.get(&real) {
            return Ok(render_file(&real, &cached));
        }

        let (mut file, real) = self.policy.open_secure_read(&real).map_err(|e| {
            if matches!(e, crate::error::SecurityError::FileOpen { .. }) {
                MentionError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                MentionError::Security(e)
            }
        })?;

        let meta = file
            .metadata()
            .map_err(|e| MentionError::Fetch(format!("stat failed: {e}")))?;
        if meta.is_dir() {
            return Err(MentionError::Fetch(format!(
                "'{}' is a directory",
                real.display()
            )));
        }
        if meta.len() > FILE_MENTION_MAX {
            return Err(MentionError::Fetch(format!(
                "file is {} bytes, over the {FILE_MENTION_MAX} byte mention limit",
                meta.len()
            )));
        }

        let mut bytes = Vec::with_capacity(meta.len() as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| MentionError::Fetch(format!("read failed: {e}")))?;
        if looks_binary(&bytes) {
            return Err(MentionError::Fetch(format!(
                "'{}' appears to be binary",
                real.display()
            )));
        }

        let content = String::from_utf8_lossy(&bytes).into_owned();
        let mtime = meta
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        self.cache
            .put(&real, &content, mtime, content.lines().count());
        Ok(render_file(&real, &content))
    }

    // ── @clipboard ────────────────────────────────────────────────────────────

    async fn fetch_clipboard(&self, cancel: &CancellationToken) -> Result<String, MentionError> {
        const CANDIDATES: &[(&str, &[&str])] = &[
            ("xclip", &["-selection", "clipboard", "-o"]),
            ("xsel", &["--clipboard", "--output"]),
            ("pbpaste", &[]),
            ("powershell.exe", &["-NoProfile", "-Command", "Get-Clipboard"]),
        ];

        for (program, args) in CANDIDATES {
            match run_command(program, args, None, CLIPBOARD_TIMEOUT, cancel).await {
                Ok(output) => {
                    let trimmed = output.trim();
                    if trimmed.is_empty() {
                        return Err(MentionError::ClipboardEmpty);
                    }
                    return Ok(trimmed.to_string());
                }
                // Missing binary: try the next candidate.
                Err(CommandError::Unavailable) => continue,
                Err(CommandError::Failed(e)) => return Err(MentionError::Fetch(e)),
            }
        }
        Err(MentionError::ClipboardUnavailable)
    }

    // ── @git ──────────────────────────────────────────────────────────────────

    async fn fetch_git(
        &self,
        range: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, MentionError> {
        let cwd = Some(self.working_dir.as_path());

        if run_command("git", &["rev-parse", "--git-dir"], cwd, GIT_TIMEOUT, cancel)
            .await
            .is_err()
        {
            return Err(MentionError::NotGitRepo {
                dir: self.working_dir.clone(),
            });
        }

        let log_args: Vec<&str> = match range {
            Some(range) => vec!["log", "--oneline", range],
            None => vec!["log", "--oneline", "-n", "10"],
        };
        let log = run_command("git", &log_args, cwd, GIT_TIMEOUT, cancel)
            .await
            .unwrap_or_else(|_| "(no commits)".to_string());
        let status = run_command("git", &["status", "--short"], cwd, GIT_TIMEOUT, cancel)
            .await
            .unwrap_or_default();
        let diff = run_command("git", &["diff", "--stat"], cwd, GIT_TIMEOUT, cancel)
            .await
            .unwrap_or_default();

        let mut out = format!("Recent commits:\n{}", log.trim_end());
        if !status.trim().is_empty() {
            out.push_str(&format!("\n\nWorking tree:\n{}", status.trim_end()));
        }
        if !diff.trim().is_empty() {
            out.push_str(&format!("\n\nUnstaged changes:\n{}", diff.trim_end()));
        }
        Ok(out)
    }

    // ── @codebase ─────────────────────────────────────────────────────────────

    /// Cheap structural overview of the working directory. A full codebase
    /// index is an external collaborator; this stays at directory-listing
    /// depth.
    fn fetch_codebase(&self) -> Result<String, MentionError> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();

        let entries = std::fs::read_dir(&self.working_dir)
            .map_err(|e| MentionError::Fetch(format!("failed to list working dir: {e}")))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_ignored_dir(&name) {
                continue;
            }
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(format!("{name}/"));
            } else {
                files.push(name);
            }
        }
        dirs.sort();
        files.sort();

        Ok(format!(
            "Project root: {}\nDirectories: {}\nFiles: {}",
            self.working_dir.display(),
            if dirs.is_empty() { "(none)".into() } else { dirs.join(", ") },
            if files.is_empty() { "(none)".into() } else { files.join(", ") },
        ))
    }

    // ── @url ──────────────────────────────────────────────────────────────────

    async fn fetch_url(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, MentionError> {
        let page = tokio::select! {
            r = fetch_validated(url, 5, URL_MENTION_MAX, URL_TIMEOUT) => r?,
            _ = cancel.cancelled() => {
                return Err(MentionError::Fetch("operation cancelled".into()));
            }
        };
        if page.content_type.contains("html") {
            Ok(html_to_text(&page.body))
        } else {
            Ok(page.body)
        }
    }
}

fn render_file(path: &Path, content: &str) -> String {
    let (numbered, _, _) = number_lines(content, 1, usize::MAX, 2000);
    format!(
        "File: {}\n{}\n{}",
        path.display(),
        "-".repeat(40),
        numbered.trim_end()
    )
}

// ─── Subprocess helper ────────────────────────────────────────────────────────

enum CommandError {
    /// The binary could not be spawned (typically not installed).
    Unavailable,
    Failed(String),
}

async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, CommandError> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|_| CommandError::Unavailable)?;

    let output = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait_with_output()) => {
            match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(CommandError::Failed(e.to_string())),
                Err(_) => {
                    return Err(CommandError::Failed(format!(
                        "'{program}' timed out after {timeout:?}"
                    )));
                }
            }
        }
        _ = cancel.cancelled() => {
            return Err(CommandError::Failed("operation cancelled".into()));
        }
    };

    if !output.status.success() {
        return Err(CommandError::Failed(format!(
            "'{program}' exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
