//! File read tool: numbered output with offset/limit windows.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::SecurityError;
use crate::security::{Permission, RiskLevel, SecurityPolicy};
use crate::tools::traits::{
    ParamType, Parameter, PermissionPolicy, Tool, ToolCtx, ToolOutcome, ToolSpec, opt_u64,
    require_str,
};

/// Bytes sniffed for the binary heuristic.
const BINARY_SNIFF_LEN: usize = 512;

// ─── Binary detection ─────────────────────────────────────────────────────────

/// A file is treated as binary when its first 512 bytes contain a NUL, or
/// more than 30 % of them are non-printable (newline, carriage return, and
/// tab excluded).
pub(crate) fn looks_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let non_printable = sample
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();
    non_printable * 10 > sample.len() * 3
}

// ─── Line numbering ───────────────────────────────────────────────────────────

/// `cat -n` style rendering: 6-wide right-aligned line number, a tab, then
/// the line, with over-long lines cut at `max_line_length` and marked with
/// `...`. Returns the rendered window, the number of lines emitted, and
/// whether the limit cut off further lines.
pub(crate) fn number_lines(
    content: &str,
    offset: usize,
    limit: usize,
    max_line_length: usize,
) -> (String, u64, bool) {
    let offset = offset.max(1);
    let mut out = String::new();
    let mut emitted: u64 = 0;
    let mut cut_off = false;

    for (idx, line) in content.lines().enumerate() {
        let number = idx + 1;
        if number < offset {
            continue;
        }
        if emitted as usize >= limit {
            cut_off = true;
            break;
        }
        let rendered = if line.chars().count() > max_line_length {
            let clipped: String = line.chars().take(max_line_length).collect();
            format!("{clipped}...")
        } else {
            line.to_string()
        };
        out.push_str(&format!("{number:>6}\t{rendered}\n"));
        emitted += 1;
    }

    (out, emitted, cut_off)
}

// ─── ReadTool ─────────────────────────────────────────────────────────────────

/// Reads a file through the secure-open path, with results cached by mtime.
pub struct ReadTool {
    policy: Arc<SecurityPolicy>,
}

impl ReadTool {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn spec(&self) -> ToolSpec {
        let policy = self.policy.clone();
        ToolSpec {
            name: "read".into(),
            description: "Read a text file and return its contents with line numbers. Use offset \
                          and limit to page through large files. Binary files, directories, and \
                          credential-like files are refused."
                .into(),
            short_description: "Read a text file with line numbers; supports offset and limit."
                .into(),
            parameters: vec![
                Parameter::required("file_path", ParamType::String, "Path of the file to read."),
                Parameter::optional("offset", ParamType::Integer, "First line to return, 1-indexed.")
                    .with_default(json!(1)),
                Parameter::optional("limit", ParamType::Integer, "Maximum number of lines.")
                    .with_default(json!(2000)),
            ],
            risk_level: RiskLevel::Low,
            permission: PermissionPolicy::Dynamic(Arc::new(move |args: &Value| {
                match args.get("file_path").and_then(Value::as_str) {
                    Some(p) => policy.classify_path(std::path::Path::new(p)),
                    None => Permission::Auto,
                }
            })),
        }
    }

    async fn execute(&self, ctx: &ToolCtx, args: &Value) -> ToolOutcome {
        let started = std::time::Instant::now();
        if ctx.cancel.is_cancelled() {
            return ToolOutcome::cancelled();
        }

        let path = match require_str(args, "file_path") {
            Ok(p) => std::path::PathBuf::from(p),
            Err(e) => return ToolOutcome::fail(e),
        };
        let offset = opt_u64(args, "offset").unwrap_or(1) as usize;
        let limit = opt_u64(args, "limit").unwrap_or(ctx.limits.default_read_limit as u64) as usize;

        if self.policy.is_sensitive_path(&path) {
            self.policy.log_action(
                self.name(),
                args.clone(),
                RiskLevel::Low,
                "denied",
                Some("sensitive_file"),
            );
            return ToolOutcome::fail(format!(
                "'{}' matches a sensitive file pattern and cannot be read",
                path.display()
            ))
            .with_duration(started.elapsed());
        }

        // Cache first; entries are revalidated by mtime inside `get`.
        let real = match self.policy.validate_path(&path) {
            Ok(p) => p,
            Err(e) => {
                self.policy.log_action(
                    self.name(),
                    args.clone(),
                    RiskLevel::Low,
                    "denied",
                    Some(e.kind()),
                );
                return ToolOutcome::fail(e.to_string()).with_duration(started.elapsed());
            }
        };

        let content: Arc<str> = if let Some((cached, _)) = ctx.cache.get(&real) {
            cached
        } else {
            match read_vetted(ctx, &real) {
                Ok((content, mtime)) => {
                    let line_count = content.lines().count();
                    ctx.cache.put(&real, &content, mtime, line_count);
                    Arc::from(content.as_str())
                }
                Err(e) => {
                    return ToolOutcome::fail(e).with_duration(started.elapsed());
                }
            }
        };

        self.policy
            .log_action(self.name(), args.clone(), RiskLevel::Low, "allowed", None);

        let (output, lines, cut_off) =
            number_lines(&content, offset, limit, ctx.limits.max_line_length);

        let mut outcome = ToolOutcome::ok(output).with_duration(started.elapsed());
        outcome.bytes_read = content.len() as u64;
        outcome.lines_count = lines;
        outcome.truncated = cut_off;
        outcome.metadata = Some(json!({
            "path": real.display().to_string(),
            "total_lines": content.lines().count(),
        }));
        outcome
    }
}

/// Open securely, vet size and binary-ness through the handle, and read.
fn read_vetted(
    ctx: &ToolCtx,
    real: &std::path::Path,
) -> Result<(String, std::time::SystemTime), String> {
    let (mut file, real) = ctx
        .policy
        .open_secure_read(real)
        .map_err(|e| e.to_string())?;

    let meta = file
        .metadata()
        .map_err(|e| format!("failed to stat '{}': {e}", real.display()))?;

    if meta.is_dir() {
        return Err(SecurityError::IsDirectory { path: real }.to_string());
    }
    if meta.len() > ctx.limits.max_file_size {
        return Err(SecurityError::FileTooLarge {
            path: real,
            size: meta.len(),
            max: ctx.limits.max_file_size,
        }
        .to_string());
    }

    let mut bytes = Vec::with_capacity(meta.len() as usize);
    file.read_to_end(&mut bytes)
        .map_err(|e| format!("failed to read '{}': {e}", real.display()))?;

    if looks_binary(&bytes) {
        return Err(SecurityError::IsBinary { path: real }.to_string());
    }

    let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    Ok((String::from_utf8_lossy(&bytes).into_owned(), mtime))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
