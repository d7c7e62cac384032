//! Grep tool: regex search across files with optional context lines.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::security::{Permission, RiskLevel, SecurityPolicy};
use crate::tools::glob::is_ignored_dir;
use crate::tools::traits::{
    ParamType, Parameter, PermissionPolicy, Tool, ToolCtx, ToolOutcome, ToolSpec, opt_bool,
    opt_str, opt_u64, require_str,
};
use crate::util::truncate_chars;

/// Line buffer size for file reads.
const LINE_BUFFER: usize = 1024 * 1024;
/// Matched line content is clipped to this many characters.
const MAX_MATCH_CHARS: usize = 500;

/// Extensions that mark a file as binary without opening it.
const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "a", "o", "obj", "class", "bin", "dat", "png", "jpg", "jpeg",
    "gif", "bmp", "ico", "webp", "pdf", "zip", "tar", "gz", "bz2", "xz", "7z", "woff", "woff2",
    "ttf", "otf", "mp3", "mp4", "avi", "mov", "wasm",
];

fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| BINARY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Content,
    FilesWithMatches,
    Count,
}

struct FileMatch {
    path: PathBuf,
    line: usize,
    content: String,
    before: Vec<(usize, String)>,
    after: Vec<(usize, String)>,
}

// ─── GrepTool ─────────────────────────────────────────────────────────────────

pub struct GrepTool {
    policy: Arc<SecurityPolicy>,
}

impl GrepTool {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "grep".into(),
            description: "Search file contents with a regular expression. Supports a glob \
                          filename filter, up to 10 lines of context, case-insensitive matching, \
                          and three output modes: content, files_with_matches, count."
                .into(),
            short_description: "Search file contents with a regex; supports context and filters."
                .into(),
            parameters: vec![
                Parameter::required("pattern", ParamType::String, "Regular expression to search."),
                Parameter::optional("path", ParamType::String, "File or directory to search.")
                    .with_default(json!(".")),
                Parameter::optional("glob", ParamType::String, "Filename filter, e.g. '*.rs'."),
                Parameter::optional("context", ParamType::Integer, "Context lines (0-10).")
                    .with_default(json!(0)),
                Parameter::optional("output_mode", ParamType::String, "Result format.")
                    .with_allowed(&["content", "files_with_matches", "count"])
                    .with_default(json!("content")),
                Parameter::optional(
                    "case_insensitive",
                    ParamType::Boolean,
                    "Ignore case when matching.",
                )
                .with_default(json!(false)),
            ],
            risk_level: RiskLevel::Low,
            permission: PermissionPolicy::Static(Permission::Auto),
        }
    }

    async fn execute(&self, ctx: &ToolCtx, args: &Value) -> ToolOutcome {
        let started = std::time::Instant::now();
        if ctx.cancel.is_cancelled() {
            return ToolOutcome::cancelled();
        }

        let pattern = match require_str(args, "pattern") {
            Ok(p) => p.to_string(),
            Err(e) => return ToolOutcome::fail(e),
        };
        let case_insensitive = opt_bool(args, "case_insensitive").unwrap_or(false);
        let context = (opt_u64(args, "context").unwrap_or(0) as usize).min(10);
        let mode = match opt_str(args, "output_mode").unwrap_or("content") {
            "content" => OutputMode::Content,
            "files_with_matches" => OutputMode::FilesWithMatches,
            "count" => OutputMode::Count,
            other => {
                return ToolOutcome::fail(format!(
                    "unknown output_mode '{other}': expected content, files_with_matches, or count"
                ));
            }
        };

        let compiled = if case_insensitive {
            format!("(?i){pattern}")
        } else {
            pattern.clone()
        };
        let re = match regex::Regex::new(&compiled) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::fail(format!("invalid regex: {e}")),
        };

        let name_filter = match opt_str(args, "glob") {
            Some(g) => match globset::Glob::new(g) {
                Ok(glob) => Some(glob.compile_matcher()),
                Err(e) => return ToolOutcome::fail(format!("invalid glob filter: {e}")),
            },
            None => None,
        };

        let root = PathBuf::from(opt_str(args, "path").unwrap_or("."));
        let root = if root.is_absolute() {
            root
        } else {
            ctx.working_dir.join(root)
        };
        let root = match self.policy.validate_path(&root) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::fail(e.to_string()).with_duration(started.elapsed()),
        };

        self.policy
            .log_action(self.name(), args.clone(), RiskLevel::Low, "allowed", None);

        // Collect candidate files: the path itself, or a walk of the tree.
        let mut files = Vec::new();
        if root.is_file() {
            files.push(root.clone());
        } else {
            let walker = ignore::WalkBuilder::new(&root)
                .standard_filters(false)
                .hidden(false)
                .filter_entry(|entry| {
                    let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                    !(is_dir
                        && entry
                            .file_name()
                            .to_str()
                            .is_some_and(is_ignored_dir))
                })
                .build();
            for entry in walker {
                if ctx.cancel.is_cancelled() {
                    return ToolOutcome::cancelled().with_duration(started.elapsed());
                }
                let Ok(entry) = entry else { continue };
                if entry.file_type().is_some_and(|t| t.is_file()) {
                    files.push(entry.into_path());
                }
            }
            files.sort();
        }

        let mut matches: Vec<FileMatch> = Vec::new();
        let mut files_matched = 0u64;
        let mut per_file_counts: Vec<(PathBuf, usize)> = Vec::new();
        let mut truncated = false;

        'files: for file in &files {
            if ctx.cancel.is_cancelled() {
                return ToolOutcome::cancelled().with_duration(started.elapsed());
            }
            if let Some(filter) = &name_filter
                && !file
                    .file_name()
                    .is_some_and(|n| filter.is_match(Path::new(n)))
            {
                continue;
            }
            if has_binary_extension(file) || self.policy.is_sensitive_path(file) {
                continue;
            }

            let Some(lines) = read_lines_vetted(ctx, file) else {
                continue;
            };

            let mut count_here = 0usize;
            for (idx, line) in lines.iter().enumerate() {
                if re.is_match(line) {
                    count_here += 1;
                    if matches.len() < ctx.limits.grep_max_results {
                        let before = idx.saturating_sub(context);
                        let after_end = (idx + 1 + context).min(lines.len());
                        matches.push(FileMatch {
                            path: file.clone(),
                            line: idx + 1,
                            content: truncate_chars(line, MAX_MATCH_CHARS),
                            before: (before..idx)
                                .map(|i| (i + 1, truncate_chars(&lines[i], MAX_MATCH_CHARS)))
                                .collect(),
                            after: (idx + 1..after_end)
                                .map(|i| (i + 1, truncate_chars(&lines[i], MAX_MATCH_CHARS)))
                                .collect(),
                        });
                    } else {
                        truncated = true;
                        if mode == OutputMode::Content {
                            if count_here > 0 {
                                files_matched += 1;
                                per_file_counts.push((file.clone(), count_here));
                            }
                            break 'files;
                        }
                    }
                }
            }
            if count_here > 0 {
                files_matched += 1;
                per_file_counts.push((file.clone(), count_here));
            }
        }

        let total_matches: usize = per_file_counts.iter().map(|(_, c)| c).sum();

        let output = match mode {
            OutputMode::Content => render_content(&matches, context, truncated),
            OutputMode::FilesWithMatches => {
                if per_file_counts.is_empty() {
                    format!("no matches for pattern '{pattern}'")
                } else {
                    per_file_counts
                        .iter()
                        .map(|(p, _)| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            OutputMode::Count => {
                let mut out: Vec<String> = per_file_counts
                    .iter()
                    .map(|(p, c)| format!("{}:{c}", p.display()))
                    .collect();
                out.push(format!("total: {total_matches}"));
                out.join("\n")
            }
        };

        let mut outcome = ToolOutcome::ok(output).with_duration(started.elapsed());
        outcome.truncated = truncated;
        outcome.match_count = total_matches as u64;
        outcome.files_matched = files_matched;
        outcome
    }
}

/// Open through the secure path, skip oversized files, and read lines with
/// a large buffer. Returns `None` when the file should be silently skipped.
fn read_lines_vetted(ctx: &ToolCtx, path: &Path) -> Option<Vec<String>> {
    let (file, _) = ctx.policy.open_secure_read(path).ok()?;
    let meta = file.metadata().ok()?;
    if !meta.is_file() || meta.len() > ctx.limits.grep_max_file_size {
        return None;
    }

    let mut reader = BufReader::with_capacity(LINE_BUFFER, file);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if buf.contains(&0) {
                    return None; // binary content
                }
                let mut line = String::from_utf8_lossy(&buf).into_owned();
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                lines.push(line);
            }
            Err(_) => return None,
        }
    }
    Some(lines)
}

fn render_content(matches: &[FileMatch], context: usize, truncated: bool) -> String {
    if matches.is_empty() {
        return "no matches".to_string();
    }

    let mut groups: Vec<String> = Vec::new();
    for m in matches {
        let mut group = String::new();
        for (n, line) in &m.before {
            group.push_str(&format!("{}-{n}-{line}\n", m.path.display()));
        }
        group.push_str(&format!("{}:{}:{}\n", m.path.display(), m.line, m.content));
        for (n, line) in &m.after {
            group.push_str(&format!("{}+{n}+{line}\n", m.path.display()));
        }
        groups.push(group.trim_end().to_string());
    }

    let mut out = if context > 0 {
        groups.join("\n--\n")
    } else {
        groups.join("\n")
    };
    if truncated {
        out.push_str("\n(result limit reached; refine the pattern to see more)");
    }
    out
}

// ─── Tests ────────────────────────────────────────────────────────────────────
