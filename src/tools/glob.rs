//! Glob tool: pattern matching over a directory tree, newest first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::security::{Permission, RiskLevel, SecurityPolicy};
use crate::tools::traits::{
    ParamType, Parameter, PermissionPolicy, Tool, ToolCtx, ToolOutcome, ToolSpec, opt_str,
    require_str,
};

/// Directory names skipped during the walk. These are dependency and build
/// trees that would otherwise dominate every result set.
pub(crate) const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    "target",
    "dist",
    "build",
    ".cache",
];

pub(crate) fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}

// ─── Pattern handling ─────────────────────────────────────────────────────────

/// An absolute pattern like `/home/u/src/**/*.rs` is split at the last `/`
/// before the first wildcard: the literal prefix becomes the walk root and
/// the remainder the pattern.
pub(crate) fn split_absolute_pattern(pattern: &str) -> Option<(PathBuf, String)> {
    if !pattern.starts_with('/') {
        return None;
    }
    let wildcard = pattern.find(['*', '?', '['])?;
    let slash = pattern[..wildcard].rfind('/')?;
    let root = if slash == 0 { "/" } else { &pattern[..slash] };
    Some((PathBuf::from(root), pattern[slash + 1..].to_string()))
}

fn has_parent_segment(pattern: &str) -> bool {
    pattern.split('/').any(|seg| seg == "..")
}

// ─── GlobTool ─────────────────────────────────────────────────────────────────

pub struct GlobTool {
    policy: Arc<SecurityPolicy>,
}

impl GlobTool {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "glob".into(),
            description: "Find files matching a glob pattern (`?`, `*`, `**`, `[abc]`). Results \
                          are sorted newest-first by modification time. Dependency and build \
                          directories (.git, node_modules, target, …) are skipped."
                .into(),
            short_description: "Find files by glob pattern, sorted by modification time.".into(),
            parameters: vec![
                Parameter::required("pattern", ParamType::String, "Glob pattern to match."),
                Parameter::optional("path", ParamType::String, "Directory to search under.")
                    .with_default(json!(".")),
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

        let mut pattern = match require_str(args, "pattern") {
            Ok(p) => p.to_string(),
            Err(e) => return ToolOutcome::fail(e),
        };
        let mut base = PathBuf::from(opt_str(args, "path").unwrap_or("."));

        if let Some((derived_base, derived_pattern)) = split_absolute_pattern(&pattern) {
            base = derived_base;
            pattern = derived_pattern;
        }
        if has_parent_segment(&pattern) {
            return ToolOutcome::fail("glob patterns must not contain '..' segments");
        }

        let base = if base.is_absolute() {
            base
        } else {
            ctx.working_dir.join(base)
        };
        let base = match self.policy.validate_path(&base) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::fail(e.to_string()).with_duration(started.elapsed()),
        };
        if !base.is_dir() {
            return ToolOutcome::fail(format!("'{}' is not a directory", base.display()));
        }

        let matcher = match globset::GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
        {
            Ok(glob) => glob.compile_matcher(),
            Err(e) => return ToolOutcome::fail(format!("invalid glob pattern: {e}")),
        };

        self.policy
            .log_action(self.name(), args.clone(), RiskLevel::Low, "allowed", None);

        let mut matches: Vec<(PathBuf, SystemTime)> = Vec::new();
        let walker = ignore::WalkBuilder::new(&base)
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
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&base) else {
                continue;
            };
            if matcher.is_match(relative) {
                let mtime = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                matches.push((entry.into_path(), mtime));
            }
        }

        let total = matches.len();
        matches.sort_by(|a, b| b.1.cmp(&a.1));
        let truncated = total > ctx.limits.glob_max_results;
        matches.truncate(ctx.limits.glob_max_results);

        let mut output = matches
            .iter()
            .map(|(p, _)| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        if output.is_empty() {
            output = format!("no files match pattern '{pattern}'");
        } else if truncated {
            output.push_str(&format!(
                "\n(showing {} of {} matches)",
                ctx.limits.glob_max_results, total
            ));
        }

        let mut outcome = ToolOutcome::ok(output).with_duration(started.elapsed());
        outcome.truncated = truncated;
        outcome.files_matched = total as u64;
        outcome.match_count = matches.len() as u64;
        outcome
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use std::fs;
    use tempfile::TempDir;

    fn ctx_for(dir: &TempDir) -> ToolCtx {
        let policy = Arc::new(SecurityPolicy::rooted_at(vec![dir.path().to_path_buf()]));
        ToolCtx::new(policy, Arc::new(FileCache::default()))
            .with_working_dir(dir.path().to_path_buf())
    }

    fn tool(ctx: &ToolCtx) -> GlobTool {
        GlobTool::new(ctx.policy.clone())
    }

    #[test]
    fn absolute_pattern_splits_before_first_wildcard() {
        let (base, pattern) = split_absolute_pattern("/home/u/src/**/*.rs").unwrap();
        assert_eq!(base, PathBuf::from("/home/u/src"));
        assert_eq!(pattern, "**/*.rs");

        let (base, pattern) = split_absolute_pattern("/tmp/*.txt").unwrap();
        assert_eq!(base, PathBuf::from("/tmp"));
        assert_eq!(pattern, "*.txt");
    }

    #[test]
    fn relative_pattern_is_not_split() {
        assert!(split_absolute_pattern("src/**/*.rs").is_none());
        assert!(split_absolute_pattern("/no/wildcards/here").is_none());
    }

    #[tokio::test]
    async fn matches_by_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "").unwrap();
        fs::write(dir.path().join("b.rs"), "").unwrap();
        fs::write(dir.path().join("c.txt"), "").unwrap();

        let ctx = ctx_for(&dir);
        let r = tool(&ctx).execute(&ctx, &json!({"pattern": "*.rs"})).await;
        assert!(r.success);
        assert_eq!(r.files_matched, 2);
        assert!(!r.output.as_deref().unwrap().contains("c.txt"));
    }

    #[tokio::test]
    async fn double_star_crosses_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        fs::write(dir.path().join("a/b/c/deep.rs"), "").unwrap();
        fs::write(dir.path().join("top.rs"), "").unwrap();

        let ctx = ctx_for(&dir);
        let r = tool(&ctx).execute(&ctx, &json!({"pattern": "**/*.rs"})).await;
        assert!(r.success);
        assert_eq!(r.files_matched, 2);
    }

    #[tokio::test]
    async fn single_star_does_not_cross_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/inner.rs"), "").unwrap();
        fs::write(dir.path().join("top.rs"), "").unwrap();

        let ctx = ctx_for(&dir);
        let r = tool(&ctx).execute(&ctx, &json!({"pattern": "*.rs"})).await;
        assert_eq!(r.files_matched, 1);
    }

    #[tokio::test]
    async fn ignored_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "").unwrap();
        fs::write(dir.path().join("app.js"), "").unwrap();

        let ctx = ctx_for(&dir);
        let r = tool(&ctx).execute(&ctx, &json!({"pattern": "**/*.js"})).await;
        assert_eq!(r.files_matched, 1);
        assert!(r.output.as_deref().unwrap().contains("app.js"));
    }

    #[tokio::test]
    async fn dotdot_pattern_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let r = tool(&ctx).execute(&ctx, &json!({"pattern": "../*.rs"})).await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains(".."));
    }

    #[tokio::test]
    async fn results_sorted_newest_first() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old.rs");
        let new = dir.path().join("new.rs");
        fs::write(&old, "").unwrap();
        fs::write(&new, "").unwrap();

        let base = fs::metadata(&old).unwrap().modified().unwrap();
        let f = fs::OpenOptions::new().write(true).open(&new).unwrap();
        f.set_modified(base + std::time::Duration::from_secs(60)).unwrap();

        let ctx = ctx_for(&dir);
        let r = tool(&ctx).execute(&ctx, &json!({"pattern": "*.rs"})).await;
        let output = r.output.unwrap();
        let first = output.lines().next().unwrap();
        assert!(first.contains("new.rs"), "expected new.rs first, got: {first}");
    }

    #[tokio::test]
    async fn cap_boundary_sets_truncated() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx_for(&dir);
        ctx.limits.glob_max_results = 3;

        for i in 0..3 {
            fs::write(dir.path().join(format!("f{i}.rs")), "").unwrap();
        }
        let r = tool(&ctx).execute(&ctx, &json!({"pattern": "*.rs"})).await;
        assert!(!r.truncated);
        assert_eq!(r.files_matched, 3);

        fs::write(dir.path().join("f3.rs"), "").unwrap();
        let r = tool(&ctx).execute(&ctx, &json!({"pattern": "*.rs"})).await;
        assert!(r.truncated);
        assert_eq!(r.files_matched, 4);
        assert_eq!(r.match_count, 3);
    }

    #[tokio::test]
    async fn missing_pattern_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let r = tool(&ctx).execute(&ctx, &json!({})).await;
        assert!(!r.success);
    }
}
