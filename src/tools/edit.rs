//! String-replacement edit tool with dry-run preview and backup/restore.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::security::{Permission, RiskLevel, SecurityPolicy};
use crate::tools::traits::{
    ParamType, Parameter, PermissionPolicy, Tool, ToolCtx, ToolOutcome, ToolSpec, opt_bool,
    require_str,
};
use crate::tools::write::{atomic_write, backup_path};
use crate::util::truncate_chars;

// ─── Parameters ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct EditParams {
    path: PathBuf,
    old_string: String,
    new_string: String,
    replace_all: bool,
    use_regex: bool,
    create_backup: bool,
    restore_backup: bool,
    dry_run: bool,
}

fn parse_params(args: &Value) -> Result<EditParams, String> {
    let path = PathBuf::from(require_str(args, "file_path")?);
    let restore_backup = opt_bool(args, "restore_backup").unwrap_or(false);

    // A restore needs no strings; everything else does.
    let (old_string, new_string) = if restore_backup {
        (String::new(), String::new())
    } else {
        (
            require_str(args, "old_string")?.to_string(),
            args.get("new_string")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        )
    };

    Ok(EditParams {
        path,
        old_string,
        new_string,
        replace_all: opt_bool(args, "replace_all").unwrap_or(false),
        use_regex: opt_bool(args, "use_regex").unwrap_or(false),
        create_backup: opt_bool(args, "create_backup").unwrap_or(false),
        restore_backup,
        dry_run: opt_bool(args, "dry_run").unwrap_or(false),
    })
}

// ─── Replacement engine ───────────────────────────────────────────────────────

/// Apply the replacement, enforcing the uniqueness rule: without
/// `replace_all` the pattern must match exactly once. Returns the new
/// content and the number of matches replaced.
fn apply_edit(content: &str, params: &EditParams) -> Result<(String, usize), String> {
    if params.use_regex {
        let re = regex::Regex::new(&params.old_string)
            .map_err(|e| format!("invalid regex pattern: {e}"))?;
        let count = re.find_iter(content).count();
        if count == 0 {
            return Err("regex pattern matched nothing in the file".to_string());
        }
        if count > 1 && !params.replace_all {
            return Err(format!(
                "regex matched {count} times; pass replace_all=true or narrow the pattern"
            ));
        }
        let new_content = if params.replace_all {
            re.replace_all(content, params.new_string.as_str()).into_owned()
        } else {
            re.replace(content, params.new_string.as_str()).into_owned()
        };
        return Ok((new_content, count));
    }

    let count = content.matches(&params.old_string).count();
    if count == 0 {
        return Err(not_found_diagnostic(content, &params.old_string));
    }
    if count > 1 && !params.replace_all {
        return Err(format!(
            "old_string appears {count} times; pass replace_all=true or include more surrounding \
             context to make it unique"
        ));
    }
    let new_content = if params.replace_all {
        content.replace(&params.old_string, &params.new_string)
    } else {
        content.replacen(&params.old_string, &params.new_string, 1)
    };
    Ok((new_content, count))
}

/// Explain *why* a literal match failed: an exact-case or exact-whitespace
/// near miss is far more actionable than "not found".
fn not_found_diagnostic(content: &str, old: &str) -> String {
    if content.to_lowercase().contains(&old.to_lowercase()) {
        return "old_string not found, but a match exists with different letter case — check \
                capitalization"
            .to_string();
    }
    if collapse_ws(content).contains(&collapse_ws(old)) {
        return "old_string not found, but a match exists with different whitespace — check \
                indentation and line breaks"
            .to_string();
    }
    "old_string not found in the file".to_string()
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Context snippet around the first and last occurrence, for previews.
fn match_snippets(content: &str, pattern: &str, use_regex: bool) -> (String, String) {
    let spans: Vec<(usize, usize)> = if use_regex {
        regex::Regex::new(pattern)
            .map(|re| re.find_iter(content).map(|m| (m.start(), m.end())).collect())
            .unwrap_or_default()
    } else {
        content
            .match_indices(pattern)
            .map(|(i, m)| (i, i + m.len()))
            .collect()
    };

    let snippet = |&(start, end): &(usize, usize)| {
        let from = content[..start]
            .char_indices()
            .rev()
            .nth(29)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let upto = content[end..]
            .char_indices()
            .nth(30)
            .map(|(i, _)| end + i)
            .unwrap_or(content.len());
        content[from..upto].replace('\n', "\\n")
    };

    match (spans.first(), spans.last()) {
        (Some(first), Some(last)) => (snippet(first), snippet(last)),
        _ => (String::new(), String::new()),
    }
}

// ─── EditTool ─────────────────────────────────────────────────────────────────

pub struct EditTool {
    policy: Arc<SecurityPolicy>,
}

impl EditTool {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }

    /// Pure preview: the (old, new) content pair this edit would produce.
    /// Performs no write.
    pub fn diff_preview(&self, ctx: &ToolCtx, args: &Value) -> Result<(String, String), String> {
        let params = parse_params(args)?;
        let content = self.read_current(ctx, &params.path)?;
        let (new_content, _) = apply_edit(&content, &params)?;
        Ok((content, new_content))
    }

    fn read_current(&self, ctx: &ToolCtx, path: &Path) -> Result<String, String> {
        use std::io::Read;

        let (mut file, real) = self
            .policy
            .open_secure_read(path)
            .map_err(|e| e.to_string())?;
        let meta = file
            .metadata()
            .map_err(|e| format!("failed to stat '{}': {e}", real.display()))?;
        if meta.is_dir() {
            return Err(format!("'{}' is a directory", real.display()));
        }
        if meta.len() > ctx.limits.max_file_size {
            return Err(format!(
                "file '{}' is {} bytes, over the {} byte limit",
                real.display(),
                meta.len(),
                ctx.limits.max_file_size
            ));
        }
        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| format!("failed to read '{}': {e}", real.display()))?;
        Ok(content)
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn spec(&self) -> ToolSpec {
        let policy = self.policy.clone();
        ToolSpec {
            name: "edit".into(),
            description: "Replace a string in a file. old_string must match exactly once unless \
                          replace_all is set; use_regex switches to regex matching. dry_run \
                          previews the change without writing; create_backup/restore_backup \
                          manage a <path>.bak copy. An empty new_string deletes the match."
                .into(),
            short_description: "Replace an exact string (or regex match) in a file.".into(),
            parameters: vec![
                Parameter::required("file_path", ParamType::String, "File to edit."),
                Parameter::required("old_string", ParamType::String, "Text to find."),
                Parameter::optional("new_string", ParamType::String, "Replacement; empty deletes."),
                Parameter::optional("replace_all", ParamType::Boolean, "Replace every occurrence.")
                    .with_default(json!(false)),
                Parameter::optional("use_regex", ParamType::Boolean, "Treat old_string as a regex.")
                    .with_default(json!(false)),
                Parameter::optional("create_backup", ParamType::Boolean, "Write <path>.bak first."),
                Parameter::optional("restore_backup", ParamType::Boolean, "Restore from <path>.bak."),
                Parameter::optional("dry_run", ParamType::Boolean, "Preview without writing."),
            ],
            risk_level: RiskLevel::Medium,
            permission: PermissionPolicy::Dynamic(Arc::new(move |args: &Value| {
                match args.get("file_path").and_then(Value::as_str) {
                    Some(p) => match policy.classify_path(Path::new(p)) {
                        Permission::Auto => Permission::Ask,
                        other => other,
                    },
                    None => Permission::Ask,
                }
            })),
        }
    }

    async fn execute(&self, ctx: &ToolCtx, args: &Value) -> ToolOutcome {
        let started = std::time::Instant::now();
        if ctx.cancel.is_cancelled() {
            return ToolOutcome::cancelled();
        }

        let params = match parse_params(args) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::fail(e),
        };

        if self.policy.is_sensitive_path(&params.path) {
            return ToolOutcome::fail(format!(
                "'{}' matches a sensitive file pattern and cannot be edited",
                params.path.display()
            ));
        }

        let real = match self.policy.validate_path(&params.path) {
            Ok(p) => p,
            Err(e) => {
                self.policy.log_action(
                    self.name(),
                    json!({"file_path": params.path.display().to_string()}),
                    RiskLevel::Medium,
                    "denied",
                    Some(e.kind()),
                );
                return ToolOutcome::fail(e.to_string()).with_duration(started.elapsed());
            }
        };

        // Restore is a straight copy back; no matching involved.
        if params.restore_backup {
            let bak = backup_path(&real);
            if !bak.exists() {
                return ToolOutcome::fail(format!("no backup found at '{}'", bak.display()));
            }
            return match std::fs::copy(&bak, &real) {
                Ok(bytes) => {
                    ctx.cache.invalidate(&real);
                    let mut outcome = ToolOutcome::ok(format!(
                        "restored '{}' from backup ({bytes} bytes)",
                        real.display()
                    ))
                    .with_duration(started.elapsed());
                    outcome.bytes_written = bytes;
                    outcome
                }
                Err(e) => ToolOutcome::fail(format!("failed to restore backup: {e}")),
            };
        }

        let content = match self.read_current(ctx, &real) {
            Ok(c) => c,
            Err(e) => return ToolOutcome::fail(e).with_duration(started.elapsed()),
        };

        let (new_content, matches) = match apply_edit(&content, &params) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::fail(e).with_duration(started.elapsed()),
        };

        if params.dry_run {
            let (first, last) = match_snippets(&content, &params.old_string, params.use_regex);
            let mut preview = format!(
                "dry run: {} match(es); file would go from {} to {} bytes\nfirst match: …{}…",
                matches,
                content.len(),
                new_content.len(),
                truncate_chars(&first, 120),
            );
            if matches > 1 {
                preview.push_str(&format!("\nlast match:  …{}…", truncate_chars(&last, 120)));
            }
            let mut outcome = ToolOutcome::ok(preview).with_duration(started.elapsed());
            outcome.match_count = matches as u64;
            outcome.metadata = Some(json!({
                "old_bytes": content.len(),
                "new_bytes": new_content.len(),
                "dry_run": true,
            }));
            return outcome;
        }

        if params.create_backup
            && let Err(e) = std::fs::copy(&real, backup_path(&real))
        {
            return ToolOutcome::fail(format!("failed to create backup: {e}"));
        }

        if let Err(e) = atomic_write(&real, new_content.as_bytes()) {
            return ToolOutcome::fail(e).with_duration(started.elapsed());
        }
        ctx.cache.invalidate(&real);

        self.policy.log_action(
            self.name(),
            json!({"file_path": real.display().to_string(), "matches": matches}),
            RiskLevel::Medium,
            "allowed",
            None,
        );

        let mut outcome = ToolOutcome::ok(format!(
            "replaced {} occurrence(s) in '{}'",
            matches,
            real.display()
        ))
        .with_duration(started.elapsed());
        outcome.bytes_read = content.len() as u64;
        outcome.bytes_written = new_content.len() as u64;
        outcome.match_count = matches as u64;
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
    }

    fn tool(ctx: &ToolCtx) -> EditTool {
        EditTool::new(ctx.policy.clone())
    }

    async fn run_edit(ctx: &ToolCtx, args: Value) -> ToolOutcome {
        tool(ctx).execute(ctx, &args).await
    }

    #[tokio::test]
    async fn replaces_unique_string() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "let x = 1;\nlet y = 2;\n").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "let y = 2;",
                "new_string": "let y = 3;"
            }),
        )
        .await;
        assert!(r.success, "{:?}", r.error);
        assert_eq!(fs::read_to_string(&file).unwrap(), "let x = 1;\nlet y = 3;\n");
        assert_eq!(r.match_count, 1);
    }

    #[tokio::test]
    async fn ambiguous_match_fails_with_count() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "foo foo foo").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "foo",
                "new_string": "bar"
            }),
        )
        .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("3 times"));
        // Nothing written.
        assert_eq!(fs::read_to_string(&file).unwrap(), "foo foo foo");
    }

    #[tokio::test]
    async fn replace_all_handles_every_occurrence() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "a b a b a").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "a",
                "new_string": "z",
                "replace_all": true
            }),
        )
        .await;
        assert!(r.success);
        assert_eq!(r.match_count, 3);
        assert_eq!(fs::read_to_string(&file).unwrap(), "z b z b z");
    }

    #[tokio::test]
    async fn empty_new_string_deletes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "keep DELETE keep").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "DELETE ",
            }),
        )
        .await;
        assert!(r.success);
        assert_eq!(fs::read_to_string(&file).unwrap(), "keep keep");
    }

    #[tokio::test]
    async fn case_mismatch_gets_diagnostic() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "Hello World").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "hello world",
                "new_string": "x"
            }),
        )
        .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("letter case"));
    }

    #[tokio::test]
    async fn whitespace_mismatch_gets_diagnostic() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "fn main()  {\n    body\n}").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "fn main() {\n  body\n}",
                "new_string": "x"
            }),
        )
        .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("whitespace"));
    }

    #[tokio::test]
    async fn regex_mode_replaces() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "version = \"1.2.3\"").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": r#"version = "[\d.]+""#,
                "new_string": "version = \"2.0.0\"",
                "use_regex": true
            }),
        )
        .await;
        assert!(r.success, "{:?}", r.error);
        assert_eq!(fs::read_to_string(&file).unwrap(), "version = \"2.0.0\"");
    }

    #[tokio::test]
    async fn regex_uniqueness_enforced() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "a1 a2 a3").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": r"a\d",
                "new_string": "x",
                "use_regex": true
            }),
        )
        .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("3 times"));
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "before").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "before",
                "new_string": "after",
                "dry_run": true
            }),
        )
        .await;
        assert!(r.success);
        assert!(r.output.as_deref().unwrap().contains("dry run"));
        assert_eq!(fs::read_to_string(&file).unwrap(), "before");
    }

    #[tokio::test]
    async fn backup_and_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "original").unwrap();

        let ctx = ctx_for(&dir);
        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "original",
                "new_string": "edited",
                "create_backup": true
            }),
        )
        .await;
        assert!(r.success);
        assert_eq!(fs::read_to_string(&file).unwrap(), "edited");

        let r = run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "restore_backup": true
            }),
        )
        .await;
        assert!(r.success, "{:?}", r.error);
        assert_eq!(fs::read_to_string(&file).unwrap(), "original");
    }

    #[tokio::test]
    async fn edit_then_inverse_edit_restores_bytes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        let original = "alpha beta gamma\n";
        fs::write(&file, original).unwrap();

        let ctx = ctx_for(&dir);
        run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "beta",
                "new_string": "BETA"
            }),
        )
        .await;
        run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "BETA",
                "new_string": "beta"
            }),
        )
        .await;
        assert_eq!(fs::read_to_string(&file).unwrap(), original);
    }

    #[tokio::test]
    async fn diff_preview_is_pure() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "one two").unwrap();

        let ctx = ctx_for(&dir);
        let (old, new) = tool(&ctx)
            .diff_preview(
                &ctx,
                &json!({
                    "file_path": file.display().to_string(),
                    "old_string": "two",
                    "new_string": "three"
                }),
            )
            .unwrap();
        assert_eq!(old, "one two");
        assert_eq!(new, "one three");
        assert_eq!(fs::read_to_string(&file).unwrap(), "one two");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn edit_preserves_mode_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("run.sh");
        fs::write(&file, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o750)).unwrap();

        let ctx = ctx_for(&dir);
        run_edit(
            &ctx,
            json!({
                "file_path": file.display().to_string(),
                "old_string": "exit 0",
                "new_string": "exit 1"
            }),
        )
        .await;
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }
}
