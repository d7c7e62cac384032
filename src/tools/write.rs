//! File write tool: atomic replace with optional backup.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::security::{Permission, RiskLevel, SecurityPolicy};
use crate::tools::traits::{
    ParamType, Parameter, PermissionPolicy, Tool, ToolCtx, ToolOutcome, ToolSpec, opt_bool,
    require_str,
};

/// Write `content` to `path` atomically: temp file in the target directory,
/// fsync, rename over the destination. A reader sees either the old file or
/// the new one, never a partial write. Returns the previous size when the
/// target existed.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<Option<u64>, String> {
    use std::io::Write;

    let parent = path
        .parent()
        .ok_or_else(|| format!("'{}' has no parent directory", path.display()))?;

    let previous = std::fs::metadata(path).ok().map(|m| m.len());
    #[cfg(unix)]
    let previous_mode = std::fs::metadata(path)
        .ok()
        .map(|m| std::os::unix::fs::PermissionsExt::mode(&m.permissions()));

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| format!("failed to create temp file in '{}': {e}", parent.display()))?;
    tmp.write_all(content)
        .map_err(|e| format!("failed to write temp file: {e}"))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| format!("failed to fsync temp file: {e}"))?;
    tmp.persist(path)
        .map_err(|e| format!("failed to rename into place: {e}"))?;

    // Renaming replaces the inode; carry the old mode bits forward.
    #[cfg(unix)]
    if let Some(mode) = previous_mode {
        let _ = std::fs::set_permissions(
            path,
            std::os::unix::fs::PermissionsExt::from_mode(mode),
        );
    }

    Ok(previous)
}

// ─── WriteTool ────────────────────────────────────────────────────────────────

pub struct WriteTool {
    policy: Arc<SecurityPolicy>,
}

impl WriteTool {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn spec(&self) -> ToolSpec {
        let policy = self.policy.clone();
        ToolSpec {
            name: "write".into(),
            description: "Write content to a file, creating parent directories as needed. The \
                          write is atomic: readers never observe a partially written file. Set \
                          backup=true to keep the previous version at <path>.bak."
                .into(),
            short_description: "Write a file atomically, creating parent directories.".into(),
            parameters: vec![
                Parameter::required("file_path", ParamType::String, "Destination path."),
                Parameter::required("content", ParamType::String, "Content to write."),
                Parameter::optional("backup", ParamType::Boolean, "Copy the old file to .bak first.")
                    .with_default(json!(false)),
            ],
            risk_level: RiskLevel::Medium,
            permission: PermissionPolicy::Dynamic(Arc::new(move |args: &Value| {
                match args.get("file_path").and_then(Value::as_str) {
                    Some(p) => match policy.classify_path(Path::new(p)) {
                        Permission::Auto => Permission::Ask, // writes always confirm
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

        let path = match require_str(args, "file_path") {
            Ok(p) => std::path::PathBuf::from(p),
            Err(e) => return ToolOutcome::fail(e),
        };
        let content = match require_str(args, "content") {
            Ok(c) => c,
            Err(e) => return ToolOutcome::fail(e),
        };
        let backup = opt_bool(args, "backup").unwrap_or(false);

        if content.len() as u64 > ctx.limits.max_file_size {
            return ToolOutcome::fail(format!(
                "content is {} bytes, over the {} byte limit",
                content.len(),
                ctx.limits.max_file_size
            ));
        }

        if self.policy.is_sensitive_path(&path) {
            self.policy.log_action(
                self.name(),
                json!({"file_path": path.display().to_string()}),
                RiskLevel::Medium,
                "denied",
                Some("sensitive_file"),
            );
            return ToolOutcome::fail(format!(
                "'{}' matches a sensitive file pattern and cannot be written",
                path.display()
            ));
        }

        let real = match self.policy.validate_path(&path) {
            Ok(p) => p,
            Err(e) => {
                self.policy.log_action(
                    self.name(),
                    json!({"file_path": path.display().to_string()}),
                    RiskLevel::Medium,
                    "denied",
                    Some(e.kind()),
                );
                return ToolOutcome::fail(e.to_string()).with_duration(started.elapsed());
            }
        };

        if real.is_dir() {
            return ToolOutcome::fail(format!("'{}' is a directory", real.display()));
        }

        if let Some(parent) = real.parent()
            && !parent.exists()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            return ToolOutcome::fail(format!(
                "failed to create parent directories for '{}': {e}",
                real.display()
            ));
        }

        if backup && real.exists() {
            let bak = backup_path(&real);
            if let Err(e) = std::fs::copy(&real, &bak) {
                return ToolOutcome::fail(format!(
                    "failed to write backup '{}': {e}",
                    bak.display()
                ));
            }
        }

        let previous = match atomic_write(&real, content.as_bytes()) {
            Ok(prev) => prev,
            Err(e) => return ToolOutcome::fail(e).with_duration(started.elapsed()),
        };

        // The on-disk file changed under any cached copy.
        ctx.cache.invalidate(&real);

        self.policy.log_action(
            self.name(),
            json!({"file_path": real.display().to_string(), "bytes": content.len()}),
            RiskLevel::Medium,
            "allowed",
            None,
        );

        let message = match previous {
            Some(old) => format!(
                "wrote {} bytes to '{}' (replaced {} bytes)",
                content.len(),
                real.display(),
                old
            ),
            None => format!("wrote {} bytes to '{}'", content.len(), real.display()),
        };

        let mut outcome = ToolOutcome::ok(message).with_duration(started.elapsed());
        outcome.bytes_written = content.len() as u64;
        outcome.lines_count = content.lines().count() as u64;
        outcome.metadata = Some(json!({
            "path": real.display().to_string(),
            "previous_size": previous,
        }));
        outcome
    }
}

pub(crate) fn backup_path(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".bak");
    std::path::PathBuf::from(os)
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

    fn tool(ctx: &ToolCtx) -> WriteTool {
        WriteTool::new(ctx.policy.clone())
    }

    #[tokio::test]
    async fn creates_new_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("out.txt");

        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({"file_path": file.display().to_string(), "content": "written"}),
            )
            .await;
        assert!(r.success, "{:?}", r.error);
        assert_eq!(fs::read_to_string(&file).unwrap(), "written");
        assert_eq!(r.bytes_written, 7);
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a/b/c/deep.txt");

        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({"file_path": file.display().to_string(), "content": "x"}),
            )
            .await;
        assert!(r.success, "{:?}", r.error);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn overwrite_reports_previous_size() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "old content!").unwrap();

        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({"file_path": file.display().to_string(), "content": "new"}),
            )
            .await;
        assert!(r.success);
        assert!(r.output.as_deref().unwrap().contains("replaced 12 bytes"));
        assert_eq!(fs::read_to_string(&file).unwrap(), "new");
    }

    #[tokio::test]
    async fn backup_keeps_old_content() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "original").unwrap();

        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({
                    "file_path": file.display().to_string(),
                    "content": "replaced",
                    "backup": true
                }),
            )
            .await;
        assert!(r.success);
        assert_eq!(fs::read_to_string(backup_path(&file)).unwrap(), "original");
        assert_eq!(fs::read_to_string(&file).unwrap(), "replaced");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn overwrite_preserves_mode_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("script.sh");
        fs::write(&file, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();

        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({"file_path": file.display().to_string(), "content": "#!/bin/sh\necho hi\n"}),
            )
            .await;
        assert!(r.success);
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[tokio::test]
    async fn directory_target_is_refused() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({"file_path": sub.display().to_string(), "content": "x"}),
            )
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("directory"));
    }

    #[tokio::test]
    async fn sensitive_target_is_refused() {
        let dir = TempDir::new().unwrap();
        let env = dir.path().join(".env");

        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({"file_path": env.display().to_string(), "content": "KEY=1"}),
            )
            .await;
        assert!(!r.success);
        assert!(!env.exists());
    }

    #[tokio::test]
    async fn oversized_content_is_refused() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx_for(&dir);
        ctx.limits.max_file_size = 8;

        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({
                    "file_path": dir.path().join("f").display().to_string(),
                    "content": "123456789"
                }),
            )
            .await;
        assert!(!r.success);
    }

    #[tokio::test]
    async fn write_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "v1").unwrap();

        let ctx = ctx_for(&dir);
        let real = ctx.policy.validate_path(&file).unwrap();
        let mtime = fs::metadata(&file).unwrap().modified().unwrap();
        ctx.cache.put(&real, "v1", mtime, 1);

        tool(&ctx)
            .execute(
                &ctx,
                &json!({"file_path": file.display().to_string(), "content": "v2"}),
            )
            .await;
        // Entry must be gone regardless of mtime granularity.
        assert_eq!(ctx.cache.stats().entries, 0);
    }
}
