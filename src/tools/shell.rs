//! Shell execution tool.
//!
//! Commands are vetted by the security layer, then run under `bash -c` in
//! their own process group with stdin detached — the child never sees the
//! user's TTY. The wait is raced against the timeout and the cancellation
//! token; on either, the child is killed and whatever output was captured
//! is returned with the failure.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

use crate::security::{Permission, RiskLevel, SecurityPolicy};
use crate::tools::traits::{
    ParamType, Parameter, PermissionPolicy, Tool, ToolCtx, ToolOutcome, ToolSpec, opt_str,
    opt_u64, require_str,
};
use crate::util::format_duration;

// ─── BashTool ─────────────────────────────────────────────────────────────────

pub struct BashTool {
    policy: Arc<SecurityPolicy>,
}

impl BashTool {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn spec(&self) -> ToolSpec {
        let policy = self.policy.clone();
        ToolSpec {
            name: "bash".into(),
            description: "Execute a shell command and return its interleaved stdout/stderr. The \
                          command runs without a TTY in its own process group and is killed when \
                          the timeout expires. Privileged and destructive commands are refused. \
                          No background jobs."
                .into(),
            short_description: "Run a shell command with a timeout; output is captured.".into(),
            parameters: vec![
                Parameter::required("command", ParamType::String, "Command to execute."),
                Parameter::optional("timeout", ParamType::Integer, "Timeout in seconds (max 600).")
                    .with_default(json!(30)),
                Parameter::optional(
                    "description",
                    ParamType::String,
                    "What the command does, for display.",
                ),
            ],
            risk_level: RiskLevel::High,
            permission: PermissionPolicy::Dynamic(Arc::new(move |args: &Value| {
                let Some(command) = args.get("command").and_then(Value::as_str) else {
                    return Permission::Ask;
                };
                if policy.validate_command(command).is_err() {
                    return Permission::Never;
                }
                match policy.classify_command_risk(command) {
                    RiskLevel::Low => Permission::Auto,
                    _ => Permission::Ask,
                }
            })),
        }
    }

    async fn execute(&self, ctx: &ToolCtx, args: &Value) -> ToolOutcome {
        let started = std::time::Instant::now();
        if ctx.cancel.is_cancelled() {
            return ToolOutcome::cancelled();
        }

        let command = match require_str(args, "command") {
            Ok(c) => c.to_string(),
            Err(e) => return ToolOutcome::fail(e),
        };
        let _description = opt_str(args, "description");

        let timeout = Duration::from_secs(
            opt_u64(args, "timeout")
                .unwrap_or(ctx.limits.shell_default_timeout.as_secs())
                .min(ctx.limits.shell_max_timeout.as_secs()),
        );

        if has_background_operator(&command) {
            return ToolOutcome::fail(
                "background execution with '&' is not supported; run the command in the foreground",
            );
        }

        let risk = self.policy.classify_command_risk(&command);
        if let Err(e) = self.policy.validate_command(&command) {
            self.policy.log_action(
                self.name(),
                json!({"command": command}),
                RiskLevel::Critical,
                "denied",
                Some(e.kind()),
            );
            return ToolOutcome::fail(format!("command denied: {e}"));
        }
        self.policy.log_action(
            self.name(),
            json!({"command": command}),
            risk,
            "allowed",
            None,
        );

        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Detach from the parent's process group (and TTY job control).
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolOutcome::fail(format!("failed to spawn command: {e}")),
        };

        // Interleave stdout and stderr in arrival order, capped.
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(BufReader::new(stdout), tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(BufReader::new(stderr), tx.clone()));
        }
        drop(tx);

        let cap = ctx.limits.shell_output_cap;
        let mut output = Vec::with_capacity(8 * 1024);
        let mut truncated = false;

        // One deadline for the whole run; recreating it per select arm
        // would let a chatty child reset its own timeout.
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                chunk = rx.recv() => {
                    match chunk {
                        Some(bytes) => append_capped(&mut output, &bytes, cap, &mut truncated),
                        // Pipes closed; wait for exit below.
                        None => break child.wait().await,
                    }
                }
                status = child.wait() => {
                    // Drain whatever the readers still have buffered.
                    while let Some(bytes) = rx.recv().await {
                        append_capped(&mut output, &bytes, cap, &mut truncated);
                    }
                    break status;
                }
                _ = &mut deadline => {
                    let _ = child.start_kill();
                    let text = String::from_utf8_lossy(&output).into_owned();
                    let mut outcome = ToolOutcome::fail(format!(
                        "command timed out after {}", format_duration(timeout)
                    )).with_duration(started.elapsed());
                    outcome.output = Some(text);
                    outcome.truncated = truncated;
                    return outcome;
                }
                _ = ctx.cancel.cancelled() => {
                    let _ = child.start_kill();
                    let mut outcome = ToolOutcome::cancelled().with_duration(started.elapsed());
                    outcome.output = Some(String::from_utf8_lossy(&output).into_owned());
                    outcome.truncated = truncated;
                    return outcome;
                }
            }
        };

        let status = match status {
            Ok(s) => s,
            Err(e) => return ToolOutcome::fail(format!("failed to wait for command: {e}")),
        };

        let text = String::from_utf8_lossy(&output).into_owned();
        let exit_code = status.code();

        let mut outcome = if status.success() {
            ToolOutcome::ok(text)
        } else {
            let mut o = ToolOutcome::fail(format!(
                "command exited with status {}",
                exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string())
            ));
            o.output = Some(text);
            o
        };
        outcome.duration = started.elapsed();
        outcome.truncated = truncated;
        outcome.bytes_read = output.len() as u64;
        outcome.metadata = Some(json!({ "exit_code": exit_code }));
        outcome
    }
}

/// A bare `&` backgrounds a job; `&&` chaining and `1>&2` redirects are
/// fine.
fn has_background_operator(command: &str) -> bool {
    let bytes = command.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'&' {
            continue;
        }
        let prev = i.checked_sub(1).map(|j| bytes[j]);
        let next = bytes.get(i + 1).copied();
        if prev == Some(b'&') || next == Some(b'&') {
            continue; // part of &&
        }
        if prev == Some(b'>') || prev == Some(b'<') {
            continue; // fd redirect like 1>&2
        }
        if next.is_some_and(|n| n.is_ascii_digit()) {
            continue; // &1 in redirects
        }
        return true;
    }
    false
}

/// Forward reader chunks into the channel until EOF.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn append_capped(output: &mut Vec<u8>, bytes: &[u8], cap: usize, truncated: &mut bool) {
    if output.len() >= cap {
        *truncated = true;
        return;
    }
    let room = cap - output.len();
    if bytes.len() > room {
        output.extend_from_slice(&bytes[..room]);
        *truncated = true;
    } else {
        output.extend_from_slice(bytes);
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn ctx_for(dir: &TempDir) -> ToolCtx {
        let policy = Arc::new(SecurityPolicy::rooted_at(vec![dir.path().to_path_buf()]));
        ToolCtx::new(policy, Arc::new(FileCache::default()))
            .with_working_dir(dir.path().to_path_buf())
    }

    fn tool(ctx: &ToolCtx) -> BashTool {
        BashTool::new(ctx.policy.clone())
    }

    #[tokio::test]
    async fn echo_captures_stdout() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(&ctx, &json!({"command": "echo hello"}))
            .await;
        assert!(r.success, "{:?}", r.error);
        assert!(r.output.as_deref().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn stderr_is_captured_too() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(&ctx, &json!({"command": "echo oops 1>&2"}))
            .await;
        assert!(r.output.as_deref().unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_output() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(&ctx, &json!({"command": "echo partial; exit 3"}))
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("3"));
        assert!(r.output.as_deref().unwrap().contains("partial"));
    }

    #[tokio::test]
    async fn blocked_command_is_denied() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(&ctx, &json!({"command": "sudo rm -rf /tmp/x"}))
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("denied"));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let started = std::time::Instant::now();
        let r = tool(&ctx)
            .execute(&ctx, &json!({"command": "sleep 30", "timeout": 1}))
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn timeout_preserves_partial_output() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({"command": "echo early; sleep 30", "timeout": 1}),
            )
            .await;
        assert!(!r.success);
        assert!(r.output.as_deref().unwrap_or("").contains("early"));
    }

    #[tokio::test]
    async fn cancellation_preempts() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let ctx = ctx_for(&dir).with_cancel(cancel.clone());

        let handle = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                BashTool::new(ctx.policy.clone())
                    .execute(&ctx, &json!({"command": "sleep 30"}))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let r = handle.await.unwrap();
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("operation cancelled"));
    }

    #[tokio::test]
    async fn output_cap_truncates() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx_for(&dir);
        ctx.limits.shell_output_cap = 64;
        let r = tool(&ctx)
            .execute(&ctx, &json!({"command": "yes x | head -n 1000"}))
            .await;
        assert!(r.truncated);
        assert!(r.output.as_deref().unwrap().len() <= 64);
    }

    #[tokio::test]
    async fn timeout_is_capped_at_max() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        // A timeout over the cap is clamped rather than rejected; the quick
        // command still completes normally.
        let r = tool(&ctx)
            .execute(&ctx, &json!({"command": "true", "timeout": 9999}))
            .await;
        assert!(r.success);
    }

    #[test]
    fn background_operator_detection() {
        assert!(has_background_operator("sleep 10 &"));
        assert!(has_background_operator("cmd & other"));
        assert!(!has_background_operator("a && b"));
        assert!(!has_background_operator("echo x 1>&2"));
        assert!(!has_background_operator("echo plain"));
    }

    #[tokio::test]
    async fn backgrounding_is_refused() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx_for(&dir);
        let r = tool(&ctx)
            .execute(&ctx, &json!({"command": "sleep 30 &"}))
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("background"));
    }

    #[tokio::test]
    async fn working_dir_is_respected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let ctx = ctx_for(&dir);
        let r = tool(&ctx).execute(&ctx, &json!({"command": "ls"})).await;
        assert!(r.output.as_deref().unwrap().contains("marker.txt"));
    }
}
