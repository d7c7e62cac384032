//! Security layer: path validation, command vetting, SSRF guard, audit log.
//!
//! [`SecurityPolicy`] is the facade the tool executors hold (via `Arc`); it
//! bundles the path rules with the audit trail and delegates command and
//! network checks to the focused submodules.
//!
//! Shell-command vetting here is best-effort screening, not a sandbox:
//! anything the policy allows runs with the full privileges of the host
//! process.

pub mod audit;
pub mod command;
pub mod net;
pub mod path;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use audit::{AuditEntry, AuditLog};
pub use path::{PathPolicy, is_path_within_dir};

use crate::error::SecurityError;

// ─── Shared enums ─────────────────────────────────────────────────────────────

/// Permission decision for a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Execute without asking.
    Auto,
    /// Requires explicit user approval.
    Ask,
    /// Never executed.
    Never,
}

/// Risk tier of a tool or command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

// ─── SecurityPolicy ───────────────────────────────────────────────────────────

/// Facade over the security submodules, shared by every tool executor.
pub struct SecurityPolicy {
    paths: PathPolicy,
    audit: Arc<AuditLog>,
}

impl SecurityPolicy {
    pub fn new(paths: PathPolicy) -> Self {
        Self {
            paths,
            audit: Arc::new(AuditLog::new()),
        }
    }

    /// Policy rooted at the host defaults (cwd, home, system temp).
    pub fn host_defaults() -> Self {
        Self::new(PathPolicy::host_defaults())
    }

    /// Policy confined to the given roots. Used heavily in tests.
    pub fn rooted_at(roots: Vec<PathBuf>) -> Self {
        Self::new(PathPolicy::new(roots))
    }

    // ── Paths ─────────────────────────────────────────────────────────────────

    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, SecurityError> {
        self.paths.validate(path)
    }

    pub fn open_secure(
        &self,
        path: &Path,
        options: &OpenOptions,
    ) -> Result<(std::fs::File, PathBuf), SecurityError> {
        self.paths.open_secure(path, options)
    }

    pub fn open_secure_read(&self, path: &Path) -> Result<(std::fs::File, PathBuf), SecurityError> {
        self.paths.open_secure_read(path)
    }

    pub fn classify_path(&self, path: &Path) -> Permission {
        self.paths.classify(path)
    }

    pub fn is_sensitive_path(&self, path: &Path) -> bool {
        self.paths.is_sensitive(path)
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    pub fn validate_command(&self, cmd: &str) -> Result<(), SecurityError> {
        command::validate_command(cmd)
    }

    pub fn classify_command_risk(&self, cmd: &str) -> RiskLevel {
        command::classify_risk(cmd)
    }

    // ── Audit ─────────────────────────────────────────────────────────────────

    pub fn log_action(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        risk: RiskLevel,
        decision: &str,
        detail: Option<&str>,
    ) {
        self.audit.record(tool_name, args, risk, decision, detail);
    }

    pub fn audit_log(&self) -> Arc<AuditLog> {
        self.audit.clone()
    }
}
