//! In-memory audit trail of tool activity.
//!
//! Every tool execution records what was attempted, the risk tier, and the
//! decision, whether or not the call was allowed. The log is append-only
//! and lives for the process lifetime.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::security::RiskLevel;

/// One entry in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub risk_level: RiskLevel,
    pub decision: String,
    pub detail: Option<String>,
}

/// Append-only audit log, safe to share via `Arc`.
#[derive(Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        risk_level: RiskLevel,
        decision: &str,
        detail: Option<&str>,
    ) {
        let entry = AuditEntry {
            timestamp: chrono::Utc::now(),
            tool_name: tool_name.to_string(),
            args,
            risk_level,
            decision: decision.to_string(),
            detail: detail.map(str::to_string),
        };
        if let Ok(mut log) = self.entries.lock() {
            log.push(entry);
        }
    }

    /// Snapshot of the log, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_and_snapshot() {
        let log = AuditLog::new();
        log.record("bash", json!({"command": "ls"}), RiskLevel::Low, "allowed", None);
        log.record(
            "bash",
            json!({"command": "rm -rf /"}),
            RiskLevel::Critical,
            "denied",
            Some("command_blocked"),
        );

        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].decision, "allowed");
        assert_eq!(entries[1].decision, "denied");
        assert_eq!(entries[1].detail.as_deref(), Some("command_blocked"));
    }

    #[test]
    fn empty_log() {
        let log = AuditLog::new();
        assert!(log.is_empty());
    }
}
