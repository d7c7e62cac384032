//! Shell command vetting.
//!
//! Best-effort screening, not a sandbox: a command that passes here still
//! runs with whatever privileges the host process has. The checks reject
//! privilege escalation, known-destructive invocations, and a set of
//! dangerous patterns; everything else is risk-classified so the registry
//! can decide between auto-approval and asking the user.

use crate::error::SecurityError;
use crate::security::RiskLevel;

// ─── Tokenizer ────────────────────────────────────────────────────────────────

/// Split a command line into tokens, respecting single quotes, double
/// quotes, and backslash escapes. An unclosed quote is an error.
pub fn tokenize(command: &str) -> Result<Vec<String>, SecurityError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '\\' if !in_single => {
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_single || in_double {
        return Err(SecurityError::CommandPattern {
            pattern: "unclosed quote".into(),
        });
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

// ─── Rule tables ──────────────────────────────────────────────────────────────

/// Tokens that escalate privileges; rejected wherever they appear so that
/// `env sudo rm` and friends do not slip through.
const PRIVILEGED_TOKENS: &[&str] = &["sudo", "su", "doas", "pkexec"];

/// Substring matches on the normalized (lowercased, whitespace-collapsed)
/// command.
const BLOCKED_SUBSTRINGS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf *",
    "rm -fr /",
    "mkfs",
    "dd if=/dev/zero of=/dev/sd",
    "dd if=/dev/random of=/dev/sd",
    "shred /dev/",
    ":(){:|:&};:",
    ":(){ :|:& };:",
    "chmod -r 777 /",
    "chown -r",
    "> /dev/sda",
    "wget -o- | sh",
];

/// Patterns that indicate piping untrusted downloads into an interpreter,
/// raw device writes, or sourcing fetched input.
const DANGEROUS_PATTERNS: &[&str] = &[
    "curl | bash",
    "curl | sh",
    "wget | bash",
    "wget | sh",
    "| bash",
    "| sh -",
    "eval $(curl",
    "eval $(wget",
    "eval \"$(curl",
    "source /dev/stdin",
    "> /dev/sd",
    "> /dev/nvme",
    "> /dev/hd",
];

// ─── Validation ───────────────────────────────────────────────────────────────

/// Vet a shell command. Errors carry the matched rule so the model gets an
/// actionable denial message.
pub fn validate_command(command: &str) -> Result<(), SecurityError> {
    let tokens = tokenize(command)?;

    for token in &tokens {
        let bare = token.rsplit('/').next().unwrap_or(token);
        if PRIVILEGED_TOKENS.contains(&bare) {
            return Err(SecurityError::CommandPrivileged {
                token: bare.to_string(),
            });
        }
    }

    let normalized = normalize_for_matching(command);

    for blocked in BLOCKED_SUBSTRINGS {
        if normalized.contains(blocked) {
            return Err(SecurityError::CommandBlocked {
                pattern: (*blocked).to_string(),
            });
        }
    }

    for pattern in DANGEROUS_PATTERNS {
        if normalized.contains(pattern) {
            return Err(SecurityError::CommandPattern {
                pattern: (*pattern).to_string(),
            });
        }
    }

    Ok(())
}

/// Lowercase and collapse runs of whitespace so spacing tricks do not dodge
/// the substring tables.
fn normalize_for_matching(command: &str) -> String {
    let lower = command.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_space = false;
    for c in lower.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out
}

// ─── Risk classification ──────────────────────────────────────────────────────

const LOW_RISK: &[&str] = &[
    "ls", "cat", "grep", "rg", "git", "echo", "pwd", "which", "file", "head", "tail", "wc",
    "sort", "uniq", "diff", "find", "stat", "type", "env", "printenv", "date", "uptime", "ps",
    "du", "df", "tree",
];

const MEDIUM_RISK: &[&str] = &[
    "touch", "mkdir", "cp", "mv", "npm", "yarn", "pnpm", "bun", "pip", "pip3", "cargo", "make",
    "cmake", "gcc", "clang", "rustc", "python", "python3", "node", "go", "tee", "ln", "tar",
    "zip", "unzip", "sed", "awk",
];

/// Classify a command's risk by its first token. Unknown executables are
/// High so that new attack surface defaults to requiring approval.
pub fn classify_risk(command: &str) -> RiskLevel {
    let first = tokenize(command)
        .ok()
        .and_then(|t| t.into_iter().next())
        .unwrap_or_default();
    let bare = first.rsplit('/').next().unwrap_or(&first);

    if LOW_RISK.contains(&bare) {
        RiskLevel::Low
    } else if MEDIUM_RISK.contains(&bare) {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
