//! Tool contract shared by every executor.
//!
//! A tool receives a [`ToolCtx`] (cancellation token, working directory,
//! security policy, cache, limits) and a JSON argument object, and returns
//! a [`ToolOutcome`]. Tools never return `Err` to the loop — failures are
//! expressed as `success = false` with a human-readable message so the
//! model can react.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::cache::FileCache;
use crate::security::{Permission, RiskLevel, SecurityPolicy};

// ─── ToolOutcome ──────────────────────────────────────────────────────────────

/// Structured result of one tool execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub truncated: bool,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub lines_count: u64,
    pub match_count: u64,
    pub files_matched: u64,
    /// Optional structured payload for machine consumption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            ..Default::default()
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Failure reported when the cancellation token fired mid-execution.
    /// Partial output gathered so far may be attached by the caller.
    pub fn cancelled() -> Self {
        Self::fail("operation cancelled")
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ─── Tool metadata ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn json_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    pub description: String,
}

impl Parameter {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            allowed: None,
            description: description.into(),
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_allowed(mut self, allowed: &[&str]) -> Self {
        self.allowed = Some(allowed.iter().map(|s| (*s).to_string()).collect());
        self
    }
}

/// How the registry decides whether a call may run.
#[derive(Clone)]
pub enum PermissionPolicy {
    /// Same answer for every call.
    Static(Permission),
    /// Inspects the arguments (e.g. sensitive paths, risky commands). An
    /// `Ask` or `Never` from here is final — user preferences cannot
    /// override the security boundary.
    Dynamic(Arc<dyn Fn(&Value) -> Permission + Send + Sync>),
}

impl fmt::Debug for PermissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(p) => write!(f, "Static({p:?})"),
            Self::Dynamic(_) => write!(f, "Dynamic(..)"),
        }
    }
}

/// Catalogue entry describing a tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Short form for the model schema, at most 125 characters.
    pub short_description: String,
    pub parameters: Vec<Parameter>,
    pub risk_level: RiskLevel,
    pub permission: PermissionPolicy,
}

impl ToolSpec {
    /// Render the function-calling JSON shape sent to the model.
    pub fn schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), json!(param.param_type.json_name()));
            prop.insert("description".into(), json!(param.description));
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            if let Some(allowed) = &param.allowed {
                prop.insert("enum".into(), json!(allowed));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.short_description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

// ─── ToolCtx and limits ───────────────────────────────────────────────────────

/// Size and time limits shared by the executors.
#[derive(Debug, Clone)]
pub struct ToolLimits {
    pub max_file_size: u64,
    pub max_line_length: usize,
    pub default_read_limit: usize,
    pub glob_max_results: usize,
    pub grep_max_results: usize,
    pub grep_max_file_size: u64,
    pub shell_output_cap: usize,
    pub shell_default_timeout: Duration,
    pub shell_max_timeout: Duration,
    pub fetch_max_response: usize,
    pub fetch_max_redirects: usize,
    pub fetch_timeout: Duration,
    pub search_timeout: Duration,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_line_length: 2000,
            default_read_limit: 2000,
            glob_max_results: 100,
            grep_max_results: 50,
            grep_max_file_size: 5 * 1024 * 1024,
            shell_output_cap: 100 * 1024,
            shell_default_timeout: Duration::from_secs(30),
            shell_max_timeout: Duration::from_secs(600),
            fetch_max_response: 5 * 1024 * 1024,
            fetch_max_redirects: 5,
            fetch_timeout: Duration::from_secs(30),
            search_timeout: Duration::from_secs(15),
        }
    }
}

/// Per-call execution context handed to every tool.
#[derive(Clone)]
pub struct ToolCtx {
    pub cancel: CancellationToken,
    pub working_dir: PathBuf,
    pub policy: Arc<SecurityPolicy>,
    pub cache: Arc<FileCache>,
    pub limits: ToolLimits,
}

impl ToolCtx {
    pub fn new(policy: Arc<SecurityPolicy>, cache: Arc<FileCache>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            policy,
            cache,
            limits: ToolLimits::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// Derive a child context whose token is cancelled with the parent's.
    pub fn child(&self) -> Self {
        let mut ctx = self.clone();
        ctx.cancel = self.cancel.child_token();
        ctx
    }
}

// ─── Tool trait ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier, e.g. `"read"`.
    fn name(&self) -> &str;

    /// Metadata catalogue entry (schema, risk, permission policy).
    fn spec(&self) -> ToolSpec;

    /// Execute with the given arguments. Must check `ctx.cancel` at entry
    /// and inside any non-trivial loop.
    async fn execute(&self, ctx: &ToolCtx, args: &Value) -> ToolOutcome;
}

// ─── Argument helpers ─────────────────────────────────────────────────────────

pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required argument '{key}'"))
}

pub(crate) fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn opt_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

pub(crate) fn opt_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
