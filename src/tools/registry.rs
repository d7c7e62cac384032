//! Central registry of tools and permission resolution.
//!
//! Permission precedence is security-first: a tool's own dynamic policy can
//! force `Ask` or `Never` regardless of user preferences; `always_allow`
//! and admin overrides only apply below that boundary.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::security::Permission;
use crate::tools::traits::{PermissionPolicy, Tool, ToolSpec};

struct Inner {
    tools: HashMap<String, Arc<dyn Tool>>,
    overrides: HashMap<String, Permission>,
    always_allow: HashSet<String>,
}

/// Shared catalogue of tools. Reads are frequent (every dispatch), writes
/// rare (startup registration, preference changes), so state sits behind an
/// `RwLock`.
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                tools: HashMap::new(),
                overrides: HashMap::new(),
                always_allow: HashSet::new(),
            }),
        }
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.tools.insert(tool.name().to_string(), tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.inner.read().ok()?.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.tools.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Specs of all registered tools, sorted by name for stable output.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        let mut specs: Vec<ToolSpec> = inner.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Function-calling schemas for every tool, ready to attach to a chat
    /// request.
    pub fn schemas(&self) -> Vec<Value> {
        self.specs().iter().map(ToolSpec::schema).collect()
    }

    // ── Permission state ──────────────────────────────────────────────────────

    /// Admin-level override for a tool's static permission.
    pub fn set_override(&self, name: &str, permission: Permission) {
        if let Ok(mut inner) = self.inner.write() {
            inner.overrides.insert(name.to_string(), permission);
        }
    }

    /// User preference: skip asking for this tool.
    pub fn allow_always(&self, name: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.always_allow.insert(name.to_string());
        }
    }

    pub fn clear_always_allow(&self, name: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.always_allow.remove(name);
        }
    }

    /// Resolve the permission for one call.
    ///
    /// 1. A dynamic policy answering `Ask` or `Never` is final.
    /// 2. `always_allow` short-circuits to `Auto`.
    /// 3. An admin override applies next.
    /// 4. Otherwise the tool's static default.
    pub fn permission_for(&self, name: &str, args: &Value) -> Permission {
        let Ok(inner) = self.inner.read() else {
            return Permission::Never;
        };
        let Some(tool) = inner.tools.get(name) else {
            return Permission::Never;
        };

        let spec = tool.spec();
        let static_default = match &spec.permission {
            PermissionPolicy::Static(p) => *p,
            PermissionPolicy::Dynamic(f) => {
                let decided = f(args);
                if decided != Permission::Auto {
                    return decided;
                }
                Permission::Auto
            }
        };

        if inner.always_allow.contains(name) {
            return Permission::Auto;
        }
        if let Some(overridden) = inner.overrides.get(name) {
            return *overridden;
        }
        static_default
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::RiskLevel;
    use crate::tools::traits::{ToolCtx, ToolOutcome};
    use async_trait::async_trait;
    use serde_json::json;

    struct StubTool {
        name: &'static str,
        permission: PermissionPolicy,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.into(),
                description: "stub".into(),
                short_description: "stub".into(),
                parameters: vec![],
                risk_level: RiskLevel::Low,
                permission: self.permission.clone(),
            }
        }

        async fn execute(&self, _ctx: &ToolCtx, _args: &Value) -> ToolOutcome {
            ToolOutcome::ok("done")
        }
    }

    fn static_tool(name: &'static str, p: Permission) -> Arc<dyn Tool> {
        Arc::new(StubTool {
            name,
            permission: PermissionPolicy::Static(p),
        })
    }

    #[test]
    fn register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(static_tool("echo", Permission::Auto));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_tool_is_never() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.permission_for("ghost", &json!({})), Permission::Never);
    }

    #[test]
    fn static_default_applies() {
        let registry = ToolRegistry::new();
        registry.register(static_tool("ask_tool", Permission::Ask));
        assert_eq!(
            registry.permission_for("ask_tool", &json!({})),
            Permission::Ask
        );
    }

    #[test]
    fn always_allow_overrides_static_ask() {
        let registry = ToolRegistry::new();
        registry.register(static_tool("ask_tool", Permission::Ask));
        registry.allow_always("ask_tool");
        assert_eq!(
            registry.permission_for("ask_tool", &json!({})),
            Permission::Auto
        );
    }

    #[test]
    fn admin_override_applies_after_always_allow() {
        let registry = ToolRegistry::new();
        registry.register(static_tool("t", Permission::Auto));
        registry.set_override("t", Permission::Never);
        assert_eq!(registry.permission_for("t", &json!({})), Permission::Never);
    }

    #[test]
    fn dynamic_ask_cannot_be_bypassed() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool {
            name: "guarded",
            permission: PermissionPolicy::Dynamic(Arc::new(|args: &Value| {
                if args.get("sensitive").is_some() {
                    Permission::Ask
                } else {
                    Permission::Auto
                }
            })),
        }));
        registry.allow_always("guarded");

        // Dynamic Ask wins over always_allow.
        assert_eq!(
            registry.permission_for("guarded", &json!({"sensitive": true})),
            Permission::Ask
        );
        // Dynamic Auto falls through to the preference.
        assert_eq!(
            registry.permission_for("guarded", &json!({})),
            Permission::Auto
        );
    }

    #[test]
    fn schemas_are_sorted_by_name() {
        let registry = ToolRegistry::new();
        registry.register(static_tool("zeta", Permission::Auto));
        registry.register(static_tool("alpha", Permission::Auto));
        let schemas = registry.schemas();
        assert_eq!(schemas[0]["function"]["name"], "alpha");
        assert_eq!(schemas[1]["function"]["name"], "zeta");
    }
}
