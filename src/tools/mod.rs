//! Tool executors and the registry that catalogues them.

pub mod edit;
pub mod glob;
pub mod grep;
pub mod html;
pub mod read;
pub mod registry;
pub mod shell;
pub mod traits;
pub mod web_fetch;
pub mod web_search;
pub mod write;

use std::sync::Arc;

use crate::security::SecurityPolicy;

pub use edit::EditTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use read::ReadTool;
pub use registry::ToolRegistry;
pub use shell::BashTool;
pub use traits::{
    ParamType, Parameter, PermissionPolicy, Tool, ToolCtx, ToolLimits, ToolOutcome, ToolSpec,
};
pub use web_fetch::WebFetchTool;
pub use web_search::WebSearchTool;
pub use write::WriteTool;

/// Register the built-in tool set.
pub fn register_builtin_tools(registry: &ToolRegistry, policy: Arc<SecurityPolicy>) {
    registry.register(Arc::new(ReadTool::new(policy.clone())));
    registry.register(Arc::new(WriteTool::new(policy.clone())));
    registry.register(Arc::new(EditTool::new(policy.clone())));
    registry.register(Arc::new(GlobTool::new(policy.clone())));
    registry.register(Arc::new(GrepTool::new(policy.clone())));
    registry.register(Arc::new(BashTool::new(policy.clone())));
    registry.register(Arc::new(WebFetchTool::new(policy.clone())));
    registry.register(Arc::new(WebSearchTool::new(policy)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_registers_all_eight() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry, Arc::new(SecurityPolicy::host_defaults()));
        assert_eq!(registry.len(), 8);
        for name in [
            "read", "write", "edit", "glob", "grep", "bash", "web_fetch", "web_search",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
    }
}
