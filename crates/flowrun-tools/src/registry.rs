use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use flowrun_core::config::ToolsConfig;
use flowrun_core::traits::Tool;

use crate::builtin::{EmailTool, N8nTool, SheetsAppendTool, SheetsReadTool, WhatsAppTool};

/// Node type to tool name, for the node types the built-in tools serve.
const DEFAULT_TYPE_MAP: &[(&str, &str)] = &[
    ("action.email.send", "email.send"),
    ("action.google_sheets.read", "google_sheets.read"),
    ("action.google_sheets.append_row", "google_sheets.append"),
    ("action.whatsapp.send", "whatsapp.send"),
    ("external.n8n", "n8n.trigger"),
];

/// Registry of available tools, keyed by name, plus the node-type mapping
/// used to resolve action and external nodes.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    type_map: HashMap<String, String>,
}

impl ToolRegistry {
    /// Empty registry carrying the default node-type mapping.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            type_map: DEFAULT_TYPE_MAP
                .iter()
                .map(|(t, n)| (t.to_string(), n.to_string()))
                .collect(),
        }
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
    }

    /// Route a node type to a tool name.
    pub fn map_type(&mut self, node_type: impl Into<String>, tool_name: impl Into<String>) {
        self.type_map.insert(node_type.into(), tool_name.into());
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Resolve the tool serving a node type. Unmapped types have none.
    pub fn get_by_type(&self, node_type: &str) -> Option<Arc<dyn Tool>> {
        self.type_map
            .get(node_type)
            .and_then(|name| self.get(name))
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Node type mappings, sorted by node type.
    pub fn type_mappings(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .type_map
            .iter()
            .map(|(t, n)| (t.as_str(), n.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Create a registry with the built-in tools, each configured from `config`.
    pub fn with_defaults(config: &ToolsConfig) -> Self {
        let mut registry = Self::new();

        registry.register(EmailTool::new(config.email.clone()));
        registry.register(WhatsAppTool::new(config.whatsapp.clone()));
        registry.register(SheetsReadTool::new(config.google_sheets.clone()));
        registry.register(SheetsAppendTool::new(config.google_sheets.clone()));
        registry.register(N8nTool::new(config.n8n.clone()));

        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_by_type() {
        let registry = ToolRegistry::with_defaults(&ToolsConfig::default());
        assert_eq!(
            registry.list(),
            vec![
                "email.send",
                "google_sheets.append",
                "google_sheets.read",
                "n8n.trigger",
                "whatsapp.send"
            ]
        );
        for (node_type, tool) in DEFAULT_TYPE_MAP {
            assert_eq!(registry.get_by_type(node_type).unwrap().name(), *tool);
        }
        assert!(registry.get_by_type("action.sms.send").is_none());
        assert!(registry.get_by_type("email.send").is_none());
    }

    #[test]
    fn test_unconfigured_tools_report_mock_mode() {
        let registry = ToolRegistry::with_defaults(&ToolsConfig::default());
        for name in registry.list() {
            assert!(!registry.get(name).unwrap().is_configured(), "{name}");
        }
    }

    #[test]
    fn test_map_type_to_missing_tool() {
        let mut registry = ToolRegistry::new();
        registry.map_type("action.custom", "custom.run");
        assert!(registry.get_by_type("action.custom").is_none());
        assert!(registry
            .type_mappings()
            .contains(&("action.custom", "custom.run")));
    }
}
