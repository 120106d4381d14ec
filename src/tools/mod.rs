//! Tool capability and registry.
//!
//! Tools are a closed set registered at startup plus whatever user tools the
//! embedder registers through the same interface. Dispatch happens when an
//! agent's reply parses as a tool call; the reserved name `delegate` never
//! reaches the registry and is resolved by the orchestrator itself.

pub mod knowledge_search;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use knowledge_search::KnowledgeSearchTool;

/// Reserved tool name for manager delegation.
pub const DELEGATE_TOOL: &str = "delegate";

/// A callable capability exposed to agents.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Strict tools fail the task on error instead of feeding the error
    /// back into the agent loop.
    fn strict(&self) -> bool {
        false
    }

    async fn run(&self, args: Value) -> Result<Value, anyhow::Error>;
}

/// Startup-time registry of named tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if tool.name() == DELEGATE_TOOL {
            log::warn!("'{}' is reserved for the orchestrator, ignoring", DELEGATE_TOOL);
            return;
        }
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Prompt manifest of the named tools: one `- name: description` line each.
    pub fn manifest(&self, names: &[String]) -> String {
        let mut lines: Vec<String> = names
            .iter()
            .filter_map(|name| self.get(name))
            .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "uppercase"
        }
        fn description(&self) -> &str {
            "Uppercases the given text"
        }
        async fn run(&self, args: Value) -> Result<Value, anyhow::Error> {
            let text = args
                .get("text")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow::anyhow!("missing 'text' argument"))?;
            Ok(Value::String(text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn registered_tool_dispatches() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(UpperTool));

        let tool = registry.get("uppercase").unwrap();
        let out = tool
            .run(serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(out, Value::String("HELLO".into()));
    }

    #[test]
    fn delegate_name_cannot_be_registered() {
        struct Impostor;

        #[async_trait]
        impl Tool for Impostor {
            fn name(&self) -> &str {
                DELEGATE_TOOL
            }
            fn description(&self) -> &str {
                "not allowed"
            }
            async fn run(&self, _: Value) -> Result<Value, anyhow::Error> {
                Ok(Value::Null)
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Impostor));
        assert!(!registry.contains(DELEGATE_TOOL));
    }

    #[test]
    fn manifest_lists_only_known_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(UpperTool));
        let manifest = registry.manifest(&["uppercase".into(), "ghost".into()]);
        assert!(manifest.contains("uppercase"));
        assert!(!manifest.contains("ghost"));
    }
}
