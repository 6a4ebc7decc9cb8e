//! Tool trait and registry

use crate::error::Result;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A side-effecting capability the model may invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// JSON schema of the arguments; defaults to an unconstrained object
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    /// Execute the tool with opaque JSON arguments
    async fn call(&self, arguments: serde_json::Value) -> Result<String>;

    /// Declaration handed to the provider
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Name-indexed set of tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; replaces any previous tool of the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase the given text"
        }

        async fn call(&self, arguments: serde_json::Value) -> Result<String> {
            let text = arguments["text"].as_str().unwrap_or_default();
            Ok(text.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_register_and_call() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Upper));

        let tool = registry.get("upper").unwrap();
        let out = tool.call(serde_json::json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "HI");

        assert!(registry.get("missing").is_none());
        assert_eq!(registry.definitions().len(), 1);
        assert_eq!(registry.definitions()[0].name, "upper");
    }
}
