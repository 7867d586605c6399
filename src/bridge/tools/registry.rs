//! The Tool Registry: in-memory `name -> (ToolDefinition, handler)`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::request::ToolDefinition;
use crate::bridge::tools::context::ToolExecutionContext;

/// A tool's executable side. Kept separate from `ToolDefinition` (the
/// caller-supplied, never-mutated metadata) so registering a tool is a
/// `(ToolDefinition, Arc<dyn ToolHandler>)` pair: metadata bound to the
/// handler that actually runs it.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, parameters: serde_json::Value, context: &ToolExecutionContext) -> Result<serde_json::Value, BridgeError>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Validates the definition (non-empty name, an object-shaped schema)
    /// and fails on duplicate names unless `replace` is set.
    pub async fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
        replace: bool,
    ) -> Result<(), BridgeError> {
        if definition.name.trim().is_empty() {
            return Err(BridgeError::new(ErrorKind::Validation, "tool name must not be empty"));
        }
        if !definition.input_schema.is_object() && !definition.input_schema.is_null() {
            return Err(BridgeError::new(ErrorKind::Validation, "tool inputSchema must be a structured object"));
        }
        let mut tools = self.tools.write().await;
        if !replace && tools.contains_key(&definition.name) {
            return Err(
                BridgeError::new(ErrorKind::Validation, format!("tool '{}' is already registered", definition.name))
                    .with_context("toolName", definition.name.clone()),
            );
        }
        tools.insert(definition.name.clone(), RegisteredTool { definition, handler });
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.tools.write().await.remove(name).is_some()
    }

    pub async fn get_handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.read().await.get(name).map(|t| t.handler.clone())
    }

    pub async fn get_definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.read().await.get(name).map(|t| t.definition.clone())
    }

    pub async fn list_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.read().await.values().map(|t| t.definition.clone()).collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
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

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, parameters: serde_json::Value, _context: &ToolExecutionContext) -> Result<serde_json::Value, BridgeError> {
            Ok(parameters)
        }
    }

    #[tokio::test]
    async fn register_and_dispatch_round_trip() {
        let registry = ToolRegistry::new();
        let def = ToolDefinition::new("echo", "echoes input", serde_json::json!({"type": "object"}));
        registry.register(def, Arc::new(EchoHandler), false).await.unwrap();
        assert!(registry.contains("echo").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_registration_without_replace_fails() {
        let registry = ToolRegistry::new();
        let def = ToolDefinition::new("echo", "echoes input", serde_json::json!({}));
        registry.register(def.clone(), Arc::new(EchoHandler), false).await.unwrap();
        let err = registry.register(def, Arc::new(EchoHandler), false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn duplicate_registration_with_replace_succeeds() {
        let registry = ToolRegistry::new();
        let def = ToolDefinition::new("echo", "echoes input", serde_json::json!({}));
        registry.register(def.clone(), Arc::new(EchoHandler), false).await.unwrap();
        registry.register(def, Arc::new(EchoHandler), true).await.unwrap();
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let registry = ToolRegistry::new();
        let def = ToolDefinition::new("", "bad", serde_json::json!({}));
        let err = registry.register(def, Arc::new(EchoHandler), false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
