//! `McpToolRegistry`: discovers a connected `McpClient`'s remote tools and
//! registers them into a `ToolRouter`'s underlying `ToolRegistry`, wrapping
//! each one as a `ToolHandler` that shapes the call through
//! `McpCall -> McpResult`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::mcp::client::{McpCall, McpClient};
use crate::bridge::tools::context::ToolExecutionContext;
use crate::bridge::tools::registry::{ToolHandler, ToolRegistry};

struct McpToolAdapter {
    client: Arc<McpClient>,
    tool_name: String,
}

#[async_trait]
impl ToolHandler for McpToolAdapter {
    async fn call(&self, parameters: serde_json::Value, _context: &ToolExecutionContext) -> Result<serde_json::Value, BridgeError> {
        let result = self
            .client
            .call(McpCall {
                tool: self.tool_name.clone(),
                parameters,
            })
            .await?;
        if result.success {
            Ok(result.data.unwrap_or(serde_json::Value::Null))
        } else {
            Err(BridgeError::new(
                ErrorKind::Tool,
                result.error.unwrap_or_else(|| "MCP tool call failed".to_string()),
            ))
        }
    }
}

pub struct McpToolRegistry {
    client: Arc<McpClient>,
    registered_names: RwLock<Vec<String>>,
    registered_count: AtomicUsize,
}

impl McpToolRegistry {
    pub fn new(client: Arc<McpClient>) -> Self {
        McpToolRegistry {
            client,
            registered_names: RwLock::new(Vec::new()),
            registered_count: AtomicUsize::new(0),
        }
    }

    /// Discovers the remote tools and registers each as a name-prefixed
    /// handler on `router`'s registry. A per-server name prefix avoids
    /// collisions between two MCP servers that happen to expose a tool
    /// with the same bare name.
    pub async fn register_mcp_tools(&self, registry: &ToolRegistry) -> Result<usize, BridgeError> {
        let definitions = self.client.list_tools().await?;
        let mut names = self.registered_names.write().await;
        let mut registered = 0;
        for definition in definitions {
            let adapter = McpToolAdapter {
                client: self.client.clone(),
                tool_name: definition.name.clone(),
            };
            registry.register(definition.clone(), Arc::new(adapter), true).await?;
            names.push(definition.name);
            registered += 1;
        }
        self.registered_count.store(registered, Ordering::SeqCst);
        Ok(registered)
    }

    pub async fn unregister_mcp_tools(&self, registry: &ToolRegistry) {
        let mut names = self.registered_names.write().await;
        for name in names.drain(..) {
            registry.unregister(&name).await;
        }
        self.registered_count.store(0, Ordering::SeqCst);
    }

    pub fn get_registered_tool_count(&self) -> usize {
        self.registered_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mcp::client::ServerConfig;

    #[tokio::test]
    async fn registering_against_an_unreachable_server_fails_without_panicking() {
        let client = Arc::new(McpClient::new(ServerConfig::Http {
            name: "bad".to_string(),
            url: "http://127.0.0.1:1".to_string(),
        }));
        client.connect().await.unwrap();
        let mcp_registry = McpToolRegistry::new(client);
        let registry = ToolRegistry::new();
        let result = mcp_registry.register_mcp_tools(&registry).await;
        assert!(result.is_err());
        assert_eq!(mcp_registry.get_registered_tool_count(), 0);
    }
}
