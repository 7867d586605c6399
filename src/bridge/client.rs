//! The Bridge Client façade: the single entry point wiring together
//! the Provider Registry, Model Registry, Tool Registry/Router, MCP client
//! integration, and the Agent Loop behind `chat`/`stream`/`register_tool`/
//! `get_config`/`dispose`. One struct owns the whole provider-agnostic
//! stack, rather than one client per provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::BoxStream;
use tokio::sync::RwLock;

use crate::bridge::agent_loop::{AgentLoop, ChatOutcome};
use crate::bridge::config::{BridgeClientConfig, McpServerSpec, ModelSeed};
use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::mcp::client::ServerConfig as McpServerConfig;
use crate::bridge::mcp::{McpClient, McpToolRegistry};
use crate::bridge::plugin::ProviderPlugin;
use crate::bridge::providers::{AnthropicPlugin, GeminiPlugin, OpenAiPlugin, XaiPlugin};
use crate::bridge::registry::{builtin_provider_ids, ModelCapabilities, ModelRecord, ModelRegistry, ProviderRegistry};
use crate::bridge::request::ChatRequest;
use crate::bridge::streaming::StreamingResult;
use crate::bridge::tools::{ToolHandler, ToolRegistry, ToolRouter};
use crate::bridge::transport::{ReqwestTransport, Transport};
use crate::bridge::turn::StreamDelta;

/// One fresh instance of the plugin matching `provider_type`, or `None` for
/// an unrecognized type. Every named config under the same type (e.g.
/// `anthropic.work` and `anthropic.personal`) gets its own instance since a
/// plugin's config lives behind a single-slot lock.
fn instantiate_plugin(provider_type: &str) -> Option<Arc<dyn ProviderPlugin>> {
    match provider_type {
        "openai" => Some(Arc::new(OpenAiPlugin::new())),
        "anthropic" => Some(Arc::new(AnthropicPlugin::new())),
        "gemini" => Some(Arc::new(GeminiPlugin::new())),
        "xai" => Some(Arc::new(XaiPlugin::new())),
        _ => None,
    }
}

fn provider_type_of(flattened_key: &str) -> &str {
    flattened_key.split('.').next().unwrap_or(flattened_key)
}

/// A model record as supplied via `modelSeed: { data: [...] }` / `{ path:
/// ... }`; mirrors `ModelRecord` but keys the provider by the flattened
/// config key rather than requiring the caller to know a plugin version.
#[derive(serde::Deserialize)]
struct ModelRecordWire {
    id: String,
    name: String,
    #[serde(rename = "providerKey")]
    provider_key: String,
    #[serde(default)]
    streaming: bool,
    #[serde(default)]
    tool_calls: bool,
    #[serde(default)]
    images: bool,
    #[serde(default)]
    documents: bool,
    #[serde(default)]
    temperature: bool,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    supported_content_types: Vec<String>,
}

/// The provider-agnostic LLM bridge client. Construction does all of the
/// fallible setup: validating config, initializing every configured
/// provider plugin, bringing up MCP servers (best-effort per server), and
/// seeding the Model Registry. A `BridgeClient` that successfully
/// constructs is ready to `chat`/`stream` immediately.
pub struct BridgeClient {
    config: BridgeClientConfig,
    provider_registry: Arc<ProviderRegistry>,
    model_registry: Arc<ModelRegistry>,
    tool_registry: Arc<ToolRegistry>,
    tool_router: Arc<ToolRouter>,
    transport: Arc<dyn Transport>,
    providers_by_key: HashMap<String, Arc<dyn ProviderPlugin>>,
    mcp_clients: RwLock<Vec<Arc<McpClient>>>,
    mcp_registries: RwLock<Vec<McpToolRegistry>>,
    disposed: AtomicBool,
}

impl BridgeClient {
    /// Builds a client from a raw JSON configuration blob. See
    /// `BridgeClientConfig::from_value` for the accepted shape.
    pub async fn new(raw_config: serde_json::Value) -> Result<Self, BridgeError> {
        let config = BridgeClientConfig::from_value(&raw_config)?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: BridgeClientConfig) -> Result<Self, BridgeError> {
        let provider_registry = Arc::new(ProviderRegistry::new());
        let mut providers_by_key = HashMap::new();

        for (key, provider_config) in config.providers() {
            let provider_type = provider_type_of(key);
            let plugin = instantiate_plugin(provider_type).ok_or_else(|| {
                BridgeError::new(ErrorKind::InvalidConfig, format!("unknown provider type '{}'", provider_type))
                    .with_context("providerType", provider_type.to_string())
            })?;
            plugin.initialize(provider_config.clone()).await?;
            provider_registry.register(plugin.clone()).await;
            providers_by_key.insert(key.clone(), plugin);
        }

        let tool_registry = Arc::new(ToolRegistry::new());
        let tool_router = Arc::new(ToolRouter::new(tool_registry.clone()));
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new());
        let model_registry = Arc::new(ModelRegistry::new());

        let client = BridgeClient {
            config,
            provider_registry,
            model_registry,
            tool_registry,
            tool_router,
            transport,
            providers_by_key,
            mcp_clients: RwLock::new(Vec::new()),
            mcp_registries: RwLock::new(Vec::new()),
            disposed: AtomicBool::new(false),
        };

        client.seed_models().await?;
        client.bring_up_mcp_servers().await;

        Ok(client)
    }

    async fn seed_models(&self) -> Result<(), BridgeError> {
        match self.config.model_seed() {
            ModelSeed::Builtin => {
                let configured_types: Vec<String> = self
                    .providers_by_key
                    .keys()
                    .map(|k| provider_type_of(k).to_string())
                    .collect();
                let allowed: Vec<String> = builtin_provider_ids()
                    .into_iter()
                    .filter(|id| configured_types.contains(id))
                    .collect();
                self.model_registry.seed_builtin(&allowed).await;
                Ok(())
            }
            ModelSeed::None => Ok(()),
            ModelSeed::Custom(value) => self.seed_models_from_value(value.clone()).await,
            ModelSeed::Path(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    BridgeError::new(ErrorKind::InvalidConfig, format!("failed to read modelSeed path: {}", e))
                })?;
                let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                    BridgeError::new(ErrorKind::InvalidConfig, format!("modelSeed file is not valid JSON: {}", e))
                })?;
                self.seed_models_from_value(value).await
            }
        }
    }

    async fn seed_models_from_value(&self, value: serde_json::Value) -> Result<(), BridgeError> {
        let wires: Vec<ModelRecordWire> = serde_json::from_value(value)
            .map_err(|e| BridgeError::new(ErrorKind::InvalidConfig, format!("malformed modelSeed data: {}", e)))?;
        for wire in wires {
            let plugin = self.providers_by_key.get(&wire.provider_key).ok_or_else(|| {
                BridgeError::new(ErrorKind::InvalidConfig, format!("modelSeed entry references unknown provider key '{}'", wire.provider_key))
            })?;
            self.model_registry
                .register(ModelRecord {
                    id: wire.id,
                    name: wire.name,
                    provider_id: provider_type_of(&wire.provider_key).to_string(),
                    capabilities: ModelCapabilities {
                        streaming: wire.streaming,
                        tool_calls: wire.tool_calls,
                        images: wire.images,
                        documents: wire.documents,
                        temperature: wire.temperature,
                        max_tokens: wire.max_tokens,
                        supported_content_types: wire.supported_content_types,
                    },
                    provider_plugin: format!("{}-{}", plugin.id(), plugin.version()),
                })
                .await;
        }
        Ok(())
    }

    /// Brings up every configured MCP server, isolating failures per server
    ///: a server that fails to connect, or that connects but whose
    /// tool discovery call fails, is skipped with a warning rather than
    /// failing client construction. `connect()` alone never proves an HTTP
    /// server reachable — only the discovery GET inside
    /// `register_mcp_tools` does — so both steps are treated as the
    /// fallible boundary.
    async fn bring_up_mcp_servers(&self) {
        for spec in self.config.mcp_servers() {
            let (name, server_config) = match spec {
                McpServerSpec::Http { name, url } => (name.clone(), McpServerConfig::Http { name: name.clone(), url: url.clone() }),
                McpServerSpec::Stdio { name, command, args } => {
                    (name.clone(), McpServerConfig::Stdio { name: name.clone(), command: command.clone(), args: args.clone() })
                }
            };

            let client = Arc::new(McpClient::new(server_config));
            if let Err(e) = client.connect().await {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("MCP server '{}' failed to connect, skipping: {}", name, e.message());
                }
                continue;
            }

            let mcp_registry = McpToolRegistry::new(client.clone());
            match mcp_registry.register_mcp_tools(&self.tool_registry).await {
                Ok(count) => {
                    if log::log_enabled!(log::Level::Debug) {
                        log::debug!("MCP server '{}' registered {} tool(s)", name, count);
                    }
                    self.mcp_clients.write().await.push(client);
                    self.mcp_registries.write().await.push(mcp_registry);
                }
                Err(e) => {
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("MCP server '{}' connected but tool discovery failed, skipping: {}", name, e.message());
                    }
                    let _ = client.disconnect().await;
                }
            }
        }
    }

    fn ensure_not_disposed(&self) -> Result<(), BridgeError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BridgeError::new(ErrorKind::InvalidConfig, "this BridgeClient has been disposed"));
        }
        Ok(())
    }

    /// Resolves `request.model` to a provider plugin and (if known) its
    /// model capabilities. Tries the Model Registry first (covers both
    /// builtin and caller-seeded models); falls back to treating a
    /// `type:model` or `type.name:model` prefix as a direct provider-key
    /// reference for models the registry doesn't know about.
    async fn resolve_model(&self, model: &str) -> Result<(Arc<dyn ProviderPlugin>, Option<ModelCapabilities>), BridgeError> {
        if let Some(record) = self.model_registry.get(model).await {
            let plugin = self
                .provider_registry
                .get_by_qualified(&record.provider_plugin)
                .await
                .ok_or_else(|| crate::bridge::registry::unknown_model_error(model))?;
            return Ok((plugin, Some(record.capabilities)));
        }

        let provider_key = model.split_once(':').map(|(prefix, _)| prefix).unwrap_or(model);
        if let Some(plugin) = self.providers_by_key.get(provider_key) {
            return Ok((plugin.clone(), None));
        }

        let matches: Vec<&str> = self
            .providers_by_key
            .keys()
            .filter(|k| provider_type_of(k) == provider_key)
            .map(String::as_str)
            .collect();
        if matches.len() == 1 {
            return Ok((self.providers_by_key[matches[0]].clone(), None));
        }

        if let Some(plugin) = self.providers_by_key.get(self.config.default_provider()) {
            return Ok((plugin.clone(), None));
        }

        Err(crate::bridge::registry::unknown_model_error(model))
    }

    fn agent_loop_for(&self, plugin: Arc<dyn ProviderPlugin>) -> AgentLoop {
        AgentLoop::new(plugin, self.transport.clone(), Some(self.tool_router.clone()))
    }

    /// Runs one unified chat request to completion (single-turn or, when
    /// the request enables tools and multi-turn config, the full Agent
    /// Loop).
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, BridgeError> {
        self.ensure_not_disposed()?;
        let (plugin, capabilities) = self.resolve_model(&request.model).await?;
        let agent_loop = self.agent_loop_for(plugin);
        agent_loop.run_chat(&request, capabilities.as_ref(), self.config.tools_enabled()).await
    }

    /// Streams one turn's deltas without automatic tool-call handling; a
    /// detected mid-stream tool call surfaces on the delta and is the
    /// caller's responsibility to act on. Use [`Self::stream_with_tools`]
    /// for the managed pause/execute/resume cycle.
    pub async fn stream(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<StreamDelta, BridgeError>>, BridgeError> {
        self.ensure_not_disposed()?;
        let (plugin, capabilities) = self.resolve_model(&request.model).await?;
        let agent_loop = self.agent_loop_for(plugin);
        agent_loop.run_stream(&request, capabilities.as_ref()).await
    }

    /// Streams one turn, automatically pausing for and resuming after tool
    /// execution if the provider emits tool calls mid-stream.
    pub async fn stream_with_tools(&self, request: ChatRequest) -> Result<StreamingResult, BridgeError> {
        self.ensure_not_disposed()?;
        let (plugin, capabilities) = self.resolve_model(&request.model).await?;
        let agent_loop = self.agent_loop_for(plugin);
        let tool_timeout_ms = request.tool_timeout_ms.or_else(|| request.multi_turn.as_ref().and_then(|m| m.tool_timeout_ms));
        agent_loop.run_streaming_turn_with_tools(&request, capabilities.as_ref(), tool_timeout_ms).await
    }

    /// Registers (or replaces) a tool the model may call during multi-turn
    /// execution.
    pub async fn register_tool(
        &self,
        definition: crate::bridge::request::ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), BridgeError> {
        self.ensure_not_disposed()?;
        self.tool_registry.register(definition, handler, true).await
    }

    pub fn get_config(&self) -> &BridgeClientConfig {
        &self.config
    }

    pub fn model_registry(&self) -> &Arc<ModelRegistry> {
        &self.model_registry
    }

    /// Unregisters every MCP tool set and disconnects every MCP client,
    /// then marks the client unusable. Idempotent: a second call logs and
    /// returns immediately rather than re-running teardown. Per-client
    /// failures are swallowed and logged at WARN, never propagated — this
    /// method must not throw.
    pub async fn dispose(&self) -> Result<(), BridgeError> {
        if log::log_enabled!(log::Level::Info) {
            log::info!("BridgeClient: starting disposal");
        }
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut registries = self.mcp_registries.write().await;
        for mcp_registry in registries.iter() {
            mcp_registry.unregister_mcp_tools(&self.tool_registry).await;
        }
        registries.clear();

        let mut clients = self.mcp_clients.write().await;
        for client in clients.iter() {
            if let Err(e) = client.disconnect().await {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("BridgeClient: failed to disconnect MCP client '{}': {}", client.name(), e.message());
                }
            }
        }
        clients.clear();

        Ok(())
    }
}
