//! The Anthropic provider plugin. Wire format is Anthropic's own —
//! `x-api-key` header, `POST {base_url}/v1/messages`, `stop_reason` field,
//! content-block message shape — spoken directly rather than piggybacked
//! through an OpenAI-compatible shortcut, since a standalone provider
//! plugin must speak the real protocol.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::message::{ContentPart, Message, Role, ToolCall, TokenUsage};
use crate::bridge::plugin::{
    default_estimate_token_usage, map_anthropic_stop_reason, ConversationContext, ProviderConfig,
    ProviderPlugin, TerminationInput, UnifiedResponse,
};
use crate::bridge::registry::ModelCapabilities;
use crate::bridge::request::ChatRequest;
use crate::bridge::sse::{decode_event_json, is_done, parse_sse};
use crate::bridge::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::bridge::turn::{PartialMessage, StreamDelta, UnifiedTerminationSignal};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

struct AnthropicConfig {
    api_key: String,
    base_url: String,
}

pub struct AnthropicPlugin {
    config: RwLock<Option<AnthropicConfig>>,
}

impl AnthropicPlugin {
    pub fn new() -> Self {
        AnthropicPlugin { config: RwLock::new(None) }
    }

    fn require_config(&self) -> Result<(String, String), BridgeError> {
        let guard = self.config.read().expect("anthropic plugin config lock poisoned");
        match guard.as_ref() {
            Some(cfg) => Ok((cfg.api_key.clone(), cfg.base_url.clone())),
            None => Err(BridgeError::new(ErrorKind::InvalidConfig, "anthropic plugin used before initialize()")),
        }
    }

    fn bare_model(model: &str) -> &str {
        model.split_once(':').map(|(_, rest)| rest).unwrap_or(model)
    }

    /// Anthropic keeps the system prompt out of `messages` entirely; it is
    /// lifted into a top-level `system` field on the request body.
    fn split_system_prompt(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system = Vec::new();
        let mut rest = Vec::new();
        for message in messages {
            if message.role == Role::System {
                system.push(message.text());
            } else {
                rest.push(message);
            }
        }
        (if system.is_empty() { None } else { Some(system.join("\n")) }, rest)
    }

    fn content_part_to_block(part: &ContentPart) -> serde_json::Value {
        match part {
            ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
            ContentPart::Image { bytes, mime, .. } => serde_json::json!({
                "type": "image",
                "source": { "type": "base64", "media_type": mime, "data": bytes.as_ref().map(|b| super::base64_encode(b)).unwrap_or_default() },
            }),
            ContentPart::Document { bytes, mime, .. } => serde_json::json!({
                "type": "document",
                "source": { "type": "base64", "media_type": mime, "data": bytes.as_ref().map(|b| super::base64_encode(b)).unwrap_or_default() },
            }),
            ContentPart::Code { code, .. } => serde_json::json!({"type": "text", "text": code}),
            ContentPart::ToolUse { id, name, arguments } => {
                serde_json::json!({"type": "tool_use", "id": id, "name": name, "input": arguments})
            }
        }
    }

    fn message_to_wire(message: &Message) -> serde_json::Value {
        let role = match message.role {
            Role::Assistant => "assistant",
            Role::Tool => "user",
            _ => "user",
        };

        if message.role == Role::Tool {
            return serde_json::json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id().unwrap_or_default(),
                    "content": message.text(),
                }],
            });
        }

        let mut blocks: Vec<serde_json::Value> = message.content.iter().map(Self::content_part_to_block).collect();
        for call in &message.tool_calls {
            blocks.push(serde_json::json!({"type": "tool_use", "id": call.id, "name": call.name, "input": call.parameters}));
        }
        serde_json::json!({ "role": role, "content": blocks })
    }

    fn tools_to_wire(request: &ChatRequest) -> Option<serde_json::Value> {
        if request.tools.is_empty() {
            return None;
        }
        Some(serde_json::Value::Array(
            request
                .tools
                .iter()
                .map(|t| serde_json::json!({"name": t.name, "description": t.description, "input_schema": t.input_schema}))
                .collect(),
        ))
    }

    fn parse_content_blocks(blocks: &[serde_json::Value]) -> (Vec<ContentPart>, Vec<ToolCall>) {
        let mut content = Vec::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block.get("type").and_then(|v| v.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                        content.push(ContentPart::text(text));
                    }
                }
                Some("tool_use") => {
                    if let (Some(id), Some(name)) = (
                        block.get("id").and_then(|v| v.as_str()),
                        block.get("name").and_then(|v| v.as_str()),
                    ) {
                        tool_calls.push(ToolCall {
                            id: id.to_string(),
                            name: name.to_string(),
                            parameters: block.get("input").cloned().unwrap_or(serde_json::Value::Null),
                        });
                    }
                }
                _ => {}
            }
        }
        (content, tool_calls)
    }
}

impl Default for AnthropicPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for AnthropicPlugin {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn initialize(&self, config: ProviderConfig) -> Result<(), BridgeError> {
        let api_key = config
            .get("apiKey")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BridgeError::new(ErrorKind::InvalidConfig, "anthropic provider config missing 'apiKey'"))?
            .to_string();
        let base_url = config.get("baseUrl").and_then(|v| v.as_str()).unwrap_or(DEFAULT_BASE_URL).to_string();
        *self.config.write().expect("anthropic plugin config lock poisoned") = Some(AnthropicConfig { api_key, base_url });
        Ok(())
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        _model_capabilities: Option<&ModelCapabilities>,
        _conversation_context: Option<&ConversationContext>,
    ) -> Result<HttpRequest, BridgeError> {
        let (api_key, base_url) = self.require_config()?;
        let (system, rest) = Self::split_system_prompt(&request.messages);

        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), serde_json::Value::String(Self::bare_model(&request.model).to_string()));
        body.insert("max_tokens".to_string(), serde_json::json!(request.max_tokens.unwrap_or(4096)));
        body.insert("stream".to_string(), serde_json::Value::Bool(request.stream));
        body.insert(
            "messages".to_string(),
            serde_json::Value::Array(rest.into_iter().map(Self::message_to_wire).collect()),
        );
        if let Some(system) = system {
            body.insert("system".to_string(), serde_json::Value::String(system));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(tools) = Self::tools_to_wire(request) {
            body.insert("tools".to_string(), tools);
        }

        let request_body = serde_json::Value::Object(body);
        Ok(HttpRequest::new(HttpMethod::Post, format!("{}/v1/messages", base_url))
            .with_header("x-api-key", api_key)
            .with_header("anthropic-version", ANTHROPIC_VERSION)
            .with_json_body(&request_body))
    }

    async fn parse_response(&self, response: HttpResponse) -> Result<UnifiedResponse, BridgeError> {
        if !response.is_success() {
            return Err(self.normalize_error(Some(response.status), &response.body_str(), &response.headers));
        }
        let value: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| BridgeError::new(ErrorKind::Validation, format!("malformed anthropic response: {}", e)))?;

        let blocks = value.get("content").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let (content, tool_calls) = Self::parse_content_blocks(&blocks);
        let mut message = Message::new(Role::Assistant, content);
        message.tool_calls = tool_calls;

        let mut metadata = HashMap::new();
        if let Some(reason) = value.get("stop_reason").and_then(|v| v.as_str()) {
            metadata.insert("stop_reason".to_string(), serde_json::Value::String(reason.to_string()));
        }
        message.metadata = metadata.clone();

        let usage = value.get("usage").map(|u| {
            TokenUsage::new(
                u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            )
        });

        Ok(UnifiedResponse {
            message,
            usage,
            model: value.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            metadata,
        })
    }

    async fn parse_stream(
        &self,
        transport: &dyn Transport,
        request: HttpRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta, BridgeError>>, BridgeError> {
        let byte_stream = transport.stream(request).await?;
        let events = parse_sse(byte_stream);
        let deltas = events.filter_map(|event| async move {
            match event {
                Ok(event) => {
                    if is_done(&event) {
                        return None;
                    }
                    let value = decode_event_json(&event)?;
                    let event_type = value.get("type").and_then(|v| v.as_str()).unwrap_or_default();

                    let mut content = Vec::new();
                    let mut finished = false;
                    let mut metadata = HashMap::new();

                    match event_type {
                        "content_block_delta" => {
                            if let Some(text) = value.pointer("/delta/text").and_then(|v| v.as_str()) {
                                content.push(ContentPart::text(text));
                            }
                        }
                        "message_delta" => {
                            if let Some(reason) = value.pointer("/delta/stop_reason").and_then(|v| v.as_str()) {
                                metadata.insert("stop_reason".to_string(), serde_json::Value::String(reason.to_string()));
                                finished = true;
                            }
                        }
                        "message_stop" => {
                            finished = true;
                        }
                        _ => {}
                    }

                    Some(Ok(StreamDelta {
                        id: event.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                        delta: PartialMessage { role: None, content, tool_calls: Vec::new() },
                        finished,
                        usage: None,
                        metadata,
                    }))
                }
                Err(e) => Some(Err(e)),
            }
        });
        Ok(deltas.boxed())
    }

    fn detect_termination(
        &self,
        input: TerminationInput<'_>,
        _context: Option<&ConversationContext>,
    ) -> UnifiedTerminationSignal {
        let raw = match input {
            TerminationInput::Response(response) => response.metadata.get("stop_reason").and_then(|v| v.as_str()),
            TerminationInput::Delta(delta) => delta.metadata.get("stop_reason").and_then(|v| v.as_str()),
        };
        match raw {
            Some(reason) => {
                let (mapped, confidence) = map_anthropic_stop_reason(reason);
                UnifiedTerminationSignal {
                    should_terminate: true,
                    reason: mapped,
                    confidence,
                    provider_specific: crate::bridge::turn::ProviderSpecificTermination {
                        original_field: "stop_reason".to_string(),
                        original_value: reason.to_string(),
                        metadata: HashMap::new(),
                    },
                    message: None,
                }
            }
            None => UnifiedTerminationSignal::no_signal("stop_reason", "absent", "no stop_reason present"),
        }
    }

    fn supports_caching(&self) -> bool {
        true
    }

    fn estimate_token_usage(&self, messages: &[Message], context_length: u32, prompt_tokens: u32, conversation_tokens: u32) -> u32 {
        default_estimate_token_usage(messages, context_length, prompt_tokens, conversation_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
    }

    fn initialized_plugin() -> AnthropicPlugin {
        let plugin = AnthropicPlugin::new();
        let mut config = ProviderConfig::new();
        config.insert("apiKey".to_string(), serde_json::Value::String("sk-ant-test".to_string()));
        block_on(plugin.initialize(config));
        plugin
    }

    #[test]
    fn translate_request_lifts_system_prompt_out_of_messages() {
        let plugin = initialized_plugin();
        let request = ChatRequest::new(
            "anthropic:claude-3-5-sonnet",
            vec![Message::system("be nice"), Message::user("hi")],
        );
        let http = plugin.translate_request(&request, None, None).unwrap();
        assert_eq!(http.headers.get("x-api-key").map(String::as_str), Some("sk-ant-test"));
        let body: serde_json::Value = serde_json::from_slice(http.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["system"], "be nice");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn parse_content_blocks_extracts_tool_use() {
        let blocks = vec![serde_json::json!({"type": "tool_use", "id": "toolu_1", "name": "echo", "input": {"data": "x"}})];
        let (content, tool_calls) = AnthropicPlugin::parse_content_blocks(&blocks);
        assert!(content.is_empty());
        assert_eq!(tool_calls[0].name, "echo");
    }

    #[test]
    fn detect_termination_maps_max_tokens_to_token_limit_reached() {
        let plugin = initialized_plugin();
        let mut metadata = HashMap::new();
        metadata.insert("stop_reason".to_string(), serde_json::Value::String("max_tokens".to_string()));
        let response = UnifiedResponse { message: Message::assistant("ok"), usage: None, model: String::new(), metadata };
        let signal = plugin.detect_termination(TerminationInput::Response(&response), None);
        assert_eq!(signal.reason, crate::bridge::turn::TerminationReason::TokenLimitReached);
    }
}
