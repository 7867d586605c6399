//! The Gemini provider plugin. Speaks Gemini's own REST shape (API key as
//! a URL query parameter, not a bearer token): `POST
//! {base_url}/v1beta/models/{model}:generateContent?key={apiKey}`,
//! `contents[].parts[]` request/response shape, `finishReason` field.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::message::{ContentPart, Message, Role, ToolCall, TokenUsage};
use crate::bridge::plugin::{
    default_estimate_token_usage, map_gemini_finish_reason, ConversationContext, ProviderConfig,
    ProviderPlugin, TerminationInput, UnifiedResponse,
};
use crate::bridge::registry::ModelCapabilities;
use crate::bridge::request::ChatRequest;
use crate::bridge::sse::{decode_event_json, is_done, parse_sse};
use crate::bridge::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::bridge::turn::{PartialMessage, StreamDelta, UnifiedTerminationSignal};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

struct GeminiConfig {
    api_key: String,
    base_url: String,
}

pub struct GeminiPlugin {
    config: RwLock<Option<GeminiConfig>>,
}

impl GeminiPlugin {
    pub fn new() -> Self {
        GeminiPlugin { config: RwLock::new(None) }
    }

    fn require_config(&self) -> Result<(String, String), BridgeError> {
        let guard = self.config.read().expect("gemini plugin config lock poisoned");
        match guard.as_ref() {
            Some(cfg) => Ok((cfg.api_key.clone(), cfg.base_url.clone())),
            None => Err(BridgeError::new(ErrorKind::InvalidConfig, "gemini plugin used before initialize()")),
        }
    }

    fn bare_model(model: &str) -> &str {
        model.split_once(':').map(|(_, rest)| rest).unwrap_or(model)
    }

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

    fn content_part_to_part(part: &ContentPart) -> serde_json::Value {
        match part {
            ContentPart::Text { text } => serde_json::json!({"text": text}),
            ContentPart::Image { bytes, mime, .. } => serde_json::json!({
                "inlineData": { "mimeType": mime, "data": bytes.as_ref().map(|b| super::base64_encode(b)).unwrap_or_default() },
            }),
            ContentPart::Document { bytes, mime, .. } => serde_json::json!({
                "inlineData": { "mimeType": mime, "data": bytes.as_ref().map(|b| super::base64_encode(b)).unwrap_or_default() },
            }),
            ContentPart::Code { code, .. } => serde_json::json!({"text": code}),
            ContentPart::ToolUse { name, arguments, .. } => serde_json::json!({"functionCall": {"name": name, "args": arguments}}),
        }
    }

    fn message_to_wire(message: &Message) -> serde_json::Value {
        if message.role == Role::Tool {
            return serde_json::json!({
                "role": "function",
                "parts": [{
                    "functionResponse": {
                        "name": message.tool_call_id().unwrap_or_default(),
                        "response": { "content": message.text() },
                    },
                }],
            });
        }

        let role = match message.role {
            Role::Assistant => "model",
            _ => "user",
        };
        let mut parts: Vec<serde_json::Value> = message.content.iter().map(Self::content_part_to_part).collect();
        for call in &message.tool_calls {
            parts.push(serde_json::json!({"functionCall": {"name": call.name, "args": call.parameters}}));
        }
        serde_json::json!({ "role": role, "parts": parts })
    }

    fn tools_to_wire(request: &ChatRequest) -> Option<serde_json::Value> {
        if request.tools.is_empty() {
            return None;
        }
        Some(serde_json::json!([{
            "functionDeclarations": request.tools.iter().map(|t| serde_json::json!({
                "name": t.name, "description": t.description, "parameters": t.input_schema,
            })).collect::<Vec<_>>(),
        }]))
    }

    fn parse_parts(parts: &[serde_json::Value]) -> (Vec<ContentPart>, Vec<ToolCall>) {
        let mut content = Vec::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                content.push(ContentPart::text(text));
            } else if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let args = call.get("args").cloned().unwrap_or(serde_json::Value::Null);
                tool_calls.push(ToolCall::new(name, args));
            }
        }
        (content, tool_calls)
    }
}

impl Default for GeminiPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for GeminiPlugin {
    fn id(&self) -> &str {
        "gemini"
    }

    fn name(&self) -> &str {
        "Gemini"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn initialize(&self, config: ProviderConfig) -> Result<(), BridgeError> {
        let api_key = config
            .get("apiKey")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BridgeError::new(ErrorKind::InvalidConfig, "gemini provider config missing 'apiKey'"))?
            .to_string();
        let base_url = config.get("baseUrl").and_then(|v| v.as_str()).unwrap_or(DEFAULT_BASE_URL).to_string();
        *self.config.write().expect("gemini plugin config lock poisoned") = Some(GeminiConfig { api_key, base_url });
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
        body.insert(
            "contents".to_string(),
            serde_json::Value::Array(rest.into_iter().map(Self::message_to_wire).collect()),
        );
        if let Some(system) = system {
            body.insert("systemInstruction".to_string(), serde_json::json!({"parts": [{"text": system}]}));
        }
        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            generation_config.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), serde_json::json!(max_tokens));
        }
        if !generation_config.is_empty() {
            body.insert("generationConfig".to_string(), serde_json::Value::Object(generation_config));
        }
        if let Some(tools) = Self::tools_to_wire(request) {
            body.insert("tools".to_string(), tools);
        }

        let operation = if request.stream { "streamGenerateContent" } else { "generateContent" };
        let mut url = format!("{}/models/{}:{}?key={}", base_url, Self::bare_model(&request.model), operation, api_key);
        if request.stream {
            url.push_str("&alt=sse");
        }

        let request_body = serde_json::Value::Object(body);
        Ok(HttpRequest::new(HttpMethod::Post, url).with_json_body(&request_body))
    }

    async fn parse_response(&self, response: HttpResponse) -> Result<UnifiedResponse, BridgeError> {
        if !response.is_success() {
            return Err(self.normalize_error(Some(response.status), &response.body_str(), &response.headers));
        }
        let value: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| BridgeError::new(ErrorKind::Validation, format!("malformed gemini response: {}", e)))?;

        let candidate = value
            .get("candidates")
            .and_then(|c| c.get(0))
            .ok_or_else(|| BridgeError::new(ErrorKind::Validation, "gemini response missing candidates[0]"))?;
        let parts = candidate.pointer("/content/parts").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let (content, tool_calls) = Self::parse_parts(&parts);
        let mut message = Message::new(Role::Assistant, content);
        message.tool_calls = tool_calls;

        let mut metadata = HashMap::new();
        if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            metadata.insert("finishReason".to_string(), serde_json::Value::String(reason.to_string()));
        }
        message.metadata = metadata.clone();

        let usage = value.get("usageMetadata").map(|u| {
            TokenUsage::new(
                u.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                u.get("candidatesTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            )
        });

        Ok(UnifiedResponse { message, usage, model: value.get("modelVersion").and_then(|v| v.as_str()).unwrap_or_default().to_string(), metadata })
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
                    let candidate = value.get("candidates").and_then(|c| c.get(0))?;
                    let parts = candidate.pointer("/content/parts").and_then(|v| v.as_array()).cloned().unwrap_or_default();
                    let (content, tool_calls) = Self::parse_parts(&parts);

                    let mut metadata = HashMap::new();
                    let finished = if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
                        metadata.insert("finishReason".to_string(), serde_json::Value::String(reason.to_string()));
                        true
                    } else {
                        false
                    };

                    Some(Ok(StreamDelta {
                        id: event.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                        delta: PartialMessage { role: Some(Role::Assistant), content, tool_calls },
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
            TerminationInput::Response(response) => response.metadata.get("finishReason").and_then(|v| v.as_str()),
            TerminationInput::Delta(delta) => delta.metadata.get("finishReason").and_then(|v| v.as_str()),
        };
        match raw {
            Some(reason) => {
                let (mapped, confidence) = map_gemini_finish_reason(reason);
                UnifiedTerminationSignal {
                    should_terminate: true,
                    reason: mapped,
                    confidence,
                    provider_specific: crate::bridge::turn::ProviderSpecificTermination {
                        original_field: "finishReason".to_string(),
                        original_value: reason.to_string(),
                        metadata: HashMap::new(),
                    },
                    message: None,
                }
            }
            None => UnifiedTerminationSignal::no_signal("finishReason", "absent", "no finishReason present"),
        }
    }

    fn supports_caching(&self) -> bool {
        false
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

    fn initialized_plugin() -> GeminiPlugin {
        let plugin = GeminiPlugin::new();
        let mut config = ProviderConfig::new();
        config.insert("apiKey".to_string(), serde_json::Value::String("gem-test".to_string()));
        block_on(plugin.initialize(config));
        plugin
    }

    #[test]
    fn translate_request_puts_api_key_in_query_string_not_headers() {
        let plugin = initialized_plugin();
        let request = ChatRequest::new("gemini:gemini-2.0-flash", vec![Message::user("hi")]);
        let http = plugin.translate_request(&request, None, None).unwrap();
        assert!(http.url.contains("key=gem-test"));
        assert!(!http.headers.contains_key("Authorization"));
    }

    #[test]
    fn parse_parts_extracts_function_call() {
        let parts = vec![serde_json::json!({"functionCall": {"name": "echo", "args": {"data": "x"}}})];
        let (content, tool_calls) = GeminiPlugin::parse_parts(&parts);
        assert!(content.is_empty());
        assert_eq!(tool_calls[0].name, "echo");
    }

    #[test]
    fn detect_termination_maps_safety_to_content_filtered() {
        let plugin = initialized_plugin();
        let mut metadata = HashMap::new();
        metadata.insert("finishReason".to_string(), serde_json::Value::String("SAFETY".to_string()));
        let response = UnifiedResponse { message: Message::assistant("ok"), usage: None, model: String::new(), metadata };
        let signal = plugin.detect_termination(TerminationInput::Response(&response), None);
        assert_eq!(signal.reason, crate::bridge::turn::TerminationReason::ContentFiltered);
    }
}
