//! The OpenAI-style provider plugin: `POST {base_url}/chat/completions`,
//! `Authorization: Bearer {api_key}`, `choices[0].message` response shape,
//! native `tool_calls` array, `usage.{prompt,completion,total}_tokens`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::message::{ContentPart, Message, Role, ToolCall, TokenUsage};
use crate::bridge::plugin::{
    default_estimate_token_usage, default_normalize_error, map_openai_finish_reason,
    ConversationContext, ProviderConfig, ProviderPlugin, TerminationInput, UnifiedResponse,
};
use crate::bridge::registry::ModelCapabilities;
use crate::bridge::request::ChatRequest;
use crate::bridge::sse::{decode_event_json, is_done, parse_sse};
use crate::bridge::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::bridge::turn::{Confidence, PartialMessage, StreamDelta, TerminationReason, UnifiedTerminationSignal};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

pub struct OpenAiPlugin {
    config: RwLock<Option<OpenAiConfig>>,
}

impl OpenAiPlugin {
    pub fn new() -> Self {
        OpenAiPlugin { config: RwLock::new(None) }
    }

    fn require_config(&self) -> Result<(String, String), BridgeError> {
        let guard = self.config.read().expect("openai plugin config lock poisoned");
        match guard.as_ref() {
            Some(cfg) => Ok((cfg.api_key.clone(), cfg.base_url.clone())),
            None => Err(BridgeError::new(ErrorKind::InvalidConfig, "openai plugin used before initialize()")),
        }
    }

    fn bare_model(model: &str) -> &str {
        model.split_once(':').map(|(_, rest)| rest).unwrap_or(model)
    }

    fn message_to_wire(message: &Message) -> serde_json::Value {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let mut obj = serde_json::Map::new();
        obj.insert("role".to_string(), serde_json::Value::String(role.to_string()));

        match message.role {
            Role::Tool => {
                obj.insert(
                    "tool_call_id".to_string(),
                    serde_json::Value::String(message.tool_call_id().unwrap_or_default().to_string()),
                );
                obj.insert("content".to_string(), serde_json::Value::String(message.text()));
            }
            Role::Assistant if !message.tool_calls.is_empty() => {
                let content = message.text();
                obj.insert(
                    "content".to_string(),
                    if content.is_empty() { serde_json::Value::Null } else { serde_json::Value::String(content) },
                );
                obj.insert("tool_calls".to_string(), serde_json::Value::Array(
                    message.tool_calls.iter().map(|call| {
                        serde_json::json!({
                            "id": call.id,
                            "type": "function",
                            "function": { "name": call.name, "arguments": call.parameters.to_string() },
                        })
                    }).collect(),
                ));
            }
            _ => {
                if message.content.iter().all(|p| matches!(p, ContentPart::Text { .. })) {
                    obj.insert("content".to_string(), serde_json::Value::String(message.text()));
                } else {
                    let parts: Vec<serde_json::Value> = message
                        .content
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
                            ContentPart::Image { url, mime, .. } => serde_json::json!({
                                "type": "image_url",
                                "image_url": { "url": url.clone().unwrap_or_default(), "mime": mime },
                            }),
                            ContentPart::Document { url, mime, .. } => serde_json::json!({
                                "type": "document", "url": url.clone().unwrap_or_default(), "mime": mime,
                            }),
                            ContentPart::Code { code, language } => serde_json::json!({
                                "type": "text", "text": code, "language": language,
                            }),
                            ContentPart::ToolUse { id, name, arguments } => serde_json::json!({
                                "type": "tool_use", "id": id, "name": name, "arguments": arguments,
                            }),
                        })
                        .collect();
                    obj.insert("content".to_string(), serde_json::Value::Array(parts));
                }
            }
        }
        serde_json::Value::Object(obj)
    }

    fn tools_to_wire(request: &ChatRequest) -> Option<serde_json::Value> {
        if request.tools.is_empty() {
            return None;
        }
        Some(serde_json::Value::Array(
            request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": { "name": t.name, "description": t.description, "parameters": t.input_schema },
                    })
                })
                .collect(),
        ))
    }

    fn parse_choice_message(value: &serde_json::Value) -> (Message, HashMap<String, serde_json::Value>) {
        let content_text = value.get("content").and_then(|v| v.as_str()).unwrap_or_default();
        let mut content = Vec::new();
        if !content_text.is_empty() {
            content.push(ContentPart::text(content_text));
        }
        let tool_calls: Vec<ToolCall> = value
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        let id = c.get("id")?.as_str()?.to_string();
                        let function = c.get("function")?;
                        let name = function.get("name")?.as_str()?.to_string();
                        let arguments = function
                            .get("arguments")
                            .and_then(|a| a.as_str())
                            .and_then(|s| serde_json::from_str(s).ok())
                            .unwrap_or(serde_json::Value::Null);
                        Some(ToolCall { id, name, parameters: arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut message = Message::new(Role::Assistant, content);
        message.tool_calls = tool_calls;
        let mut metadata = HashMap::new();
        metadata.insert("raw_message".to_string(), value.clone());
        (message, metadata)
    }
}

impl Default for OpenAiPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for OpenAiPlugin {
    fn id(&self) -> &str {
        "openai"
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn initialize(&self, config: ProviderConfig) -> Result<(), BridgeError> {
        let api_key = config
            .get("apiKey")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BridgeError::new(ErrorKind::InvalidConfig, "openai provider config missing 'apiKey'"))?
            .to_string();
        let base_url = config
            .get("baseUrl")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_BASE_URL)
            .to_string();
        *self.config.write().expect("openai plugin config lock poisoned") = Some(OpenAiConfig { api_key, base_url });
        Ok(())
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        model_capabilities: Option<&ModelCapabilities>,
        _conversation_context: Option<&ConversationContext>,
    ) -> Result<HttpRequest, BridgeError> {
        let (api_key, base_url) = self.require_config()?;

        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), serde_json::Value::String(Self::bare_model(&request.model).to_string()));
        body.insert(
            "messages".to_string(),
            serde_json::Value::Array(request.messages.iter().map(Self::message_to_wire).collect()),
        );
        body.insert("stream".to_string(), serde_json::Value::Bool(request.stream));

        let allows_temperature = model_capabilities.map(|c| c.temperature).unwrap_or(true);
        if allows_temperature {
            if let Some(temperature) = request.temperature {
                body.insert("temperature".to_string(), serde_json::json!(temperature));
            }
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
        }
        if let Some(tools) = Self::tools_to_wire(request) {
            body.insert("tools".to_string(), tools);
        }

        let request_body = serde_json::Value::Object(body);
        Ok(HttpRequest::new(HttpMethod::Post, format!("{}/chat/completions", base_url))
            .with_header("Authorization", format!("Bearer {}", api_key))
            .with_json_body(&request_body))
    }

    async fn parse_response(&self, response: HttpResponse) -> Result<UnifiedResponse, BridgeError> {
        if !response.is_success() {
            return Err(self.normalize_error(Some(response.status), &response.body_str(), &response.headers));
        }
        let value: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| BridgeError::new(ErrorKind::Validation, format!("malformed openai response: {}", e)))?;

        let choice = value
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| BridgeError::new(ErrorKind::Validation, "openai response missing choices[0]"))?;
        let message_value = choice
            .get("message")
            .ok_or_else(|| BridgeError::new(ErrorKind::Validation, "openai response missing choices[0].message"))?;
        let (mut message, mut metadata) = Self::parse_choice_message(message_value);
        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            metadata.insert("finish_reason".to_string(), serde_json::Value::String(reason.to_string()));
        }
        message.metadata = metadata.clone();

        let usage = value.get("usage").map(|u| {
            TokenUsage::new(
                u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
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
                    let value = match decode_event_json(&event) {
                        Some(v) => v,
                        None => return None,
                    };
                    let choice = value.get("choices").and_then(|c| c.get(0));
                    let delta_value = choice.and_then(|c| c.get("delta"));
                    let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(|v| v.as_str());
                    let finished = finish_reason.is_some() && finish_reason != Some("null");

                    let mut content = Vec::new();
                    if let Some(text) = delta_value.and_then(|d| d.get("content")).and_then(|v| v.as_str()) {
                        if !text.is_empty() {
                            content.push(ContentPart::text(text));
                        }
                    }
                    let role = delta_value
                        .and_then(|d| d.get("role"))
                        .and_then(|v| v.as_str())
                        .map(|r| match r {
                            "assistant" => Role::Assistant,
                            "system" => Role::System,
                            "tool" => Role::Tool,
                            _ => Role::User,
                        });

                    let mut metadata = HashMap::new();
                    if let Some(reason) = finish_reason {
                        metadata.insert("finish_reason".to_string(), serde_json::Value::String(reason.to_string()));
                    }

                    Some(Ok(StreamDelta {
                        id: event.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                        delta: PartialMessage { role, content, tool_calls: Vec::new() },
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
            TerminationInput::Response(response) => response.metadata.get("finish_reason").and_then(|v| v.as_str()),
            TerminationInput::Delta(delta) => delta.metadata.get("finish_reason").and_then(|v| v.as_str()),
        };
        match raw {
            Some(reason) => {
                let (mapped, confidence) = map_openai_finish_reason(reason);
                UnifiedTerminationSignal {
                    should_terminate: true,
                    reason: mapped,
                    confidence,
                    provider_specific: crate::bridge::turn::ProviderSpecificTermination {
                        original_field: "finish_reason".to_string(),
                        original_value: reason.to_string(),
                        metadata: HashMap::new(),
                    },
                    message: None,
                }
            }
            None => {
                if let TerminationInput::Delta(delta) = input {
                    if delta.finished {
                        return UnifiedTerminationSignal {
                            should_terminate: true,
                            reason: TerminationReason::NaturalCompletion,
                            confidence: Confidence::Low,
                            provider_specific: crate::bridge::turn::ProviderSpecificTermination {
                                original_field: "finished".to_string(),
                                original_value: "true".to_string(),
                                metadata: HashMap::new(),
                            },
                            message: None,
                        };
                    }
                }
                UnifiedTerminationSignal::no_signal("finish_reason", "absent", "no finish_reason present")
            }
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
    use crate::bridge::message::Message;

    fn initialized_plugin() -> OpenAiPlugin {
        let plugin = OpenAiPlugin::new();
        let mut config = ProviderConfig::new();
        config.insert("apiKey".to_string(), serde_json::Value::String("sk-test".to_string()));
        tokio_test_block_on(plugin.initialize(config));
        plugin
    }

    // A tiny block-on shim so these unit tests don't need a `#[tokio::test]`
    // just to call the one-shot async `initialize`.
    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
    }

    #[test]
    fn translate_request_strips_provider_prefix_and_sets_bearer_auth() {
        let plugin = initialized_plugin();
        let request = ChatRequest::new("openai:gpt-4o", vec![Message::user("hi")]);
        let http = plugin.translate_request(&request, None, None).unwrap();
        assert!(http.url.ends_with("/chat/completions"));
        assert_eq!(http.headers.get("Authorization").map(String::as_str), Some("Bearer sk-test"));
        let body: serde_json::Value = serde_json::from_slice(http.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["model"], "gpt-4o");
    }

    #[test]
    fn translate_request_before_initialize_fails() {
        let plugin = OpenAiPlugin::new();
        let request = ChatRequest::new("openai:gpt-4o", vec![Message::user("hi")]);
        let err = plugin.translate_request(&request, None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn parse_choice_message_extracts_native_tool_calls() {
        let value = serde_json::json!({
            "content": null,
            "tool_calls": [{"id": "call-1", "type": "function", "function": {"name": "echo", "arguments": "{\"data\":\"x\"}"}}],
        });
        let (message, _) = OpenAiPlugin::parse_choice_message(&value);
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name, "echo");
        assert_eq!(message.tool_calls[0].parameters["data"], "x");
    }

    #[test]
    fn detect_termination_maps_stop_to_natural_completion() {
        let plugin = initialized_plugin();
        let mut metadata = HashMap::new();
        metadata.insert("finish_reason".to_string(), serde_json::Value::String("stop".to_string()));
        let response = UnifiedResponse { message: Message::assistant("ok"), usage: None, model: String::new(), metadata };
        let signal = plugin.detect_termination(TerminationInput::Response(&response), None);
        assert_eq!(signal.reason, TerminationReason::NaturalCompletion);
        assert_eq!(signal.confidence, Confidence::High);
    }
}
