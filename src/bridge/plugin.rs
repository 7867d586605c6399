//! The Provider Plugin Layer: the polymorphic per-provider adapter,
//! plus the default helpers every plugin gets for free. One `#[async_trait]`
//! trait covers `translate`/`parse`/`detect_termination`/`normalize_error`
//! per provider, rather than one bespoke struct per provider endpoint.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::message::{Message, TokenUsage};
use crate::bridge::registry::ModelCapabilities;
use crate::bridge::request::ChatRequest;
use crate::bridge::transport::{HttpRequest, HttpResponse, Transport};
use crate::bridge::turn::{Confidence, StreamDelta, TerminationReason, UnifiedTerminationSignal};

/// `{ message, usage?, model, metadata? }` — the non-streaming parse
/// result.
#[derive(Debug, Clone)]
pub struct UnifiedResponse {
    pub message: Message,
    pub usage: Option<TokenUsage>,
    pub model: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Either shape `detectTermination`/`isTerminal` may be called with.
pub enum TerminationInput<'a> {
    Delta(&'a StreamDelta),
    Response(&'a UnifiedResponse),
}

/// Snapshot of the in-flight turn, built by the Termination Analyzer from
/// `MultiTurnState` and passed to plugin methods that want
/// conversational context (translation, termination detection).
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub history: Vec<Message>,
    pub iteration: u32,
    pub total_iterations: u32,
    pub start_time: Instant,
    pub last_iteration_time: Instant,
    pub tool_execution_history_len: usize,
}

/// Opaque per-provider configuration blob, e.g. `{apiKey, baseUrl?,
/// organization?}`. Plugins parse their own shape out of the map.
pub type ProviderConfig = HashMap<String, serde_json::Value>;

/// A Provider Plugin: pure with respect to its own state except
/// `initialize`, which must run exactly once before any translation
/// (enforced by the Provider Registry's initialize-cache, not by the
/// plugin itself).
#[async_trait]
pub trait ProviderPlugin: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    async fn initialize(&self, config: ProviderConfig) -> Result<(), BridgeError>;

    /// Produces the wire-format `HttpRequest`. Capability-gated options
    /// (e.g. `temperature`) must be omitted when `model_capabilities` says
    /// the model disallows them.
    fn translate_request(
        &self,
        request: &ChatRequest,
        model_capabilities: Option<&ModelCapabilities>,
        conversation_context: Option<&ConversationContext>,
    ) -> Result<HttpRequest, BridgeError>;

    /// Non-streaming parse: consumes the full body, validates it against
    /// the provider schema (`ValidationError` on mismatch).
    async fn parse_response(&self, response: HttpResponse) -> Result<UnifiedResponse, BridgeError>;

    /// Streaming parse: suspension points are exactly the chunk boundaries
    /// the transport delivers. Default implementation falls back to a
    /// single non-streaming call wrapped in one terminal delta, for
    /// plugins that do not support streaming.
    async fn parse_stream(
        &self,
        transport: &dyn Transport,
        request: HttpRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta, BridgeError>>, BridgeError> {
        let response = transport.fetch(request).await?;
        let unified = self.parse_response(response).await?;
        let delta = StreamDelta {
            id: uuid::Uuid::new_v4().to_string(),
            delta: crate::bridge::turn::PartialMessage {
                role: Some(unified.message.role),
                content: unified.message.content.clone(),
                tool_calls: unified.message.tool_calls.clone(),
            },
            finished: true,
            usage: unified.usage,
            metadata: unified.metadata,
        };
        Ok(Box::pin(futures_util::stream::once(async { Ok(delta) })))
    }

    /// Must agree with `detect_termination(..).should_terminate`.
    fn is_terminal(&self, input: TerminationInput<'_>, context: Option<&ConversationContext>) -> bool {
        self.detect_termination(input, context).should_terminate
    }

    fn detect_termination(
        &self,
        input: TerminationInput<'_>,
        context: Option<&ConversationContext>,
    ) -> UnifiedTerminationSignal;

    /// Classifies an HTTP status + body + network error into the error
    /// taxonomy, sanitizing secrets. Must not throw/panic.
    fn normalize_error(&self, status: Option<u16>, body: &str, headers: &HashMap<String, String>) -> BridgeError {
        default_normalize_error(status, body, self.id(), headers)
    }

    fn supports_caching(&self) -> bool {
        false
    }

    fn estimate_token_usage(&self, messages: &[Message], context_length: u32, prompt_tokens: u32, conversation_tokens: u32) -> u32 {
        default_estimate_token_usage(messages, context_length, prompt_tokens, conversation_tokens)
    }
}

/// `defaultNormalizeError(status, body, providerId, headers?)`.
pub fn default_normalize_error(
    status: Option<u16>,
    body: &str,
    provider_id: &str,
    headers: &HashMap<String, String>,
) -> BridgeError {
    let message = extract_error_message(body);
    let kind = match status {
        Some(401) => ErrorKind::Auth,
        Some(403) => ErrorKind::Provider,
        Some(429) => ErrorKind::RateLimit,
        Some(500) | Some(502) | Some(503) | Some(504) => ErrorKind::Provider,
        _ => ErrorKind::Provider,
    };
    let mut err = BridgeError::new(kind, message).with_context("providerId", provider_id.to_string());
    if let Some(s) = status {
        err = err.with_context("status", s.to_string());
    }
    if kind == ErrorKind::RateLimit {
        if let Some(retry_after) = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
            .map(|(_, v)| v.clone())
        {
            err = err.with_retry_after(retry_after);
        }
    }
    err
}

fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
        if let Some(msg) = value.get("error").and_then(|e| e.as_str()) {
            return msg.to_string();
        }
    }
    if body.is_empty() {
        "provider returned an error with no body".to_string()
    } else {
        body.to_string()
    }
}

/// `defaultDetectTermination`: delegates to `plugin.detect_termination` —
/// this free function exists for callers (e.g. the Termination Analyzer)
/// that hold only a `&dyn ProviderPlugin` and want the "never throw,
/// decorate with confidence" contract spelled out explicitly.
pub fn default_detect_termination(
    plugin: &dyn ProviderPlugin,
    input: TerminationInput<'_>,
    context: Option<&ConversationContext>,
) -> UnifiedTerminationSignal {
    plugin.detect_termination(input, context)
}

/// Authoritative termination field mappings.
pub fn map_openai_finish_reason(reason: &str) -> (TerminationReason, Confidence) {
    match reason {
        "stop" => (TerminationReason::NaturalCompletion, Confidence::High),
        "length" => (TerminationReason::TokenLimitReached, Confidence::High),
        "content_filter" => (TerminationReason::ContentFiltered, Confidence::High),
        "function_call" | "tool_calls" => (TerminationReason::NaturalCompletion, Confidence::High),
        _ => (TerminationReason::Unknown, Confidence::Low),
    }
}

pub fn map_anthropic_stop_reason(reason: &str) -> (TerminationReason, Confidence) {
    match reason {
        "end_turn" => (TerminationReason::NaturalCompletion, Confidence::High),
        "max_tokens" => (TerminationReason::TokenLimitReached, Confidence::High),
        "stop_sequence" => (TerminationReason::StopSequence, Confidence::High),
        "tool_use" => (TerminationReason::NaturalCompletion, Confidence::High),
        _ => (TerminationReason::Unknown, Confidence::Medium),
    }
}

pub fn map_gemini_finish_reason(reason: &str) -> (TerminationReason, Confidence) {
    match reason {
        "STOP" => (TerminationReason::NaturalCompletion, Confidence::High),
        "MAX_TOKENS" => (TerminationReason::TokenLimitReached, Confidence::High),
        "SAFETY" => (TerminationReason::ContentFiltered, Confidence::High),
        _ => (TerminationReason::Unknown, Confidence::Medium),
    }
}

/// `defaultEstimateTokenUsage`: ~10 base tokens/message + ceil(len/4)
/// per text part, 765/image, 500/document, text-cost+20/code; capped
/// against remaining context (min 0, typical cap 4000).
pub fn default_estimate_token_usage(
    messages: &[Message],
    context_length: u32,
    prompt_tokens: u32,
    conversation_tokens: u32,
) -> u32 {
    let mut estimate: u32 = 0;
    for message in messages {
        estimate += 10;
        for part in &message.content {
            estimate += match part {
                crate::bridge::message::ContentPart::Text { text } => ceil_div(text.len() as u32, 4),
                crate::bridge::message::ContentPart::Image { .. } => 765,
                crate::bridge::message::ContentPart::Document { .. } => 500,
                crate::bridge::message::ContentPart::Code { code, .. } => ceil_div(code.len() as u32, 4) + 20,
                crate::bridge::message::ContentPart::ToolUse { .. } => 0,
            };
        }
    }
    let remaining = context_length
        .saturating_sub(prompt_tokens)
        .saturating_sub(conversation_tokens);
    let cap = remaining.min(4000);
    estimate.min(cap)
}

fn ceil_div(n: u32, d: u32) -> u32 {
    (n + d - 1) / d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_mapping_matches_table() {
        assert_eq!(
            map_openai_finish_reason("stop"),
            (TerminationReason::NaturalCompletion, Confidence::High)
        );
        assert_eq!(
            map_openai_finish_reason("length"),
            (TerminationReason::TokenLimitReached, Confidence::High)
        );
        assert_eq!(
            map_openai_finish_reason("weird"),
            (TerminationReason::Unknown, Confidence::Low)
        );
    }

    #[test]
    fn anthropic_and_gemini_unknowns_are_medium_confidence() {
        assert_eq!(map_anthropic_stop_reason("bogus").1, Confidence::Medium);
        assert_eq!(map_gemini_finish_reason("bogus").1, Confidence::Medium);
    }

    #[test]
    fn normalize_error_maps_status_codes() {
        let headers = HashMap::new();
        let err = default_normalize_error(Some(401), r#"{"error":{"message":"Invalid API key"}}"#, "openai", &headers);
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.message().contains("Invalid API key"));
    }

    #[test]
    fn normalize_error_carries_retry_after() {
        let mut headers = HashMap::new();
        headers.insert("Retry-After".to_string(), "30".to_string());
        let err = default_normalize_error(Some(429), "{}", "openai", &headers);
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after(), Some("30"));
    }

    #[test]
    fn estimate_token_usage_caps_at_remaining_context() {
        let messages = vec![Message::user("x".repeat(100_000))];
        let estimate = default_estimate_token_usage(&messages, 8192, 100, 0);
        assert!(estimate <= 4000);
    }
}
