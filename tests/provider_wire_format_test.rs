//! End-to-end exercises of each provider plugin's translate/parse/terminate
//! cycle against realistic wire payloads, with no network involved: plain
//! `HttpResponse` fixtures stand in for what a real provider would send
//! back. Covers the termination mapping law (an OpenAI/Anthropic/Gemini
//! `finish_reason`/`stop_reason`/`finishReason` maps to the same unified
//! reason) and the secret-redaction guarantee on normalized errors.

use llm_bridge::bridge::message::Message;
use llm_bridge::bridge::plugin::ProviderConfig;
use llm_bridge::bridge::providers::{AnthropicPlugin, GeminiPlugin, OpenAiPlugin, XaiPlugin};
use llm_bridge::bridge::request::ChatRequest;
use llm_bridge::bridge::transport::HttpResponse;
use llm_bridge::{ProviderPlugin, TerminationReason};
use std::collections::HashMap;

fn config(pairs: &[(&str, &str)]) -> ProviderConfig {
    pairs.iter().map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string()))).collect()
}

#[tokio::test]
async fn openai_round_trip_translates_and_parses_tool_call_response() {
    let plugin = OpenAiPlugin::new();
    plugin.initialize(config(&[("apiKey", "sk-test-key-0123456789")])).await.unwrap();

    let request = ChatRequest::new("openai:gpt-4o", vec![Message::user("what's the weather?")]);
    let http_request = plugin.translate_request(&request, None, None).unwrap();
    assert!(http_request.url.ends_with("/chat/completions"));
    assert_eq!(http_request.headers.get("Authorization").unwrap(), "Bearer sk-test-key-0123456789");

    let body = serde_json::json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "echo", "arguments": "{\"data\":\"x\"}"}}]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    });
    let response = HttpResponse { status: 200, headers: HashMap::new(), body: serde_json::to_vec(&body).unwrap() };
    let parsed = plugin.parse_response(response).await.unwrap();
    assert_eq!(parsed.message.tool_calls.len(), 1);
    assert_eq!(parsed.message.tool_calls[0].name, "echo");
    assert_eq!(parsed.usage.unwrap().total_tokens, 15);
}

#[tokio::test]
async fn anthropic_speaks_its_own_wire_format_not_an_openai_shortcut() {
    let plugin = AnthropicPlugin::new();
    plugin.initialize(config(&[("apiKey", "sk-ant-test")])).await.unwrap();

    let request = ChatRequest::new("anthropic:claude-3-5-sonnet", vec![Message::user("hi")]);
    let http_request = plugin.translate_request(&request, None, None).unwrap();
    assert!(http_request.url.ends_with("/v1/messages"));
    assert_eq!(http_request.headers.get("x-api-key").unwrap(), "sk-ant-test");
    assert!(!http_request.headers.contains_key("Authorization"));

    let body = serde_json::json!({
        "content": [{"type": "text", "text": "hello there"}],
        "stop_reason": "end_turn",
        "model": "claude-3-5-sonnet",
        "usage": {"input_tokens": 8, "output_tokens": 3}
    });
    let response = HttpResponse { status: 200, headers: HashMap::new(), body: serde_json::to_vec(&body).unwrap() };
    let parsed = plugin.parse_response(response).await.unwrap();
    assert_eq!(parsed.message.text(), "hello there");
}

#[tokio::test]
async fn gemini_puts_the_api_key_in_the_url_not_a_bearer_header() {
    let plugin = GeminiPlugin::new();
    plugin.initialize(config(&[("apiKey", "gem-test-key")])).await.unwrap();

    let request = ChatRequest::new("gemini:gemini-1.5-pro", vec![Message::user("hi")]);
    let http_request = plugin.translate_request(&request, None, None).unwrap();
    assert!(http_request.url.contains("key=gem-test-key"));
    assert!(!http_request.headers.contains_key("Authorization"));
}

#[tokio::test]
async fn xai_mirrors_the_openai_shape_with_its_own_base_url() {
    let plugin = XaiPlugin::new();
    plugin.initialize(config(&[("apiKey", "xai-test-key")])).await.unwrap();

    let request = ChatRequest::new("xai:grok-2", vec![Message::user("hi")]);
    let http_request = plugin.translate_request(&request, None, None).unwrap();
    assert!(http_request.url.contains("x.ai"));
    assert_eq!(http_request.headers.get("Authorization").unwrap(), "Bearer xai-test-key");
}

/// The same unified reason/confidence comes out regardless of which
/// provider's native finish signal went in.
#[tokio::test]
async fn termination_mapping_law_holds_across_provider_families() {
    let openai = OpenAiPlugin::new();
    openai.initialize(config(&[("apiKey", "sk-test")])).await.unwrap();
    let body = serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": "done"}, "finish_reason": "length"}],
    });
    let response = HttpResponse { status: 200, headers: HashMap::new(), body: serde_json::to_vec(&body).unwrap() };
    let parsed = openai.parse_response(response).await.unwrap();
    let signal = openai.detect_termination(
        llm_bridge::bridge::plugin::TerminationInput::Response(&parsed),
        None,
    );
    assert!(signal.should_terminate);
    assert_eq!(signal.reason, TerminationReason::TokenLimitReached);
    assert!(openai.is_terminal(llm_bridge::bridge::plugin::TerminationInput::Response(&parsed), None));

    let anthropic = AnthropicPlugin::new();
    anthropic.initialize(config(&[("apiKey", "sk-ant-test")])).await.unwrap();
    let body = serde_json::json!({
        "content": [{"type": "text", "text": "done"}],
        "stop_reason": "max_tokens",
    });
    let response = HttpResponse { status: 200, headers: HashMap::new(), body: serde_json::to_vec(&body).unwrap() };
    let parsed = anthropic.parse_response(response).await.unwrap();
    let signal = anthropic.detect_termination(
        llm_bridge::bridge::plugin::TerminationInput::Response(&parsed),
        None,
    );
    assert_eq!(signal.reason, TerminationReason::TokenLimitReached);
    assert_eq!(signal.confidence, llm_bridge::bridge::turn::Confidence::High);
}

/// No error produced by `normalize_error` from an input containing a
/// bearer token, `sk-`-style key, or `api-key=` value leaks that string
/// in its serialized form.
#[tokio::test]
async fn normalize_error_redacts_secrets_from_body_and_headers() {
    let plugin = OpenAiPlugin::new();
    plugin.initialize(config(&[("apiKey", "sk-should-not-leak-0123456789")])).await.unwrap();

    let mut headers = HashMap::new();
    headers.insert("Authorization".to_string(), "Bearer sk-should-not-leak-0123456789".to_string());
    let body = r#"{"error":{"message":"Invalid API key: sk-should-not-leak-0123456789"}}"#;
    let err = plugin.normalize_error(Some(401), body, &headers);

    assert_eq!(err.kind(), llm_bridge::ErrorKind::Auth);
    let serialized = serde_json::to_string(&err.to_json()).unwrap();
    assert!(!serialized.contains("sk-should-not-leak-0123456789"));
    assert!(!serialized.contains("Bearer sk-should-not-leak-0123456789"));
}

#[tokio::test]
async fn capability_gated_temperature_is_omitted_when_model_disallows_it() {
    let plugin = OpenAiPlugin::new();
    plugin.initialize(config(&[("apiKey", "sk-test")])).await.unwrap();

    let request = ChatRequest::new("openai:o1-mini", vec![Message::user("hi")]).with_temperature(0.9);
    let capabilities = llm_bridge::ModelCapabilities {
        streaming: true,
        tool_calls: false,
        images: false,
        documents: false,
        temperature: false,
        max_tokens: None,
        supported_content_types: vec!["text".to_string()],
    };
    let http_request = plugin.translate_request(&request, Some(&capabilities), None).unwrap();
    let body: serde_json::Value = serde_json::from_slice(&http_request.body.unwrap()).unwrap();
    assert!(body.get("temperature").is_none());
}
