//! The xAI (Grok) provider plugin. xAI's wire format really is
//! OpenAI-compatible, so this plugin mirrors `providers::openai` with a
//! different provider id, default base URL, and model catalog, rather than
//! inventing a new wire format.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::bridge::error::BridgeError;
use crate::bridge::message::Message;
use crate::bridge::plugin::{
    default_estimate_token_usage, ConversationContext, ProviderConfig, ProviderPlugin,
    TerminationInput, UnifiedResponse,
};
use crate::bridge::providers::openai::OpenAiPlugin;
use crate::bridge::registry::ModelCapabilities;
use crate::bridge::request::ChatRequest;
use crate::bridge::transport::{HttpRequest, HttpResponse, Transport};
use crate::bridge::turn::{StreamDelta, UnifiedTerminationSignal};

const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";

/// Wraps an `OpenAiPlugin` configured against xAI's base URL. Composition
/// over copy-paste: the wire format genuinely is OpenAI's, so only
/// `id`/`name`/`version`/`initialize` (to default the base URL) differ.
pub struct XaiPlugin {
    inner: OpenAiPlugin,
}

impl XaiPlugin {
    pub fn new() -> Self {
        XaiPlugin { inner: OpenAiPlugin::new() }
    }
}

impl Default for XaiPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for XaiPlugin {
    fn id(&self) -> &str {
        "xai"
    }

    fn name(&self) -> &str {
        "xAI"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn initialize(&self, mut config: ProviderConfig) -> Result<(), BridgeError> {
        config.entry("baseUrl".to_string()).or_insert_with(|| serde_json::Value::String(DEFAULT_BASE_URL.to_string()));
        self.inner.initialize(config).await
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        model_capabilities: Option<&ModelCapabilities>,
        conversation_context: Option<&ConversationContext>,
    ) -> Result<HttpRequest, BridgeError> {
        self.inner.translate_request(request, model_capabilities, conversation_context)
    }

    async fn parse_response(&self, response: HttpResponse) -> Result<UnifiedResponse, BridgeError> {
        self.inner.parse_response(response).await
    }

    async fn parse_stream(
        &self,
        transport: &dyn Transport,
        request: HttpRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta, BridgeError>>, BridgeError> {
        self.inner.parse_stream(transport, request).await
    }

    fn detect_termination(&self, input: TerminationInput<'_>, context: Option<&ConversationContext>) -> UnifiedTerminationSignal {
        // xAI's `finish_reason` vocabulary matches OpenAI's; reuse the same
        // mapping table rather than re-deriving it.
        self.inner.detect_termination(input, context)
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

    #[test]
    fn initialize_defaults_to_the_xai_base_url() {
        let plugin = XaiPlugin::new();
        let mut config = ProviderConfig::new();
        config.insert("apiKey".to_string(), serde_json::Value::String("xai-test".to_string()));
        block_on(plugin.initialize(config)).unwrap();
        let request = ChatRequest::new("xai:grok-4-0709", vec![Message::user("hi")]);
        let http = plugin.translate_request(&request, None, None).unwrap();
        assert!(http.url.starts_with(DEFAULT_BASE_URL));
    }

    #[test]
    fn explicit_base_url_overrides_the_xai_default() {
        let plugin = XaiPlugin::new();
        let mut config = ProviderConfig::new();
        config.insert("apiKey".to_string(), serde_json::Value::String("xai-test".to_string()));
        config.insert("baseUrl".to_string(), serde_json::Value::String("https://custom.example/v1".to_string()));
        block_on(plugin.initialize(config)).unwrap();
        let request = ChatRequest::new("xai:grok-4-0709", vec![Message::user("hi")]);
        let http = plugin.translate_request(&request, None, None).unwrap();
        assert!(http.url.starts_with("https://custom.example/v1"));
    }
}
