//! Per-provider adapters: interface-conforming implementations of
//! one or more real providers, each translating/parsing against that
//! provider's actual wire format rather than delegating through a private
//! SDK or an OpenAI-compatible shortcut.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod xai;

pub use anthropic::AnthropicPlugin;
pub use gemini::GeminiPlugin;
pub use openai::OpenAiPlugin;
pub use xai::XaiPlugin;

/// Shared base64 encoder for inline binary content parts (images,
/// documents). Neither the OpenAI, Anthropic, nor Gemini wire formats need
/// anything but the standard alphabet with `=` padding, so one
/// implementation covers all three.
pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Returns the four built-in plugins, ready to register on a
/// `ProviderRegistry`.
pub fn builtin_plugins() -> Vec<std::sync::Arc<dyn crate::bridge::plugin::ProviderPlugin>> {
    vec![
        std::sync::Arc::new(OpenAiPlugin::new()),
        std::sync::Arc::new(AnthropicPlugin::new()),
        std::sync::Arc::new(GeminiPlugin::new()),
        std::sync::Arc::new(XaiPlugin::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_plugins_cover_the_four_builtin_provider_ids() {
        let plugins = builtin_plugins();
        let ids: Vec<&str> = plugins.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["openai", "anthropic", "gemini", "xai"]);
    }

    #[test]
    fn base64_encode_pads_correctly_for_all_remainder_lengths() {
        assert_eq!(base64_encode(b"a"), "YQ==");
        assert_eq!(base64_encode(b"ab"), "YWI=");
        assert_eq!(base64_encode(b"abc"), "YWJj");
    }
}
