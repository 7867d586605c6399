//! `llm-bridge`: a provider-agnostic LLM client. See `bridge` for the
//! public surface (`BridgeClient::chat`/`stream`/`register_tool`/`dispose`).

pub mod bridge;

pub use bridge::{
    AgentLoop, BridgeClient, BridgeClientConfig, BridgeError, ChatRequest, ContentPart, ErrorKind,
    Message, ModelCapabilities, ModelRegistry, MultiTurnConfig, MultiTurnState, ProviderPlugin,
    ProviderRegistry, RecoveryAction, Role, StreamDelta, TerminationReason, TokenUsage, ToolCall,
    ToolDefinition, ToolExecutionStrategy, ToolResult, UnifiedTerminationSignal,
};

/// Initializes `env_logger` with a permissive default filter, ignoring the
/// error if a logger is already installed. Safe to call from every test or
/// binary entry point without coordinating who goes first.
pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(cfg!(test))
        .try_init();
}
