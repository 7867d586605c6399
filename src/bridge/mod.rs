//! The provider-agnostic LLM bridge client: a unified chat and
//! streaming request surface over pluggable providers, with a multi-turn
//! agent loop, a tool router, and MCP remote-tool integration.

pub mod agent_loop;
pub mod client;
pub mod config;
pub mod error;
pub mod iteration;
pub mod mcp;
pub mod message;
pub mod plugin;
pub mod providers;
pub mod registry;
pub mod request;
pub mod sse;
pub mod streaming;
pub mod termination;
pub mod tools;
pub mod transport;
pub mod turn;

pub use agent_loop::AgentLoop;
pub use client::BridgeClient;
pub use config::BridgeClientConfig;
pub use error::{BridgeError, ErrorKind, RecoveryAction};
pub use message::{ContentPart, Message, Role, TokenUsage, ToolCall, ToolResult};
pub use plugin::ProviderPlugin;
pub use registry::{ModelCapabilities, ModelRegistry, ProviderRegistry};
pub use request::{ChatRequest, MultiTurnConfig, ToolDefinition, ToolExecutionStrategy};
pub use turn::{MultiTurnState, StreamDelta, TerminationReason, UnifiedTerminationSignal};
