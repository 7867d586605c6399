//! `ChatRequest` and the types it is built from.

use crate::bridge::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How tool executions within one iteration are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionStrategy {
    Sequential,
    Parallel,
}

impl Default for ToolExecutionStrategy {
    fn default() -> Self {
        ToolExecutionStrategy::Sequential
    }
}

/// Caller-supplied policy for the Agent Loop. Presence of this
/// struct on a `ChatRequest` is what, combined with a non-empty `tools` set,
/// triggers multi-turn execution (`shouldExecuteMultiTurn`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiTurnConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub overall_timeout_ms: Option<u64>,
    #[serde(default)]
    pub iteration_timeout_ms: Option<u64>,
    #[serde(default)]
    pub tool_timeout_ms: Option<u64>,
    #[serde(default)]
    pub tool_execution_strategy: ToolExecutionStrategy,
    #[serde(default)]
    pub max_concurrent_tools: Option<usize>,
    /// If true (the default), a tool handler failure is wrapped into a
    /// failed `ToolResult` message and the loop continues; if false, the
    /// error propagates and the loop aborts.
    #[serde(default = "default_continue_on_tool_error")]
    pub continue_on_tool_error: bool,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_continue_on_tool_error() -> bool {
    true
}

impl Default for MultiTurnConfig {
    fn default() -> Self {
        MultiTurnConfig {
            max_iterations: default_max_iterations(),
            overall_timeout_ms: None,
            iteration_timeout_ms: None,
            tool_timeout_ms: None,
            tool_execution_strategy: ToolExecutionStrategy::default(),
            max_concurrent_tools: None,
            continue_on_tool_error: default_continue_on_tool_error(),
        }
    }
}

impl MultiTurnConfig {
    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_overall_timeout_ms(mut self, ms: u64) -> Self {
        self.overall_timeout_ms = Some(ms);
        self
    }

    pub fn with_iteration_timeout_ms(mut self, ms: u64) -> Self {
        self.iteration_timeout_ms = Some(ms);
        self
    }

    pub fn with_tool_execution_strategy(mut self, strategy: ToolExecutionStrategy) -> Self {
        self.tool_execution_strategy = strategy;
        self
    }
}

/// A tool available to the model for this request. Registered once into the
/// Tool Registry, never mutated thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: serde_json::Value) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            input_schema,
            permissions: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }
}

/// A unified chat request. Invariant: `tools` non-empty implies the tool
/// system must be enabled on the client; `messages` is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub multi_turn: Option<MultiTurnConfig>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tool_timeout_ms: Option<u64>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        ChatRequest {
            messages,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            options: HashMap::new(),
            multi_turn: None,
            stream: false,
            tool_timeout_ms: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_multi_turn(mut self, config: MultiTurnConfig) -> Self {
        self.multi_turn = Some(config);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// `shouldExecuteMultiTurn(request, toolsEnabled)`: true only
    /// when tools are enabled on the client, the request carries at least
    /// one tool, and a `multiTurn` config is present.
    pub fn should_execute_multi_turn(&self, tools_enabled: bool) -> bool {
        tools_enabled && !self.tools.is_empty() && self.multi_turn.is_some()
    }
}
