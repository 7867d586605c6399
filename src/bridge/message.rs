//! The unified conversation data model: `Message`, `ContentPart`,
//! `ToolCall`/`ToolResult`, and token usage. Every provider plugin
//! translates to and from these types; nothing downstream of the plugin
//! layer ever sees a provider-specific shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One piece of message content. Only `Text` is guaranteed to be
/// understood by every provider; the rest are conditional on model
/// capability (`ModelCapabilities`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes: Option<Vec<u8>>,
        mime: String,
    },
    Document {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes: Option<Vec<u8>>,
        mime: String,
    },
    Code {
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }
}

/// A single turn in the conversation. Invariant: `content` has at least one
/// part unless this is an explicit placeholder (an empty assistant message
/// created at streaming initiation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
    /// Native tool calls emitted by the assistant for this message, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Message {
            role,
            content,
            timestamp: None,
            metadata: std::collections::HashMap::new(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    pub fn system(text: impl Into<String>) -> Self {
        Message::new(Role::System, vec![ContentPart::text(text)])
    }

    /// Placeholder assistant message used at streaming initiation, before
    /// any delta has arrived. Exempt from the non-empty-content invariant.
    pub fn empty_assistant() -> Self {
        Message::new(Role::Assistant, Vec::new())
    }

    /// A `tool`-role reply to a single `ToolCall`, carrying
    /// `metadata.tool_call_id` so it can be paired back to the call.
    pub fn tool_result(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut msg = Message::new(Role::Tool, vec![ContentPart::text(text)]);
        msg.metadata.insert(
            "tool_call_id".to_string(),
            serde_json::Value::String(call_id.into()),
        );
        msg
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.metadata.get("tool_call_id").and_then(|v| v.as_str())
    }

    /// Concatenation of every text content part, in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn with_timestamp(mut self, ts: chrono::DateTime<chrono::Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }
}

/// A single invocation the assistant requested, unique within a turn by
/// `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub parameters: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            parameters,
        }
    }
}

/// The outcome of dispatching one `ToolCall`. Pairing invariant: every
/// successful turn that produced tool calls must produce exactly one
/// `ToolResult` per `ToolCall.id` before the next
/// provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, data: serde_json::Value) -> Self {
        ToolResult {
            call_id: call_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        ToolResult {
            call_id: call_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Token accounting for a single provider response, threaded through
/// `UnifiedResponse.usage` and aggregated across agent-loop iterations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        TokenUsage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_concatenates_parts() {
        let msg = Message::new(
            Role::Assistant,
            vec![ContentPart::text("Hello"), ContentPart::text(" world")],
        );
        assert_eq!(msg.text(), "Hello world");
    }

    #[test]
    fn tool_result_roundtrips_call_id_metadata() {
        let msg = Message::tool_result("call-1", "echoed");
        assert_eq!(msg.tool_call_id(), Some("call-1"));
        assert_eq!(msg.role, Role::Tool);
    }

    #[test]
    fn token_usage_accumulates() {
        let mut total = TokenUsage::new(10, 5);
        total.accumulate(&TokenUsage::new(3, 2));
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 7);
        assert_eq!(total.total_tokens, 20);
    }
}
