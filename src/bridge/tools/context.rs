//! `ToolExecutionContext` and `createExecutionContext`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::bridge::message::{Message, Role};

static CONTEXT_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Default)]
pub struct ConversationFlow {
    pub starts_with_user: bool,
    pub ends_with_assistant: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationMetadata {
    pub total_messages: usize,
    pub roles: Vec<Role>,
    pub content_types: Vec<String>,
    pub has_user_messages: bool,
    pub has_assistant_messages: bool,
    pub has_tool_messages: bool,
    pub conversation_flow: ConversationFlow,
}

#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub user_id: Option<String>,
    pub session_id: String,
    pub environment: String,
    pub permissions: Vec<String>,
    pub context_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub message_count: usize,
    pub conversation_metadata: ConversationMetadata,
    pub execution_source: String,
}

/// `createExecutionContext(messages, options?)`. `contextId` is
/// unique per call via a monotonic counter plus a random suffix.
pub fn create_execution_context(messages: &[Message], user_id: Option<String>) -> ToolExecutionContext {
    let counter = CONTEXT_COUNTER.fetch_add(1, Ordering::SeqCst);
    let context_id = format!("ctx-{}-{}", counter, uuid::Uuid::new_v4().to_string().split('-').next().unwrap());

    let timestamp = messages
        .last()
        .and_then(|m| m.timestamp)
        .unwrap_or_else(chrono::Utc::now);

    let mut roles = Vec::new();
    let mut content_types = Vec::new();
    let mut has_user = false;
    let mut has_assistant = false;
    let mut has_tool = false;

    for message in messages {
        roles.push(message.role);
        match message.role {
            Role::User => has_user = true,
            Role::Assistant => has_assistant = true,
            Role::Tool => has_tool = true,
            Role::System => {}
        }
        for part in &message.content {
            let kind = match part {
                crate::bridge::message::ContentPart::Text { .. } => "text",
                crate::bridge::message::ContentPart::Image { .. } => "image",
                crate::bridge::message::ContentPart::Document { .. } => "document",
                crate::bridge::message::ContentPart::Code { .. } => "code",
                crate::bridge::message::ContentPart::ToolUse { .. } => "tool_use",
            };
            if !content_types.contains(&kind.to_string()) {
                content_types.push(kind.to_string());
            }
        }
    }

    let conversation_flow = ConversationFlow {
        starts_with_user: messages.first().map(|m| m.role == Role::User).unwrap_or(false),
        ends_with_assistant: messages.last().map(|m| m.role == Role::Assistant).unwrap_or(false),
    };

    ToolExecutionContext {
        user_id,
        session_id: format!("session-{}", context_id),
        environment: "agent-loop".to_string(),
        permissions: vec!["read".to_string()],
        context_id: context_id.clone(),
        timestamp,
        message_count: messages.len(),
        conversation_metadata: ConversationMetadata {
            total_messages: messages.len(),
            roles,
            content_types,
            has_user_messages: has_user,
            has_assistant_messages: has_assistant,
            has_tool_messages: has_tool,
            conversation_flow,
        },
        execution_source: "agent-loop".to_string(),
    }
}

/// Validates the required shape of a builtin-tool result:
/// `{ echoed: string, timestamp: string, testSuccess: true }`, extra
/// fields permitted.
pub fn validate_builtin_result_shape(value: &serde_json::Value) -> Result<(), String> {
    let obj = value.as_object().ok_or("builtin tool result must be a JSON object")?;
    match obj.get("echoed") {
        Some(serde_json::Value::String(_)) => {}
        _ => return Err("builtin tool result missing string field 'echoed'".to_string()),
    }
    match obj.get("timestamp") {
        Some(serde_json::Value::String(_)) => {}
        _ => return Err("builtin tool result missing string field 'timestamp'".to_string()),
    }
    match obj.get("testSuccess") {
        Some(serde_json::Value::Bool(true)) => {}
        _ => return Err("builtin tool result field 'testSuccess' must be boolean true".to_string()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::message::Message;

    #[test]
    fn context_ids_are_unique_per_call() {
        let ctx1 = create_execution_context(&[], None);
        let ctx2 = create_execution_context(&[], None);
        assert_ne!(ctx1.context_id, ctx2.context_id);
    }

    #[test]
    fn conversation_flow_detects_user_start_assistant_end() {
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        let ctx = create_execution_context(&messages, None);
        assert!(ctx.conversation_metadata.conversation_flow.starts_with_user);
        assert!(ctx.conversation_metadata.conversation_flow.ends_with_assistant);
        assert!(ctx.conversation_metadata.has_user_messages);
        assert!(ctx.conversation_metadata.has_assistant_messages);
    }

    #[test]
    fn validates_builtin_result_shape() {
        let good = serde_json::json!({"echoed": "x", "timestamp": "now", "testSuccess": true, "extra": 1});
        assert!(validate_builtin_result_shape(&good).is_ok());

        let missing_field = serde_json::json!({"echoed": "x", "testSuccess": true});
        assert!(validate_builtin_result_shape(&missing_field).is_err());

        let wrong_type = serde_json::json!({"echoed": "x", "timestamp": "now", "testSuccess": "true"});
        assert!(validate_builtin_result_shape(&wrong_type).is_err());
    }
}
