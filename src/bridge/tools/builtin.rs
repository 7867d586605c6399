//! Built-in tools.
//!
//! Builtin tools live alongside caller-registered tools in the same
//! [`ToolRegistry`](crate::bridge::tools::ToolRegistry). The only
//! builtin shipped with the core is `echo`, a minimal, deterministic tool a
//! multi-turn agent loop can call without any external dependency.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bridge::error::BridgeError;
use crate::bridge::request::ToolDefinition;
use crate::bridge::tools::context::ToolExecutionContext;
use crate::bridge::tools::registry::ToolHandler;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoResult {
    pub echoed: String,
    pub timestamp: String,
    #[serde(rename = "testSuccess")]
    pub test_success: bool,
}

/// Echoes the `data` field of its input back, stamped with the current
/// time. Result shape: `{ echoed, timestamp, testSuccess: true }`, the
/// same one `validate_builtin_result_shape` checks.
pub struct EchoTool;

impl EchoTool {
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "echo",
            "Echoes back the provided data; useful for verifying tool routing end to end.",
            serde_json::json!({
                "type": "object",
                "properties": { "data": { "type": "string" } },
                "required": ["data"],
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, parameters: serde_json::Value, _context: &ToolExecutionContext) -> Result<serde_json::Value, BridgeError> {
        let data = parameters
            .get("data")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let result = EchoResult {
            echoed: data,
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_success: true,
        };
        Ok(serde_json::to_value(result).expect("EchoResult always serializes"))
    }
}
