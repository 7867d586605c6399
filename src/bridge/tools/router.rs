//! The Tool Router: name-based dispatch of `ToolCall`s to handlers.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::time::timeout;

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::message::{Message, ToolCall, ToolResult};
use crate::bridge::request::ToolExecutionStrategy;
use crate::bridge::tools::context::create_execution_context;
use crate::bridge::tools::registry::ToolRegistry;

pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
}

impl ToolRouter {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        ToolRouter { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatches one call: looks up the handler, builds a
    /// `ToolExecutionContext`, invokes it under `tool_timeout`, returns a
    /// `ToolResult`. Never propagates the handler's error as a `Result`
    /// error — tool failures are always captured in the `ToolResult` so
    /// the caller can decide (per `continueOnToolError`) whether to treat
    /// them as fatal.
    pub async fn dispatch_one(&self, call: &ToolCall, conversation: &[Message], tool_timeout: Option<Duration>) -> ToolResult {
        let handler = match self.registry.get_handler(&call.name).await {
            Some(h) => h,
            None => {
                return ToolResult::failed(
                    call.id.clone(),
                    BridgeError::new(ErrorKind::Tool, format!("tool '{}' not found", call.name)).to_string(),
                )
            }
        };
        let context = create_execution_context(conversation, None);
        let invocation = handler.call(call.parameters.clone(), &context);

        let outcome = match tool_timeout {
            Some(limit) => match timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => Err(BridgeError::new(ErrorKind::Tool, format!("tool '{}' timed out", call.name))
                    .with_context("toolName", call.name.clone())),
            },
            None => invocation.await,
        };

        match outcome {
            Ok(data) => ToolResult::ok(call.id.clone(), data),
            Err(err) => ToolResult::failed(call.id.clone(), err.to_string()),
        }
    }

    /// Dispatches every call per `strategy`. Sequential mode returns
    /// results in call-order (trivially, since each call awaits before the
    /// next starts). Parallel mode returns results in **completion
    /// order** (per spec §5: `completedToolCalls` order equals completion
    /// order in parallel mode) via `FuturesUnordered`, which yields each
    /// future's output as soon as it resolves rather than preserving
    /// input order the way `join_all` would — callers that need the
    /// call-order append into message history (§4.8 step d) must match
    /// each `ToolResult` back to its `ToolCall` by `call_id`, not by
    /// position.
    pub async fn dispatch_many(
        &self,
        calls: &[ToolCall],
        conversation: &[Message],
        strategy: ToolExecutionStrategy,
        max_concurrent: Option<usize>,
        tool_timeout: Option<Duration>,
    ) -> Vec<ToolResult> {
        match strategy {
            ToolExecutionStrategy::Sequential => {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    results.push(self.dispatch_one(call, conversation, tool_timeout).await);
                }
                results
            }
            ToolExecutionStrategy::Parallel => {
                let limit = max_concurrent.unwrap_or(calls.len().max(1));
                let mut results = Vec::with_capacity(calls.len());
                for chunk in calls.chunks(limit.max(1)) {
                    let mut in_flight: FuturesUnordered<_> =
                        chunk.iter().map(|call| self.dispatch_one(call, conversation, tool_timeout)).collect();
                    while let Some(result) = in_flight.next().await {
                        results.push(result);
                    }
                }
                results
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::tools::builtin::EchoTool;
    use crate::bridge::tools::context::ToolExecutionContext;
    use crate::bridge::tools::registry::ToolHandler;
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        async fn call(&self, _parameters: serde_json::Value, _context: &ToolExecutionContext) -> Result<serde_json::Value, BridgeError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(serde_json::json!({"ok": true}))
        }
    }

    async fn router_with_echo() -> ToolRouter {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool::definition(), Arc::new(EchoTool), false).await.unwrap();
        ToolRouter::new(registry)
    }

    #[tokio::test]
    async fn dispatch_one_returns_result_for_known_tool() {
        let router = router_with_echo().await;
        let call = ToolCall::new("echo", serde_json::json!({"data": "x"}));
        let result = router.dispatch_one(&call, &[], None).await;
        assert!(result.success);
        assert_eq!(result.call_id, call.id);
    }

    #[tokio::test]
    async fn dispatch_one_reports_unknown_tool_as_failed_not_error() {
        let router = router_with_echo().await;
        let call = ToolCall::new("nonexistent", serde_json::json!({}));
        let result = router.dispatch_one(&call, &[], None).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn dispatch_one_times_out() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(ToolDefinitionStub::def(), Arc::new(SlowTool), false)
            .await
            .unwrap();
        let router = ToolRouter::new(registry);
        let call = ToolCall::new("slow", serde_json::json!({}));
        let result = router.dispatch_one(&call, &[], Some(Duration::from_millis(5))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn dispatch_many_sequential_preserves_call_order() {
        let router = router_with_echo().await;
        let calls = vec![
            ToolCall::new("echo", serde_json::json!({"data": "a"})),
            ToolCall::new("echo", serde_json::json!({"data": "b"})),
        ];
        let results = router
            .dispatch_many(&calls, &[], ToolExecutionStrategy::Sequential, None, None)
            .await;
        assert_eq!(results[0].call_id, calls[0].id);
        assert_eq!(results[1].call_id, calls[1].id);
    }

    #[tokio::test]
    async fn dispatch_many_parallel_returns_results_in_completion_order() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(ToolDefinitionStub::def(), Arc::new(SlowTool), false).await.unwrap();
        registry.register(EchoTool::definition(), Arc::new(EchoTool), false).await.unwrap();
        let router = ToolRouter::new(registry);

        let slow_call = ToolCall::new("slow", serde_json::json!({}));
        let fast_call = ToolCall::new("echo", serde_json::json!({"data": "fast"}));
        let calls = vec![slow_call.clone(), fast_call.clone()];

        let results = router
            .dispatch_many(&calls, &[], ToolExecutionStrategy::Parallel, None, None)
            .await;

        // `fast_call` is second in `calls` but finishes first, so it leads
        // the returned order even though `dispatch_many_sequential_preserves_call_order`
        // above shows the opposite for the sequential strategy.
        assert_eq!(results[0].call_id, fast_call.id);
        assert_eq!(results[1].call_id, slow_call.id);
    }

    struct ToolDefinitionStub;
    impl ToolDefinitionStub {
        fn def() -> crate::bridge::request::ToolDefinition {
            crate::bridge::request::ToolDefinition::new("slow", "slow tool", serde_json::json!({}))
        }
    }
}
