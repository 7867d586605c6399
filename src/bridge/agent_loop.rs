//! The Agent Loop: drives one `chat`/`stream` call end to end —
//! single provider round-trip when multi-turn execution is not triggered,
//! otherwise an `IterationManager`-bounded loop that dispatches tool calls
//! through a `ToolRouter` and consults the Termination Analyzer after every
//! provider response. Follows the familiar "append to history, call
//! provider, append response" shape, generalized to a provider-agnostic,
//! multi-turn, streaming-capable protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;

use crate::bridge::error::{BridgeError, ErrorKind, RecoveryAction};
use crate::bridge::iteration::{IterationManager, IterationManagerConfig};
use crate::bridge::message::{Message, TokenUsage, ToolCall, ToolResult};
use crate::bridge::plugin::{ConversationContext, ProviderPlugin, TerminationInput};
use crate::bridge::registry::ModelCapabilities;
use crate::bridge::request::{ChatRequest, ToolExecutionStrategy};
use crate::bridge::streaming::StreamingStateMachine;
use crate::bridge::termination::analyze_conversation_termination;
use crate::bridge::tools::ToolRouter;
use crate::bridge::transport::Transport;
use crate::bridge::turn::{MultiTurnState, StreamDelta, TerminationReason, UnifiedTerminationSignal};

/// The result of one `chat` call, single-turn or multi-turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// The full message history, original request messages followed by
    /// every assistant/tool-result message appended along the way.
    pub messages: Vec<Message>,
    pub final_message: Message,
    pub usage: TokenUsage,
    pub termination_reason: TerminationReason,
    pub iterations: u32,
}

/// Drives a single model/provider pairing through one request. Holds no
/// state across calls — a fresh `MultiTurnState`/`IterationManager` is
/// built per invocation.
pub struct AgentLoop {
    plugin: Arc<dyn ProviderPlugin>,
    transport: Arc<dyn Transport>,
    tool_router: Option<Arc<ToolRouter>>,
}

impl AgentLoop {
    pub fn new(plugin: Arc<dyn ProviderPlugin>, transport: Arc<dyn Transport>, tool_router: Option<Arc<ToolRouter>>) -> Self {
        AgentLoop { plugin, transport, tool_router }
    }

    /// `shouldExecuteMultiTurn` decides which path runs; callers pass the
    /// client-level `tools_enabled` flag since that is not carried on
    /// `ChatRequest` itself.
    pub async fn run_chat(
        &self,
        request: &ChatRequest,
        model_capabilities: Option<&ModelCapabilities>,
        tools_enabled: bool,
    ) -> Result<ChatOutcome, BridgeError> {
        if !request.should_execute_multi_turn(tools_enabled) {
            return self.run_single_turn(request, model_capabilities).await;
        }
        self.run_multi_turn(request, model_capabilities).await
    }

    async fn run_single_turn(
        &self,
        request: &ChatRequest,
        model_capabilities: Option<&ModelCapabilities>,
    ) -> Result<ChatOutcome, BridgeError> {
        let http_request = self.plugin.translate_request(request, model_capabilities, None)?;
        let response = self.transport.fetch(http_request).await?;
        let unified = self.plugin.parse_response(response).await?;

        let signal = self
            .plugin
            .detect_termination(TerminationInput::Response(&unified), None);

        let mut messages = request.messages.clone();
        messages.push(unified.message.clone());

        Ok(ChatOutcome {
            messages,
            final_message: unified.message,
            usage: unified.usage.unwrap_or_default(),
            termination_reason: signal.reason.coarsen(),
            iterations: 1,
        })
    }

    async fn run_multi_turn(
        &self,
        request: &ChatRequest,
        model_capabilities: Option<&ModelCapabilities>,
    ) -> Result<ChatOutcome, BridgeError> {
        let multi_turn = request
            .multi_turn
            .as_ref()
            .expect("should_execute_multi_turn guarantees multi_turn is present");

        let mut iteration_manager = IterationManager::new(IterationManagerConfig {
            max_iterations: multi_turn.max_iterations,
            overall_timeout_ms: multi_turn.overall_timeout_ms,
            iteration_timeout_ms: multi_turn.iteration_timeout_ms,
        })?;

        let mut state = MultiTurnState::new(request.messages.clone());
        let mut total_usage = TokenUsage::default();

        loop {
            state.iteration = iteration_manager.start_iteration()?;
            state.last_iteration_time = std::time::Instant::now();

            let conversation_context = ConversationContext {
                history: state.messages.clone(),
                iteration: state.iteration,
                total_iterations: state.total_iterations,
                start_time: state.start_time,
                last_iteration_time: state.last_iteration_time,
                tool_execution_history_len: state.completed_tool_calls.len(),
            };

            let turn_request = ChatRequest { messages: state.messages.clone(), ..request.clone() };
            let http_request = self
                .plugin
                .translate_request(&turn_request, model_capabilities, Some(&conversation_context))?;
            let response = self.transport.fetch(http_request).await?;
            let unified = self.plugin.parse_response(response).await?;

            if let Some(usage) = &unified.usage {
                total_usage.accumulate(usage);
            }
            state.messages.push(unified.message.clone());
            state.last_response = Some(unified.message.clone());
            state.total_iterations += 1;

            let pending_calls = unified.message.tool_calls.clone();
            if !pending_calls.is_empty() {
                self.execute_tool_calls(&mut state, &pending_calls, multi_turn.tool_execution_strategy, multi_turn.max_concurrent_tools, multi_turn.tool_timeout_ms, multi_turn.continue_on_tool_error)
                    .await?;
            }

            let signal = analyze_conversation_termination(&state.messages, &state, Some(self.plugin.as_ref()))?;
            if pending_calls.is_empty() && signal.should_terminate {
                state.record_termination(signal);
                break;
            }

            let outcome = iteration_manager.complete_iteration();
            if !outcome.can_continue {
                let reason = outcome.termination_reason.unwrap_or(TerminationReason::Unknown);
                state.record_termination(no_signal_for(reason));
                break;
            }
        }

        let final_message = state
            .last_response
            .clone()
            .unwrap_or_else(Message::empty_assistant);

        Ok(ChatOutcome {
            messages: state.messages.clone(),
            final_message,
            usage: total_usage,
            termination_reason: state.termination_reason.unwrap_or(TerminationReason::Unknown),
            iterations: state.total_iterations,
        })
    }

    /// Dispatches every pending call through the Tool Router, then appends
    /// one `tool`-role result message per call **in call order**, matching
    /// `calls` by `call_id` rather than position — `ToolRouter::dispatch_many`
    /// returns results in completion order when `strategy` is `Parallel`
    /// (spec §5), not call order, so message-history append order is
    /// canonicalized back to call order here regardless of strategy.
    async fn execute_tool_calls(
        &self,
        state: &mut MultiTurnState,
        calls: &[ToolCall],
        strategy: ToolExecutionStrategy,
        max_concurrent: Option<usize>,
        tool_timeout_ms: Option<u64>,
        continue_on_tool_error: bool,
    ) -> Result<(), BridgeError> {
        let router = self.tool_router.as_ref().ok_or_else(|| {
            BridgeError::new(ErrorKind::Tool, "the model requested tool calls but no tool router is configured")
        })?;

        let tool_timeout = tool_timeout_ms.map(Duration::from_millis);
        let results = router
            .dispatch_many(calls, &state.messages, strategy, max_concurrent, tool_timeout)
            .await;
        let result_by_call_id: HashMap<&str, &ToolResult> =
            results.iter().map(|r| (r.call_id.as_str(), r)).collect();

        for call in calls {
            let result = result_by_call_id
                .get(call.id.as_str())
                .expect("dispatch_many returns exactly one result per call");
            if !result.success && !continue_on_tool_error {
                return Err(BridgeError::new(
                    ErrorKind::Tool,
                    result.error.clone().unwrap_or_else(|| format!("tool '{}' failed", call.name)),
                )
                .with_context("toolName", call.name.clone())
                .with_recovery_action(RecoveryAction::Abort));
            }
            let text = tool_result_text(result);
            state.messages.push(Message::tool_result(call.id.clone(), text));
        }

        // `completedToolCalls`/`results` follow dispatch_many's own return
        // order: call order when sequential, completion order when
        // parallel (spec §5) — unlike the message-history append above,
        // which is always call order.
        for result in results {
            let call = calls
                .iter()
                .find(|c| c.id == result.call_id)
                .expect("dispatch_many returns exactly one result per call")
                .clone();
            state.completed_tool_calls.push((call, result.clone()));
            state.results.push(result);
        }
        state.tool_calls.extend_from_slice(calls);
        Ok(())
    }

    /// Drives the streaming protocol: pumps the provider's delta stream
    /// through a `StreamingStateMachine`, pausing for tool execution and
    /// resuming exactly once per detected batch of tool calls. Returns the
    /// raw delta stream — callers (the Bridge Client) forward deltas to
    /// their caller while this loop handles pause/resume transparently.
    pub async fn run_stream(
        &self,
        request: &ChatRequest,
        model_capabilities: Option<&ModelCapabilities>,
    ) -> Result<BoxStream<'static, Result<StreamDelta, BridgeError>>, BridgeError> {
        let http_request = self.plugin.translate_request(request, model_capabilities, None)?;
        self.plugin.parse_stream(self.transport.as_ref(), http_request).await
    }

    /// One full streamed turn, including a single pause/execute/resume
    /// cycle if the provider emits tool calls mid-stream. Used by
    /// the Bridge Client when a request both streams and enables tools.
    pub async fn run_streaming_turn_with_tools(
        &self,
        request: &ChatRequest,
        model_capabilities: Option<&ModelCapabilities>,
        tool_timeout_ms: Option<u64>,
    ) -> Result<crate::bridge::streaming::StreamingResult, BridgeError> {
        let mut machine = StreamingStateMachine::new();
        let stream = self.run_stream(request, model_capabilities).await?;
        let mut result = machine.handle_streaming_response(stream).await;

        if result.success && !result.detected_tool_calls.is_empty() {
            let router = self.tool_router.as_ref().ok_or_else(|| {
                BridgeError::new(ErrorKind::Tool, "the model requested tool calls but no tool router is configured")
            })?;

            machine
                .pause_for_tool_execution(result.detected_tool_calls.clone())
                .map_err(|e| BridgeError::new(ErrorKind::Streaming, e.cause).with_recovery_action(recovery_from_streaming(e.recovery_action)))?;

            let tool_timeout = tool_timeout_ms.map(Duration::from_millis);
            let tool_results = router
                .dispatch_many(&result.detected_tool_calls, &request.messages, ToolExecutionStrategy::Sequential, None, tool_timeout)
                .await;

            machine
                .resume_after_tool_execution(&tool_results)
                .map_err(|e| BridgeError::new(ErrorKind::Streaming, e.cause).with_recovery_action(recovery_from_streaming(e.recovery_action)))?;
            machine
                .resume_to_idle()
                .map_err(|e| BridgeError::new(ErrorKind::Streaming, e.cause).with_recovery_action(recovery_from_streaming(e.recovery_action)))?;

            result.state = machine.state();
        }

        Ok(result)
    }
}

fn tool_result_text(result: &ToolResult) -> String {
    if result.success {
        result
            .data
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "null".to_string())
    } else {
        format!("error: {}", result.error.clone().unwrap_or_default())
    }
}

fn no_signal_for(reason: TerminationReason) -> UnifiedTerminationSignal {
    UnifiedTerminationSignal {
        should_terminate: true,
        reason,
        confidence: crate::bridge::turn::Confidence::High,
        provider_specific: crate::bridge::turn::ProviderSpecificTermination {
            original_field: "iteration_manager".to_string(),
            original_value: format!("{:?}", reason),
            metadata: Default::default(),
        },
        message: None,
    }
}

fn recovery_from_streaming(action: crate::bridge::streaming::RecoveryAction) -> RecoveryAction {
    match action {
        crate::bridge::streaming::RecoveryAction::Retry => RecoveryAction::Retry,
        crate::bridge::streaming::RecoveryAction::FallbackNonStreaming => RecoveryAction::FallbackNonStreaming,
        crate::bridge::streaming::RecoveryAction::Abort => RecoveryAction::Abort,
        crate::bridge::streaming::RecoveryAction::Continue => RecoveryAction::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::message::{ContentPart, Role};
    use crate::bridge::plugin::UnifiedResponse;
    use crate::bridge::request::{MultiTurnConfig, ToolDefinition};
    use crate::bridge::tools::{EchoTool, ToolRegistry};
    use crate::bridge::transport::{HttpRequest, HttpResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubPlugin {
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl ProviderPlugin for StubPlugin {
        fn id(&self) -> &str {
            "stub"
        }
        fn name(&self) -> &str {
            "Stub"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        async fn initialize(&self, _config: crate::bridge::plugin::ProviderConfig) -> Result<(), BridgeError> {
            Ok(())
        }
        fn translate_request(
            &self,
            _request: &ChatRequest,
            _model_capabilities: Option<&ModelCapabilities>,
            _conversation_context: Option<&ConversationContext>,
        ) -> Result<HttpRequest, BridgeError> {
            Ok(HttpRequest::new(crate::bridge::transport::HttpMethod::Post, "https://stub.test/chat"))
        }
        async fn parse_response(&self, _response: HttpResponse) -> Result<UnifiedResponse, BridgeError> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                let mut message = Message::new(Role::Assistant, vec![ContentPart::text("calling tool")]);
                message.tool_calls = vec![ToolCall::new("echo", serde_json::json!({"data": "x"}))];
                Ok(UnifiedResponse { message, usage: None, model: "stub".to_string(), metadata: Default::default() })
            } else {
                Ok(UnifiedResponse { message: Message::assistant("done"), usage: None, model: "stub".to_string(), metadata: Default::default() })
            }
        }
        fn detect_termination(&self, input: TerminationInput<'_>, _context: Option<&ConversationContext>) -> UnifiedTerminationSignal {
            match input {
                TerminationInput::Response(r) if r.message.tool_calls.is_empty() && r.message.text() == "done" => UnifiedTerminationSignal {
                    should_terminate: true,
                    reason: TerminationReason::NaturalCompletion,
                    confidence: crate::bridge::turn::Confidence::High,
                    provider_specific: Default::default(),
                    message: None,
                },
                _ => UnifiedTerminationSignal::no_signal("stub", "pending", "tool call pending"),
            }
        }
    }

    struct StubTransport;

    #[async_trait]
    impl Transport for StubTransport {
        async fn fetch(&self, _request: HttpRequest) -> Result<HttpResponse, BridgeError> {
            Ok(HttpResponse { status: 200, headers: Default::default(), body: b"{}".to_vec() })
        }
        async fn stream(&self, _request: HttpRequest) -> Result<BoxStream<'static, Result<Vec<u8>, BridgeError>>, BridgeError> {
            Err(BridgeError::new(ErrorKind::Streaming, "not used in this test"))
        }
    }

    async fn router_with_echo() -> Arc<ToolRouter> {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool::definition(), Arc::new(EchoTool), false).await.unwrap();
        Arc::new(ToolRouter::new(registry))
    }

    #[tokio::test]
    async fn single_turn_runs_without_multi_turn_config() {
        let plugin = Arc::new(StubPlugin { call_count: AtomicUsize::new(1) });
        let transport = Arc::new(StubTransport);
        let agent_loop = AgentLoop::new(plugin, transport, None);
        let request = ChatRequest::new("stub:model", vec![Message::user("hi")]);
        let outcome = agent_loop.run_chat(&request, None, true).await.unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.final_message.text(), "done");
    }

    #[tokio::test]
    async fn multi_turn_executes_tool_calls_and_terminates_naturally() {
        let plugin = Arc::new(StubPlugin { call_count: AtomicUsize::new(0) });
        let transport = Arc::new(StubTransport);
        let router = router_with_echo().await;
        let agent_loop = AgentLoop::new(plugin, transport, Some(router));

        let request = ChatRequest::new("stub:model", vec![Message::user("hi")])
            .with_tools(vec![ToolDefinition::new("echo", "echoes", serde_json::json!({}))])
            .with_multi_turn(MultiTurnConfig::default());

        let outcome = agent_loop.run_chat(&request, None, true).await.unwrap();
        assert_eq!(outcome.termination_reason, TerminationReason::NaturalCompletion);
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.messages.iter().any(|m| m.role == Role::Tool));
    }

    #[tokio::test]
    async fn missing_tool_router_is_a_tool_error_not_a_panic() {
        let plugin = Arc::new(StubPlugin { call_count: AtomicUsize::new(0) });
        let transport = Arc::new(StubTransport);
        let agent_loop = AgentLoop::new(plugin, transport, None);

        let request = ChatRequest::new("stub:model", vec![Message::user("hi")])
            .with_tools(vec![ToolDefinition::new("echo", "echoes", serde_json::json!({}))])
            .with_multi_turn(MultiTurnConfig::default().with_max_iterations(3));

        let err = agent_loop.run_chat(&request, None, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tool);
    }
}
