//! `StreamDelta`, `MultiTurnState`, and the unified termination signal.

use crate::bridge::message::{Message, TokenUsage, ToolCall};
use crate::bridge::streaming::StreamingState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A single incremental update of a streamed response. Invariant: exactly
/// one delta per response has `finished = true`, and it is the last one
/// emitted, unless the stream is aborted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDelta {
    pub id: String,
    pub delta: PartialMessage,
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A partial `Message`: role is only present on the first delta of a
/// response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialMessage {
    #[serde(default)]
    pub role: Option<crate::bridge::message::Role>,
    #[serde(default)]
    pub content: Vec<crate::bridge::message::ContentPart>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// The coarse, provider-agnostic reason a turn or stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    NaturalCompletion,
    MaxIterations,
    Timeout,
    Cancelled,
    Error,
    TokenLimitReached,
    ContentFiltered,
    StopSequence,
    Unknown,
}

impl TerminationReason {
    /// The enhanced reason is preserved on `currentTerminationSignal`, but
    /// the coarse `MultiTurnState` field collapses
    /// `token_limit_reached`/`content_filtered`/`stop_sequence` into
    /// `natural_completion`.
    pub fn coarsen(self) -> TerminationReason {
        match self {
            TerminationReason::TokenLimitReached
            | TerminationReason::ContentFiltered
            | TerminationReason::StopSequence => TerminationReason::NaturalCompletion,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Provider-specific evidence the analyzer based its decision on, preserved
/// for debugging and for `defaultDetectTermination`'s decoration step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSpecificTermination {
    pub original_field: String,
    pub original_value: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The provider-agnostic completion decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTerminationSignal {
    pub should_terminate: bool,
    pub reason: TerminationReason,
    pub confidence: Confidence,
    pub provider_specific: ProviderSpecificTermination,
    #[serde(default)]
    pub message: Option<String>,
}

impl UnifiedTerminationSignal {
    pub fn no_signal(reason_field: &str, reason_value: &str, message: &str) -> Self {
        UnifiedTerminationSignal {
            should_terminate: false,
            reason: TerminationReason::Unknown,
            confidence: Confidence::Low,
            provider_specific: ProviderSpecificTermination {
                original_field: reason_field.to_string(),
                original_value: reason_value.to_string(),
                metadata: HashMap::new(),
            },
            message: Some(message.to_string()),
        }
    }
}

/// Owned exclusively by one Agent Loop invocation; never shared across
/// callers.
#[derive(Debug, Clone)]
pub struct MultiTurnState {
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub results: Vec<crate::bridge::message::ToolResult>,
    pub should_continue: bool,
    pub last_response: Option<Message>,
    /// 1-based.
    pub iteration: u32,
    pub total_iterations: u32,
    pub start_time: Instant,
    pub last_iteration_time: Instant,
    pub streaming_state: StreamingState,
    pub pending_tool_calls: Vec<ToolCall>,
    pub completed_tool_calls: Vec<(ToolCall, crate::bridge::message::ToolResult)>,
    pub termination_reason: Option<TerminationReason>,
    pub termination_signal_history: Vec<UnifiedTerminationSignal>,
    pub current_termination_signal: Option<UnifiedTerminationSignal>,
}

impl MultiTurnState {
    pub fn new(messages: Vec<Message>) -> Self {
        let now = Instant::now();
        MultiTurnState {
            messages,
            tool_calls: Vec::new(),
            results: Vec::new(),
            should_continue: true,
            last_response: None,
            iteration: 1,
            total_iterations: 0,
            start_time: now,
            last_iteration_time: now,
            streaming_state: StreamingState::Idle,
            pending_tool_calls: Vec::new(),
            completed_tool_calls: Vec::new(),
            termination_reason: None,
            termination_signal_history: Vec::new(),
            current_termination_signal: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn record_termination(&mut self, signal: UnifiedTerminationSignal) {
        self.termination_reason = Some(signal.reason.coarsen());
        self.termination_signal_history.push(signal.clone());
        self.current_termination_signal = Some(signal);
        self.should_continue = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarsen_collapses_enhanced_reasons() {
        assert_eq!(
            TerminationReason::TokenLimitReached.coarsen(),
            TerminationReason::NaturalCompletion
        );
        assert_eq!(
            TerminationReason::MaxIterations.coarsen(),
            TerminationReason::MaxIterations
        );
    }

    #[test]
    fn record_termination_sets_coarse_reason_and_stops() {
        let mut state = MultiTurnState::new(vec![]);
        let signal = UnifiedTerminationSignal {
            should_terminate: true,
            reason: TerminationReason::StopSequence,
            confidence: Confidence::High,
            provider_specific: ProviderSpecificTermination::default(),
            message: None,
        };
        state.record_termination(signal);
        assert_eq!(state.termination_reason, Some(TerminationReason::NaturalCompletion));
        assert!(!state.should_continue);
        assert!(state.current_termination_signal.is_some());
    }
}
