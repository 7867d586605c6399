//! Generic SSE parsing, built on `eventsource-stream` — the idiomatic
//! choice for a unified multi-provider LLM client that parses provider SSE
//! streams directly instead of delegating to a per-provider SDK.

use eventsource_stream::Eventsource;
use futures_util::stream::{BoxStream, StreamExt};

use crate::bridge::error::{BridgeError, ErrorKind};

/// One parsed SSE event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// `[DONE]` sentinel honored by OpenAI-like flows.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Wraps a raw byte stream (as produced by `Transport::stream`) into a
/// stream of `SseEvent`s. Malformed framing at the transport layer
/// surfaces as a `Streaming`-kind `BridgeError`; well-formed-but-unparsable
/// individual events are the caller's concern — the provider-specific JSON
/// decode happens one layer up, and a malformed JSON payload in a single
/// event is logged and skipped there rather than killing the stream.
pub fn parse_sse(byte_stream: BoxStream<'static, Result<Vec<u8>, BridgeError>>) -> BoxStream<'static, Result<SseEvent, BridgeError>> {
    let mapped = byte_stream.map(|chunk| chunk.map(bytes::Bytes::from));
    let es = mapped.eventsource();
    es.map(|res| {
        res.map(|event| SseEvent {
            event: if event.event.is_empty() { None } else { Some(event.event) },
            data: event.data,
            id: if event.id.is_empty() { None } else { Some(event.id) },
            retry: event.retry.map(|d| d.as_millis() as u64 / 1000),
        })
        .map_err(|e| BridgeError::new(ErrorKind::Streaming, format!("SSE framing error: {}", e)))
    })
    .boxed()
}

/// Whether this event's data is the `[DONE]` end-of-stream sentinel.
pub fn is_done(event: &SseEvent) -> bool {
    event.data.trim() == DONE_SENTINEL
}

/// Decodes an SSE event's `data` field as JSON, returning `None` (to be
/// logged and skipped by the caller) on malformed JSON rather than
/// propagating an error — a single bad event must not kill the stream.
pub fn decode_event_json(event: &SseEvent) -> Option<serde_json::Value> {
    if is_done(event) {
        return None;
    }
    serde_json::from_str(&event.data).ok()
}

/// A provider error event embedded mid-stream (as opposed to a framing
/// failure) throws a `BridgeError` carrying the provider's error
/// type/code.
pub fn provider_error_event(provider_id: &str, error_type: &str, message: &str) -> BridgeError {
    BridgeError::new(ErrorKind::Provider, message.to_string())
        .with_context("providerId", provider_id.to_string())
        .with_context("providerErrorType", error_type.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_done_sentinel() {
        let event = SseEvent {
            event: None,
            data: "[DONE]".to_string(),
            id: None,
            retry: None,
        };
        assert!(is_done(&event));
        assert!(decode_event_json(&event).is_none());
    }

    #[test]
    fn decodes_well_formed_json_event() {
        let event = SseEvent {
            event: None,
            data: r#"{"choices":[{"delta":{"content":"hi"}}]}"#.to_string(),
            id: None,
            retry: None,
        };
        let value = decode_event_json(&event).expect("should decode");
        assert_eq!(value["choices"][0]["delta"]["content"], "hi");
    }

    #[test]
    fn malformed_json_decodes_to_none_not_error() {
        let event = SseEvent {
            event: None,
            data: "{not json".to_string(),
            id: None,
            retry: None,
        };
        assert!(decode_event_json(&event).is_none());
    }
}
