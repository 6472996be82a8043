//! Top-level transducer facade (§5, §6).
//!
//! Owns the active protocol parser plus the shared tool registry and
//! options, and routes a sequence of upstream events: `text-delta` goes to
//! the protocol parser, `finish` triggers a flush and the terminal event,
//! and everything else is forwarded unchanged per the pass-through contract
//! (§6) — but only after closing any currently-open text segment (§5).

use crate::events::{FinishReason, StreamEvent, Usage};
use crate::options::ParserOptions;
use crate::protocol::{self, ProtocolKind, ProtocolParser};
use crate::tools::ToolRegistry;
use serde_json::Value;

/// A single upstream event fed into the transducer.
///
/// `TextDelta` is the only variant the active protocol parser actually
/// interprets; every other variant is forwarded as the matching
/// [`StreamEvent`] unchanged, after first closing any open text segment.
/// `Finish` is the one exception with side effects beyond forwarding: it
/// drives the protocol parser's `flush` (best-effort lifecycle
/// reconciliation) before the terminal `finish` event is emitted.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// Marks the beginning of a stream.
    StreamStart,
    /// A freshly-arrived fragment of raw model text (prose and/or markup).
    TextDelta(String),
    /// Beginning of a reasoning ("thinking") segment.
    ReasoningStart {
        /// Segment id.
        id: String,
    },
    /// Incremental reasoning content.
    ReasoningDelta {
        /// Id of the segment this delta belongs to.
        id: String,
        /// The reasoning fragment.
        delta: String,
    },
    /// End of a reasoning segment.
    ReasoningEnd {
        /// Id of the segment being closed.
        id: String,
    },
    /// A data source reference from the upstream model.
    Source {
        /// Opaque JSON payload describing the source.
        payload: Value,
    },
    /// A file attachment reference from the upstream model.
    File {
        /// Opaque JSON payload describing the file.
        payload: Value,
    },
    /// Provider-specific response metadata.
    ResponseMetadata {
        /// Opaque JSON payload.
        payload: Value,
    },
    /// A request for the host to approve a pending tool call.
    ToolApprovalRequest {
        /// Opaque JSON payload.
        payload: Value,
    },
    /// The result of executing a previously-emitted tool call.
    ToolResult {
        /// Opaque JSON payload.
        payload: Value,
    },
    /// An unrecognized, provider-specific raw event.
    Raw {
        /// Opaque JSON payload.
        payload: Value,
    },
    /// A non-fatal error surfaced by the upstream model/host.
    Error {
        /// Human-readable error message.
        message: String,
    },
    /// Upstream generation has finished.
    Finish {
        /// Raw, unnormalized finish reason string, if the provider sent one.
        raw_reason: Option<String>,
        /// Raw usage payload, in either the modern or legacy numeric shape.
        raw_usage: Option<Value>,
    },
}

/// The streaming tool-call transducer: wraps a single protocol parser and
/// drives it from a sequence of [`UpstreamEvent`]s.
pub struct Transducer {
    protocol: Box<dyn ProtocolParser>,
    tools: ToolRegistry,
    options: ParserOptions,
}

impl Transducer {
    /// Build a transducer for the given wire protocol, consuming calls
    /// against `tools`.
    pub fn new(kind: ProtocolKind, tools: ToolRegistry, options: ParserOptions) -> Self {
        Self {
            protocol: protocol::build(kind),
            tools,
            options,
        }
    }

    /// Feed a single upstream event, emitting zero or more [`StreamEvent`]s
    /// via `enqueue`, in order.
    pub fn transform(&mut self, event: UpstreamEvent, enqueue: &mut dyn FnMut(StreamEvent)) {
        match event {
            UpstreamEvent::TextDelta(delta) => {
                self.protocol.transform(&delta, &self.tools, &mut self.options, enqueue);
            }
            UpstreamEvent::Finish { raw_reason, raw_usage } => {
                self.protocol.flush(&self.tools, &mut self.options, enqueue);
                enqueue(StreamEvent::Finish {
                    reason: FinishReason::normalize(raw_reason.as_deref()),
                    usage: raw_usage.as_ref().map(Usage::from_json).unwrap_or_default(),
                });
            }
            other => self.forward_pass_through(other, enqueue),
        }
    }

    /// Close any open text segment, then forward the pass-through event
    /// unchanged. `TextDelta` and `Finish` never reach here.
    fn forward_pass_through(&mut self, event: UpstreamEvent, enqueue: &mut dyn FnMut(StreamEvent)) {
        self.protocol.close_open_text(enqueue);
        let forwarded = match event {
            UpstreamEvent::StreamStart => StreamEvent::StreamStart,
            UpstreamEvent::ReasoningStart { id } => StreamEvent::ReasoningStart { id },
            UpstreamEvent::ReasoningDelta { id, delta } => StreamEvent::ReasoningDelta { id, delta },
            UpstreamEvent::ReasoningEnd { id } => StreamEvent::ReasoningEnd { id },
            UpstreamEvent::Source { payload } => StreamEvent::Source { payload },
            UpstreamEvent::File { payload } => StreamEvent::File { payload },
            UpstreamEvent::ResponseMetadata { payload } => StreamEvent::ResponseMetadata { payload },
            UpstreamEvent::ToolApprovalRequest { payload } => StreamEvent::ToolApprovalRequest { payload },
            UpstreamEvent::ToolResult { payload } => StreamEvent::ToolResult { payload },
            UpstreamEvent::Raw { payload } => StreamEvent::Raw { payload },
            UpstreamEvent::Error { message } => StreamEvent::Error { message },
            UpstreamEvent::TextDelta(_) | UpstreamEvent::Finish { .. } => {
                unreachable!("handled directly in transform")
            }
        };
        enqueue(forwarded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDescriptor;

    fn weather_tools() -> ToolRegistry {
        ToolRegistry::new(vec![ToolDescriptor::new("get_weather", serde_json::json!({"type": "object"})).unwrap()])
    }

    #[test]
    fn test_text_delta_routes_to_active_protocol() {
        let mut transducer = Transducer::new(ProtocolKind::TaggedJson, weather_tools(), ParserOptions::default());
        let mut events = Vec::new();
        transducer.transform(
            UpstreamEvent::TextDelta(r#"<tool_call>{"name":"get_weather","arguments":{"location":"NY"}}</tool_call>"#.to_string()),
            &mut |e| events.push(e),
        );
        transducer.transform(UpstreamEvent::Finish { raw_reason: None, raw_usage: None }, &mut |e| events.push(e));

        assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolCall { tool_name, .. } if tool_name == "get_weather")));
        assert!(matches!(events.last(), Some(StreamEvent::Finish { reason: FinishReason::Stop, .. })));
    }

    #[test]
    fn test_pass_through_event_closes_open_text_segment() {
        let mut transducer = Transducer::new(ProtocolKind::TaggedJson, weather_tools(), ParserOptions::default());
        let mut events = Vec::new();
        transducer.transform(UpstreamEvent::TextDelta("hello there".to_string()), &mut |e| events.push(e));
        transducer.transform(
            UpstreamEvent::ReasoningStart { id: "r1".to_string() },
            &mut |e| events.push(e),
        );

        let text_end_idx = events.iter().position(|e| matches!(e, StreamEvent::TextEnd { .. })).unwrap();
        let reasoning_idx = events.iter().position(|e| matches!(e, StreamEvent::ReasoningStart { .. })).unwrap();
        assert!(text_end_idx < reasoning_idx);
    }

    #[test]
    fn test_pass_through_event_does_not_close_open_tool_input() {
        let mut transducer = Transducer::new(ProtocolKind::TaggedJson, weather_tools(), ParserOptions::default());
        let mut events = Vec::new();
        transducer.transform(
            UpstreamEvent::TextDelta(r#"<tool_call>{"name":"get_weather","arg"#.to_string()),
            &mut |e| events.push(e),
        );
        transducer.transform(
            UpstreamEvent::ToolResult { payload: serde_json::json!({"ok": true}) },
            &mut |e| events.push(e),
        );
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolInputStart { .. })));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::ToolInputEnd { .. })));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolResult { .. })));
    }

    #[test]
    fn test_finish_normalizes_legacy_usage_shape() {
        let mut transducer = Transducer::new(ProtocolKind::TaggedJson, weather_tools(), ParserOptions::default());
        let mut events = Vec::new();
        transducer.transform(
            UpstreamEvent::Finish {
                raw_reason: Some("tool_use".to_string()),
                raw_usage: Some(serde_json::json!({"prompt": 3, "completion": 2})),
            },
            &mut |e| events.push(e),
        );
        match events.last() {
            Some(StreamEvent::Finish { reason, usage }) => {
                assert_eq!(*reason, FinishReason::ToolCalls);
                assert_eq!(*usage, Usage::new(3, 2));
            }
            other => panic!("expected Finish, got {other:?}"),
        }
    }
}
