//! The stream event model (§3).
//!
//! A [`StreamEvent`] is the unit the transducer emits (for text/tool-call
//! lifecycles) and passes through (for everything else). The enum is
//! `#[non_exhaustive]` so new pass-through kinds can be added without
//! breaking downstream `match` arms.

use serde::{Deserialize, Serialize};

/// A single event in the ordered output stream.
///
/// See `SPEC_FULL.md` §3 for the full invariant list that must hold across
/// any sequence of these produced by the transducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum StreamEvent {
    /// Marks the beginning of a stream. Always first if present at all.
    StreamStart,

    /// Beginning of a prose text segment.
    TextStart {
        /// Segment id, unique among currently-open segments.
        id: String,
    },
    /// An incremental chunk of a prose text segment.
    TextDelta {
        /// Id of the segment this delta belongs to.
        id: String,
        /// The text fragment.
        delta: String,
    },
    /// End of a prose text segment.
    TextEnd {
        /// Id of the segment being closed.
        id: String,
    },

    /// Beginning of a reasoning ("thinking") segment. Pass-through.
    ReasoningStart {
        /// Segment id.
        id: String,
    },
    /// Incremental reasoning content. Pass-through.
    ReasoningDelta {
        /// Id of the segment this delta belongs to.
        id: String,
        /// The reasoning fragment.
        delta: String,
    },
    /// End of a reasoning segment. Pass-through.
    ReasoningEnd {
        /// Id of the segment being closed.
        id: String,
    },

    /// Beginning of a tool-call input lifecycle (§3 invariant 3).
    ToolInputStart {
        /// Tool-call id; unique per stream.
        id: String,
        /// Name of the tool, if already known when the lifecycle opens.
        tool_name: String,
    },
    /// An incremental, prefix-monotonic JSON fragment of the tool input (§3 invariant 4).
    ToolInputDelta {
        /// Tool-call id this delta belongs to.
        id: String,
        /// The next strictly-extending fragment of the JSON input string.
        delta: String,
    },
    /// End of a tool-call input lifecycle.
    ToolInputEnd {
        /// Tool-call id being closed.
        id: String,
    },
    /// The fully-reconciled tool call, emitted once the lifecycle has closed.
    ToolCall {
        /// Tool-call id (matches the earlier `tool-input-*` events).
        tool_call_id: String,
        /// Name of the tool invoked.
        tool_name: String,
        /// Fully-formed JSON input, as a string (coercion is an external concern).
        input: String,
    },

    /// A data source reference from the upstream model. Pass-through.
    Source {
        /// Opaque JSON payload describing the source.
        payload: serde_json::Value,
    },
    /// A file attachment reference from the upstream model. Pass-through.
    File {
        /// Opaque JSON payload describing the file.
        payload: serde_json::Value,
    },
    /// Provider-specific response metadata. Pass-through.
    ResponseMetadata {
        /// Opaque JSON payload.
        payload: serde_json::Value,
    },
    /// A request for the host to approve a pending tool call. Pass-through.
    ToolApprovalRequest {
        /// Opaque JSON payload.
        payload: serde_json::Value,
    },
    /// The result of executing a previously-emitted tool call. Pass-through.
    ToolResult {
        /// Opaque JSON payload.
        payload: serde_json::Value,
    },
    /// An unrecognized, provider-specific raw event. Pass-through.
    Raw {
        /// Opaque JSON payload.
        payload: serde_json::Value,
    },
    /// A non-fatal error surfaced by the upstream model/host. Pass-through.
    Error {
        /// Human-readable error message.
        message: String,
    },

    /// Terminal event; always the last event in a well-formed stream (§3 invariant 2).
    Finish {
        /// Normalized finish reason.
        reason: FinishReason,
        /// Token usage for the turn, if known.
        usage: Usage,
    },
}

/// Normalized finish reason (§3, §4.10).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation.
    Stop,
    /// The model elected to call one or more tools.
    ToolCalls,
    /// Generation stopped because the token budget was exhausted.
    Length,
    /// Generation was stopped by a content filter.
    ContentFilter,
    /// Any other/unrecognized raw reason, preserved verbatim.
    Other(String),
}

impl FinishReason {
    /// Normalize a raw upstream reason string, defaulting to [`FinishReason::Stop`]
    /// when absent (§4.10: "normalizing raw reason if absent").
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw {
            None => FinishReason::Stop,
            Some("stop") | Some("end_turn") => FinishReason::Stop,
            Some("tool_calls") | Some("tool_use") => FinishReason::ToolCalls,
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        }
    }
}

/// Token usage for a turn.
///
/// Some older providers report usage as a flat `{prompt, completion}` pair
/// rather than `{prompt_tokens, completion_tokens}`; [`Usage::from_legacy_shape`]
/// absorbs that without requiring callers to special-case it (§4.10).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt/input.
    pub prompt_tokens: u64,
    /// Tokens produced in the completion/output.
    pub completion_tokens: u64,
}

impl Usage {
    /// Construct usage from the modern field names.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Best-effort parse from either the modern (`prompt_tokens`/`completion_tokens`)
    /// or legacy (`prompt`/`completion`) numeric usage shape.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let prompt = value
            .get("prompt_tokens")
            .or_else(|| value.get("prompt"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let completion = value
            .get("completion_tokens")
            .or_else(|| value.get("completion"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }
}
