//! # Tool-Call Transducer
//!
//! A streaming parser that turns chunked LLM text output into an ordered
//! event stream, cleanly separating prose from tool-call markup across five
//! wire protocols.
//!
//! ## Overview
//!
//! Models emit tool calls as plain text embedded in their token stream —
//! wrapped in `<tool_call>` tags, spelled out as XML elements named after
//! the tool, or shoved into a YAML block. This crate consumes that text one
//! chunk at a time and produces a well-ordered sequence of [`StreamEvent`]s:
//! `text-start`/`text-delta`/`text-end` for prose, and
//! `tool-input-start`/`tool-input-delta`/`tool-input-end`/`tool-call` for a
//! tool invocation, with the guarantee that no partial sentinel or tag ever
//! leaks into a `text-delta`, no matter how the input was chunked.
//!
//! ## Key Features
//!
//! - **Chunk-boundary safe**: a sentinel split across two chunks never
//!   leaks a fragment into the text stream.
//! - **Five wire protocols**: tagged-JSON, element-XML, YAML-in-XML,
//!   shorthand-XML, and an attribute-based outer-container format.
//! - **Prefix-monotonic deltas**: `tool-input-delta` always extends what was
//!   already emitted for that call; non-extending candidates are dropped,
//!   not surfaced as corrupt output.
//! - **Non-streaming recovery**: a whole generated text that never used any
//!   recognized wire format can still yield a tool call via best-effort
//!   candidate extraction.
//! - **Forced tool-choice path**: a strict `{name, arguments}` parse for
//!   providers that force a specific tool.
//!
//! ## Basic usage
//!
//! ```
//! use tool_call_transducer::{ParserOptions, ProtocolKind, ToolDescriptor, ToolRegistry, Transducer, UpstreamEvent, StreamEvent};
//!
//! let tools = ToolRegistry::new(vec![
//!     ToolDescriptor::new("get_weather", serde_json::json!({"type": "object"})).unwrap(),
//! ]);
//! let mut transducer = Transducer::new(ProtocolKind::TaggedJson, tools, ParserOptions::default());
//!
//! let mut events = Vec::new();
//! transducer.transform(
//!     UpstreamEvent::TextDelta(r#"<tool_call>{"name":"get_weather","arguments":{"location":"NY"}}</tool_call>"#.to_string()),
//!     &mut |e| events.push(e),
//! );
//! transducer.transform(UpstreamEvent::Finish { raw_reason: None, raw_usage: None }, &mut |e| events.push(e));
//!
//! assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolCall { tool_name, .. } if tool_name == "get_weather")));
//! ```
//!
//! ## Architecture
//!
//! The crate is organized into several modules, each with a specific responsibility:
//!
//! - **parser**: the [`Transducer`] facade — routes upstream events to the
//!   active protocol parser and forwards pass-through events.
//! - **protocol**: the five wire-protocol implementations, each a
//!   self-contained streaming parser over its own chunk buffer and state.
//! - **buffer**: the chunk-boundary-safe prefix scanner shared by every
//!   protocol parser.
//! - **json_prefix**: incomplete-JSON prefix projection and best-effort
//!   repair-and-parse.
//! - **delta**: the prefix-monotonic delta emitter.
//! - **xml_common**: shared tag-matching and array-coercion helpers for the
//!   XML-flavored protocols.
//! - **recovery**: non-streaming whole-text fallback.
//! - **forced**: the tool-choice forced path.
//! - **tools**: tool descriptors and the tool registry.
//! - **options**: parser configuration.
//! - **events**: the [`StreamEvent`] model plus finish-reason/usage normalization.
//! - **error**: the crate's fatal error type and non-fatal diagnostic metadata.
//! - **ids**: tool-call and segment id generation.

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================
// These modules are private (internal implementation details) unless explicitly
// re-exported through `pub use` statements below.

/// Chunk-boundary-safe text buffer and sentinel scanner, shared by every
/// protocol parser.
mod buffer;

/// Prefix-monotonic delta emission for tool-call input.
mod delta;

/// The crate's fatal error type and non-fatal diagnostic metadata.
mod error;

/// The `StreamEvent` model, finish-reason normalization, and usage parsing.
mod events;

/// Tool-choice forced path: strict envelope parse of a whole non-streaming
/// generation.
mod forced;

/// Tool-call and text/reasoning segment id generation.
mod ids;

/// Incomplete-JSON prefix projection and tolerant repair-and-parse.
mod json_prefix;

/// Parser configuration (diagnostic sink, sentinel overrides, delta sizing).
mod options;

/// The top-level transducer facade routing upstream events to the active
/// protocol parser.
mod parser;

/// The five wire-protocol implementations and the dispatch enum selecting
/// among them.
mod protocol;

/// Non-streaming whole-text recovery fallback.
mod recovery;

/// Tool descriptors and the tool registry.
mod tools;

/// Shared tag-matching, text-trimming, and array-coercion helpers used by
/// the XML-flavored protocols.
mod xml_common;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================
// These items form the public API of the crate. Everything else is internal.

// --- Error Handling ---

pub use error::{Error, ErrorMetadata, Result};

// --- Event Model ---

pub use events::{FinishReason, StreamEvent, Usage};

// --- Tool-Choice Forced Path ---

pub use forced::parse_forced_response;

// --- Parser Configuration ---

pub use options::{OnError, ParserOptions, ParserOptionsBuilder};

// --- Transducer Facade ---

pub use parser::{Transducer, UpstreamEvent};

// --- Protocol Selection ---

pub use protocol::ProtocolKind;

// --- Non-Streaming Recovery ---

pub use recovery::{recover, RecoveredToolCall};

// --- Tool Descriptors ---

pub use tools::{ToolDescriptor, ToolRegistry};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use tool_call_transducer::prelude::*;` to get everything you
/// need for typical usage.
///
/// This includes:
/// - Transducer: `Transducer`, `UpstreamEvent`, `ProtocolKind`
/// - Events: `StreamEvent`, `FinishReason`, `Usage`
/// - Tools: `ToolDescriptor`, `ToolRegistry`
/// - Configuration: `ParserOptions`, `ParserOptionsBuilder`
/// - Recovery / forced path: `recover`, `RecoveredToolCall`, `parse_forced_response`
/// - Errors: `Error`, `ErrorMetadata`, `Result`
pub mod prelude {
    pub use crate::{
        parse_forced_response, recover, Error, ErrorMetadata, FinishReason, ParserOptions, ParserOptionsBuilder,
        ProtocolKind, RecoveredToolCall, Result, StreamEvent, ToolDescriptor, ToolRegistry, Transducer, UpstreamEvent,
        Usage,
    };
}
