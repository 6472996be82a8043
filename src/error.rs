//! Error types for the tool-call transducer.
//!
//! Per the error-handling design (see `SPEC_FULL.md` §7), the vast majority of
//! parse failures are *not* fatal: they are reported through
//! [`crate::options::ParserOptions::on_error`] and the stream continues.
//! [`Error`] is reserved for the small set of failures that prevent a parser
//! (or a forced-path response) from being constructed or interpreted at all.

use thiserror::Error as ThisError;

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors for the tool-call transducer.
///
/// These are never raised mid-stream; see [`crate::options::ParserOptions::on_error`]
/// for the non-fatal diagnostic channel used during streaming.
#[derive(ThisError, Debug)]
pub enum Error {
    /// A tool descriptor was missing its name or carried an unparsable schema.
    #[error("invalid tool descriptor: {0}")]
    InvalidTool(String),

    /// A tool's `inputSchema` was not a JSON object.
    #[error("invalid input schema for tool '{tool}': {reason}")]
    InvalidSchema {
        /// Name of the offending tool.
        tool: String,
        /// Human-readable reason the schema was rejected.
        reason: String,
    },

    /// The tool-choice forced path (§4.10) received text that did not parse
    /// as a strict `{name, arguments}` envelope.
    #[error("forced tool-choice response did not parse as a tool-call envelope: {0}")]
    ForcedPathEnvelope(String),

    /// JSON serialization/deserialization error surfaced at a boundary where
    /// failure must abort construction rather than degrade gracefully.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a new invalid-tool-descriptor error.
    pub fn invalid_tool(msg: impl Into<String>) -> Self {
        Error::InvalidTool(msg.into())
    }

    /// Create a new invalid-schema error.
    pub fn invalid_schema(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidSchema {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Create a new forced-path envelope error.
    pub fn forced_path_envelope(msg: impl Into<String>) -> Self {
        Error::ForcedPathEnvelope(msg.into())
    }
}

/// Metadata attached to a non-fatal diagnostic delivered through
/// [`crate::options::ParserOptions::on_error`].
///
/// The field set is deliberately small and follows §7/§4.3: most callers only
/// need the emitted/final lengths for a prefix mismatch, or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorMetadata {
    /// Tool-call id the diagnostic pertains to, if any.
    pub tool_call_id: Option<String>,
    /// Length (in bytes) of the input already emitted via `tool-input-delta`.
    pub emitted_length: Option<usize>,
    /// Length (in bytes) of the final candidate that failed to extend it.
    pub final_length: Option<usize>,
}

impl ErrorMetadata {
    /// An empty metadata record.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Metadata for a prefix-mismatch diagnostic (§4.3 `emitFinalRemainder`).
    pub fn prefix_mismatch(tool_call_id: impl Into<String>, emitted_length: usize, final_length: usize) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            emitted_length: Some(emitted_length),
            final_length: Some(final_length),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_invalid_tool() {
        let err = Error::invalid_tool("missing name");
        assert!(matches!(err, Error::InvalidTool(_)));
        assert_eq!(err.to_string(), "invalid tool descriptor: missing name");
    }

    #[test]
    fn test_error_invalid_schema() {
        let err = Error::invalid_schema("get_weather", "not an object");
        assert_eq!(
            err.to_string(),
            "invalid input schema for tool 'get_weather': not an object"
        );
    }

    #[test]
    fn test_error_forced_path_envelope() {
        let err = Error::forced_path_envelope("missing 'arguments' key");
        assert!(matches!(err, Error::ForcedPathEnvelope(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_error_metadata_prefix_mismatch() {
        let meta = ErrorMetadata::prefix_mismatch("call_abc", 10, 8);
        assert_eq!(meta.tool_call_id.as_deref(), Some("call_abc"));
        assert_eq!(meta.emitted_length, Some(10));
        assert_eq!(meta.final_length, Some(8));
    }
}
