//! Parser configuration (§6).
//!
//! Follows the teacher SDK's builder pattern (`AgentOptionsBuilder`) but
//! without the validated-newtype machinery, since the only required fields
//! here are plain strings/callbacks with sensible defaults.

use crate::delta::DEFAULT_DELTA_SPLIT_THRESHOLD;
use crate::error::ErrorMetadata;

/// Callback invoked for every non-fatal diagnostic (§7). Never causes the
/// stream to abort; purely an observability hook.
pub type OnError = Box<dyn FnMut(&str, ErrorMetadata) + Send>;

/// Options shared by all protocol parsers.
pub struct ParserOptions {
    /// Non-fatal diagnostic sink. Defaults to a no-op.
    pub on_error: OnError,
    /// If set, malformed tool-call spans are re-emitted as literal text at
    /// finish instead of being suppressed (§6, §4.5, §4.6).
    pub emit_raw_tool_call_text_on_error: bool,
    /// Opening sentinel for the tagged-JSON protocol (§4.4). Default `<tool_call>`.
    pub tool_call_start: String,
    /// Closing sentinel for the tagged-JSON protocol (§4.4). Default `</tool_call>`.
    pub tool_call_end: String,
    /// Byte threshold above which a single large delta is split into
    /// multiple same-id deltas (§4.3, §9 — tunable, not a contract).
    pub delta_split_threshold: usize,
}

impl std::fmt::Debug for ParserOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserOptions")
            .field("on_error", &"<callback>")
            .field(
                "emit_raw_tool_call_text_on_error",
                &self.emit_raw_tool_call_text_on_error,
            )
            .field("tool_call_start", &self.tool_call_start)
            .field("tool_call_end", &self.tool_call_end)
            .field("delta_split_threshold", &self.delta_split_threshold)
            .finish()
    }
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            on_error: Box::new(|_, _| {}),
            emit_raw_tool_call_text_on_error: false,
            tool_call_start: "<tool_call>".to_string(),
            tool_call_end: "</tool_call>".to_string(),
            delta_split_threshold: DEFAULT_DELTA_SPLIT_THRESHOLD,
        }
    }
}

impl ParserOptions {
    /// Start building a [`ParserOptions`] with defaults.
    pub fn builder() -> ParserOptionsBuilder {
        ParserOptionsBuilder::default()
    }

    /// Invoke the configured diagnostic sink and also log at `tracing::debug!`
    /// (the ambient-diagnostics behavior described in `SPEC_FULL.md` §1).
    pub fn report_error(&mut self, message: &str, metadata: ErrorMetadata) {
        tracing::debug!(target: "tool_call_transducer", %message, ?metadata, "parse diagnostic");
        (self.on_error)(message, metadata);
    }
}

/// Builder for [`ParserOptions`].
#[derive(Default)]
pub struct ParserOptionsBuilder {
    on_error: Option<OnError>,
    emit_raw_tool_call_text_on_error: Option<bool>,
    tool_call_start: Option<String>,
    tool_call_end: Option<String>,
    delta_split_threshold: Option<usize>,
}

impl ParserOptionsBuilder {
    /// Set the non-fatal diagnostic sink.
    pub fn on_error(mut self, f: impl FnMut(&str, ErrorMetadata) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Set whether malformed tool-call spans are re-emitted as text at finish.
    pub fn emit_raw_tool_call_text_on_error(mut self, value: bool) -> Self {
        self.emit_raw_tool_call_text_on_error = Some(value);
        self
    }

    /// Override the tagged-JSON opening sentinel.
    pub fn tool_call_start(mut self, value: impl Into<String>) -> Self {
        self.tool_call_start = Some(value.into());
        self
    }

    /// Override the tagged-JSON closing sentinel.
    pub fn tool_call_end(mut self, value: impl Into<String>) -> Self {
        self.tool_call_end = Some(value.into());
        self
    }

    /// Override the large-delta split threshold.
    pub fn delta_split_threshold(mut self, value: usize) -> Self {
        self.delta_split_threshold = Some(value);
        self
    }

    /// Finish building, filling in defaults for anything unset.
    pub fn build(self) -> ParserOptions {
        let defaults = ParserOptions::default();
        ParserOptions {
            on_error: self.on_error.unwrap_or(defaults.on_error),
            emit_raw_tool_call_text_on_error: self
                .emit_raw_tool_call_text_on_error
                .unwrap_or(defaults.emit_raw_tool_call_text_on_error),
            tool_call_start: self.tool_call_start.unwrap_or(defaults.tool_call_start),
            tool_call_end: self.tool_call_end.unwrap_or(defaults.tool_call_end),
            delta_split_threshold: self
                .delta_split_threshold
                .unwrap_or(defaults.delta_split_threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ParserOptions::default();
        assert_eq!(opts.tool_call_start, "<tool_call>");
        assert_eq!(opts.tool_call_end, "</tool_call>");
        assert!(!opts.emit_raw_tool_call_text_on_error);
        assert_eq!(opts.delta_split_threshold, DEFAULT_DELTA_SPLIT_THRESHOLD);
    }

    #[test]
    fn test_builder_overrides() {
        let opts = ParserOptions::builder()
            .tool_call_start("<call>")
            .tool_call_end("</call>")
            .emit_raw_tool_call_text_on_error(true)
            .delta_split_threshold(64)
            .build();
        assert_eq!(opts.tool_call_start, "<call>");
        assert_eq!(opts.tool_call_end, "</call>");
        assert!(opts.emit_raw_tool_call_text_on_error);
        assert_eq!(opts.delta_split_threshold, 64);
    }

    #[test]
    fn test_on_error_callback_invoked() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut opts = ParserOptions::builder()
            .on_error(move |msg, _meta| seen_clone.lock().unwrap().push(msg.to_string()))
            .build();
        opts.report_error("bad json", ErrorMetadata::empty());
        assert_eq!(seen.lock().unwrap().as_slice(), ["bad json".to_string()]);
    }
}
