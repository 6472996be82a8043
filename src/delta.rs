//! Delta emitter (§4.3).
//!
//! Maintains the per-tool-call "emitted so far" cursor and turns growing
//! JSON prefixes into `tool-input-delta` events, never corrupting the
//! stream when a candidate fails to extend the cursor.

use crate::error::ErrorMetadata;

/// Default byte threshold above which a single large delta is split into
/// multiple same-id deltas at codepoint boundaries (§4.3, tunable per §9).
pub const DEFAULT_DELTA_SPLIT_THRESHOLD: usize = 512;

/// Per-tool-call delta emission state.
#[derive(Debug, Clone, Default)]
pub struct DeltaEmitter {
    emitted_input: String,
}

impl DeltaEmitter {
    /// Create a fresh emitter with no input emitted yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything emitted so far for this tool call.
    pub fn emitted(&self) -> &str {
        &self.emitted_input
    }

    /// If `candidate` strictly extends what has already been emitted, return
    /// the new suffix and advance the cursor. Non-extending candidates are
    /// silently dropped (§4.3: "non-monotonic candidates are dropped, not
    /// errors").
    pub fn emit_prefix_delta(&mut self, candidate: &str) -> Option<String> {
        if candidate == self.emitted_input {
            return None;
        }
        if let Some(suffix) = candidate.strip_prefix(self.emitted_input.as_str()) {
            self.emitted_input = candidate.to_string();
            Some(suffix.to_string())
        } else {
            None
        }
    }

    /// Reconcile against the final, fully-resolved JSON. If it extends the
    /// cursor, returns the final suffix. If it does not, returns `Err` with
    /// diagnostic metadata describing the mismatch (§4.3); the caller is
    /// expected to forward this to `on_error` and still proceed to emit the
    /// final `tool-call` with the full `final_full_json`.
    pub fn emit_final_remainder(&mut self, final_full_json: &str) -> Result<Option<String>, ErrorMetadata> {
        if final_full_json == self.emitted_input {
            return Ok(None);
        }
        if let Some(suffix) = final_full_json.strip_prefix(self.emitted_input.as_str()) {
            self.emitted_input = final_full_json.to_string();
            Ok(Some(suffix.to_string()))
        } else {
            Err(ErrorMetadata::prefix_mismatch(
                "",
                self.emitted_input.len(),
                final_full_json.len(),
            ))
        }
    }

    /// Split a delta into codepoint-aligned chunks no larger than `threshold`
    /// bytes, for very large single-chunk content (§4.3 "Optional chunked variant").
    pub fn split_for_emission(delta: &str, threshold: usize) -> Vec<String> {
        if delta.len() <= threshold || threshold == 0 {
            return vec![delta.to_string()];
        }
        let mut chunks = Vec::new();
        let mut start = 0;
        let bytes = delta.as_bytes();
        while start < bytes.len() {
            let mut end = (start + threshold).min(bytes.len());
            while end < bytes.len() && !delta.is_char_boundary(end) {
                end -= 1;
            }
            if end <= start {
                // Degenerate case: threshold smaller than one codepoint; advance
                // by exactly one full codepoint to guarantee forward progress.
                end = start + delta[start..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
            }
            chunks.push(delta[start..end].to_string());
            start = end;
        }
        chunks
    }
}
