//! Non-streaming recovery / whole-text fallback (§4.9).
//!
//! Invoked when a complete, already-generated text produced no `tool-call`
//! through the normal streaming protocol parse (e.g. the model ignored the
//! wire format entirely and just emitted a bare JSON object). Candidates are
//! extracted in document order of appearance and the first one that parses
//! and is accepted wins — "earliest wins" across all three candidate kinds
//! pooled together, not a priority ordering between kinds.

use crate::buffer;
use crate::json_prefix::try_repair_and_parse;
use crate::tools::ToolRegistry;
use serde_json::Value;

/// A tool call recovered from whole, already-complete text.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredToolCall {
    /// Text preceding the recovered candidate span.
    pub text_before: String,
    /// Name of the recovered tool.
    pub tool_name: String,
    /// Recovered arguments, as a JSON string.
    pub input: String,
    /// Text following the recovered candidate span.
    pub text_after: String,
}

struct Candidate {
    start: usize,
    end: usize,
    raw: String,
}

/// Attempt non-streaming recovery of a single tool call from `text` (§4.9).
///
/// Returns `None` if no candidate both parses and is accepted by `tools`.
pub fn recover(text: &str, tools: &ToolRegistry) -> Option<RecoveredToolCall> {
    let mut candidates = Vec::new();
    candidates.extend(find_tool_call_tag_candidates(text));
    candidates.extend(find_fenced_code_candidates(text));
    candidates.extend(find_balanced_brace_candidates(text));
    candidates.sort_by_key(|c| c.start);

    for candidate in candidates {
        if let Some((tool_name, input)) = try_accept(&candidate.raw, tools) {
            return Some(RecoveredToolCall {
                text_before: text[..candidate.start].to_string(),
                tool_name,
                input,
                text_after: text[candidate.end..].to_string(),
            });
        }
    }
    None
}

fn tolerant_parse(raw: &str) -> Option<Value> {
    serde_json::from_str(raw)
        .ok()
        .or_else(|| serde_yaml::from_str::<Value>(raw).ok())
        .or_else(|| try_repair_and_parse(raw))
}

/// Envelope match (`{name, arguments}` against a known tool) or, failing
/// that, arguments-only match against the sole registered tool's schema.
fn try_accept(raw: &str, tools: &ToolRegistry) -> Option<(String, String)> {
    let value = tolerant_parse(raw)?;
    let obj = value.as_object()?;

    if let Some(name) = obj.get("name").and_then(Value::as_str) {
        if let Some(arguments) = obj.get("arguments").and_then(Value::as_object) {
            if tools.is_empty() || tools.get(name).is_some() {
                let input = serde_json::to_string(&Value::Object(arguments.clone())).ok()?;
                return Some((name.to_string(), input));
            }
        }
    }

    if let Some(tool) = tools.sole_tool() {
        if tool.accepts_arguments_only(obj) {
            let input = serde_json::to_string(&Value::Object(obj.clone())).ok()?;
            return Some((tool.name.clone(), input));
        }
    }

    None
}

/// Find every `<tool_call>...</tool_call>` span, earliest-opening-tag-first.
fn find_tool_call_tag_candidates(text: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut search_from = 0usize;
    loop {
        let Some((ostart, oend)) = buffer::find_ci(&text[search_from..], "<tool_call>") else { break };
        let abs_oend = search_from + oend;
        let Some((cstart, cend)) = buffer::find_ci(&text[abs_oend..], "</tool_call>") else { break };
        let abs_ostart = search_from + ostart;
        let abs_cstart = abs_oend + cstart;
        let abs_cend = abs_oend + cend;
        candidates.push(Candidate {
            start: abs_ostart,
            end: abs_cend,
            raw: text[abs_oend..abs_cstart].trim().to_string(),
        });
        search_from = abs_cend;
    }
    candidates
}

/// Find every fenced code block (` ```lang ` ... ` ``` `, language optional).
fn find_fenced_code_candidates(text: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut search_from = 0usize;
    while let Some(rel_start) = text[search_from..].find("```") {
        let start = search_from + rel_start;
        let after_fence = start + 3;
        let Some(nl_rel) = text[after_fence..].find('\n') else { break };
        let content_start = after_fence + nl_rel + 1;
        let Some(close_rel) = text[content_start..].find("```") else { break };
        let content_end = content_start + close_rel;
        let block_end = content_end + 3;
        candidates.push(Candidate {
            start,
            end: block_end,
            raw: text[content_start..content_end].trim().to_string(),
        });
        search_from = block_end;
    }
    candidates
}

/// Find every top-level balanced `{...}` substring (string-aware, max 10,000
/// bytes each).
fn find_balanced_brace_candidates(text: &str) -> Vec<Candidate> {
    const MAX_CANDIDATE_LEN: usize = 10_000;
    let mut candidates = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            match find_balanced_close(text, i, MAX_CANDIDATE_LEN) {
                Some(end) => {
                    candidates.push(Candidate { start: i, end, raw: text[i..end].to_string() });
                    i = end;
                    continue;
                }
                None => {
                    i += 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    candidates
}

/// String-aware search for the byte offset just past the `}` that closes the
/// `{` at `start`, scanning at most `max_len` bytes.
fn find_balanced_close(text: &str, start: usize, max_len: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let limit = (start + max_len).min(bytes.len());
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (idx, &b) in bytes.iter().enumerate().take(limit).skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}
