//! Shorthand-XML protocol (§4.7):
//! `<tool_call><function=NAME>(<parameter=KEY>VALUE</parameter>)*</function></tool_call>`.
//!
//! `<call=NAME>` is accepted as a legacy synonym for `<function=NAME>`.
//! `VALUE` is literal text and may itself contain `<` characters (including a
//! stray `</tool>`) that do not match one of the four structural markers
//! (`<parameter=`, `</parameter>`, `</function>`, `</tool_call>`) at the
//! current scan position — those are the only things this protocol treats as
//! syntax (§8 seed scenario 5).

use crate::buffer::{self, ChunkBuffer};
use crate::delta::DeltaEmitter;
use crate::error::ErrorMetadata;
use crate::events::StreamEvent;
use crate::ids::{generate_segment_id, generate_tool_call_id};
use crate::json_prefix::to_incomplete_json_prefix;
use crate::options::ParserOptions;
use crate::protocol::{Enqueue, ProtocolParser};
use crate::tools::ToolRegistry;
use crate::xml_common::{build_candidate_from_children, build_final_from_children, trim_element_text, CallState};
use serde_json::Value;

const OUTER_OPEN: &str = "<tool_call>";
const OUTER_CLOSE: &str = "</tool_call>";

enum State {
    Outside,
    /// Consumed `<tool_call>`; waiting for `<function=NAME>` or `<call=NAME>`.
    AwaitingFunctionTag,
    Inside { call: CallState, children: Vec<(String, String)>, closer: &'static str },
    /// `</function>`/`</call>` seen and the call finalized; waiting for `</tool_call>`.
    AwaitingOuterClose,
}

/// Streaming parser for the shorthand-XML wire protocol.
pub struct ShorthandXmlParser {
    state: State,
    buffer: ChunkBuffer,
    text_id: Option<String>,
}

impl ShorthandXmlParser {
    /// Create a fresh parser, starting outside any tool-call span.
    pub fn new() -> Self {
        Self {
            state: State::Outside,
            buffer: ChunkBuffer::new(),
            text_id: None,
        }
    }

    fn open_text(&mut self, enqueue: &mut Enqueue<'_>) -> String {
        if let Some(id) = &self.text_id {
            return id.clone();
        }
        let id = generate_segment_id();
        enqueue(StreamEvent::TextStart { id: id.clone() });
        self.text_id = Some(id.clone());
        id
    }

    fn close_text(&mut self, enqueue: &mut Enqueue<'_>) {
        if let Some(id) = self.text_id.take() {
            enqueue(StreamEvent::TextEnd { id });
        }
    }

    fn flush_text(&mut self, text: &str, enqueue: &mut Enqueue<'_>) {
        if text.is_empty() {
            return;
        }
        let id = self.open_text(enqueue);
        enqueue(StreamEvent::TextDelta { id, delta: text.to_string() });
    }

    fn try_progress(&mut self, tool_name: &str, id: &str, children: &[(String, String)], emitter: &mut DeltaEmitter, tools: &ToolRegistry, enqueue: &mut Enqueue<'_>) {
        let schema = tools.get(tool_name);
        let candidate = build_candidate_from_children(children, schema);
        let Ok(candidate_json) = serde_json::to_string(&Value::Object(candidate)) else {
            return;
        };
        let prefix = to_incomplete_json_prefix(&candidate_json);
        if let Some(delta) = emitter.emit_prefix_delta(&prefix) {
            enqueue(StreamEvent::ToolInputDelta { id: id.to_string(), delta });
        }
    }

    fn finalize(
        &mut self,
        id: &str,
        tool_name: &str,
        children: &[(String, String)],
        emitter: &mut DeltaEmitter,
        tools: &ToolRegistry,
        options: &mut ParserOptions,
        enqueue: &mut Enqueue<'_>,
    ) {
        let schema = tools.get(tool_name);
        let mut value = Value::Object(build_final_from_children(children, schema));
        if let Some(s) = schema {
            crate::xml_common::coerce_leaves(&mut value, s);
        }
        let input = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
        match emitter.emit_final_remainder(&input) {
            Ok(Some(delta)) => enqueue(StreamEvent::ToolInputDelta { id: id.to_string(), delta }),
            Ok(None) => {}
            Err(meta) => options.report_error("shorthand-xml final remainder did not extend emitted input", meta),
        }
        enqueue(StreamEvent::ToolInputEnd { id: id.to_string() });
        enqueue(StreamEvent::ToolCall {
            tool_call_id: id.to_string(),
            tool_name: tool_name.to_string(),
            input,
        });
    }
}

impl Default for ShorthandXmlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for ShorthandXmlParser {
    fn transform(&mut self, delta: &str, tools: &ToolRegistry, options: &mut ParserOptions, enqueue: &mut Enqueue<'_>) {
        self.buffer.append(delta);
        loop {
            match std::mem::replace(&mut self.state, State::Outside) {
                State::Outside => {
                    let flushed = self.buffer.flush_safe_prefix(&[OUTER_OPEN]);
                    if !flushed.is_empty() {
                        self.flush_text(&flushed, enqueue);
                    }
                    match self.buffer.find_ci(OUTER_OPEN) {
                        Some((0, end)) => {
                            self.buffer.consume(end);
                            self.close_text(enqueue);
                            self.state = State::AwaitingFunctionTag;
                            continue;
                        }
                        _ => {
                            self.state = State::Outside;
                            break;
                        }
                    }
                }
                State::AwaitingFunctionTag => {
                    let trimmed_lead = self.buffer.as_str().len() - self.buffer.as_str().trim_start().len();
                    if trimmed_lead > 0 {
                        self.buffer.consume(trimmed_lead);
                    }
                    match scan_function_tag(self.buffer.as_str()) {
                        FunctionTagScan::Found { name, consumed, closer } => {
                            self.buffer.consume(consumed);
                            let id = generate_tool_call_id();
                            enqueue(StreamEvent::ToolInputStart { id: id.clone(), tool_name: name.clone() });
                            self.state = State::Inside { call: CallState::new(id, name), children: Vec::new(), closer };
                            continue;
                        }
                        FunctionTagScan::NotYet => {
                            self.state = State::AwaitingFunctionTag;
                            break;
                        }
                        FunctionTagScan::Malformed => {
                            options.report_error("shorthand-xml tool call did not open with <function=...> or <call=...>", ErrorMetadata::empty());
                            let raw = format!("{OUTER_OPEN}{}", self.buffer.take());
                            self.flush_text(&raw, enqueue);
                            self.state = State::Outside;
                            break;
                        }
                    }
                }
                State::Inside { mut call, mut children, closer } => {
                    let sentinels = ["<parameter=", closer, OUTER_CLOSE];
                    let idx = buffer::potential_start_index(self.buffer.as_str(), &sentinels);
                    let settled = &self.buffer.as_str()[..idx];

                    let (mut new_children, consumed) = tokenize_parameters(settled);
                    children.append(&mut new_children);
                    self.buffer.consume(consumed);

                    let remainder = self.buffer.as_str();
                    let trimmed = remainder.trim_start();
                    if trimmed.len() >= closer.len() && trimmed.is_char_boundary(closer.len()) && trimmed[..closer.len()].eq_ignore_ascii_case(closer) {
                        let ws = remainder.len() - trimmed.len();
                        let tag_len = ws + closer.len();
                        self.buffer.consume(tag_len);
                        self.state = State::Outside;
                        self.finalize(&call.id.clone(), &call.tool_name.clone(), &children, &mut call.emitter, tools, options, enqueue);
                        self.state = State::AwaitingOuterClose;
                        continue;
                    }

                    self.try_progress(&call.tool_name.clone(), &call.id.clone(), &children, &mut call.emitter, tools, enqueue);
                    self.state = State::Inside { call, children, closer };
                    break;
                }
                State::AwaitingOuterClose => {
                    let flushed = self.buffer.flush_safe_prefix(&[OUTER_CLOSE]);
                    // Anything between `</function>` and `</tool_call>` is
                    // grammar-insignificant whitespace; drop it silently
                    // rather than surfacing it as prose.
                    let _ = flushed;
                    match self.buffer.find_ci(OUTER_CLOSE) {
                        Some((0, end)) => {
                            self.buffer.consume(end);
                            self.state = State::Outside;
                            continue;
                        }
                        _ => {
                            self.state = State::AwaitingOuterClose;
                            break;
                        }
                    }
                }
            }
        }
    }

    fn flush(&mut self, tools: &ToolRegistry, options: &mut ParserOptions, enqueue: &mut Enqueue<'_>) {
        match std::mem::replace(&mut self.state, State::Outside) {
            State::Outside => {
                let remainder = self.buffer.take();
                self.flush_text(&remainder, enqueue);
            }
            State::AwaitingFunctionTag => {
                let remainder = self.buffer.take();
                options.report_error("shorthand-xml tool call unterminated at finish", ErrorMetadata::empty());
                let raw = format!("{OUTER_OPEN}{remainder}");
                self.flush_text(&raw, enqueue);
            }
            State::Inside { mut call, mut children, .. } => {
                let remainder = self.buffer.take();
                let (mut new_children, _consumed) = tokenize_parameters(&remainder);
                children.append(&mut new_children);
                self.finalize(&call.id.clone(), &call.tool_name.clone(), &children, &mut call.emitter, tools, options, enqueue);
            }
            State::AwaitingOuterClose => {
                // Trailing `</tool_call>` (or a prefix of it) is purely
                // structural; the call already finalized.
                self.buffer.take();
            }
        }
        self.close_text(enqueue);
    }

    fn close_open_text(&mut self, enqueue: &mut Enqueue<'_>) {
        self.close_text(enqueue);
    }
}

enum FunctionTagScan {
    Found { name: String, consumed: usize, closer: &'static str },
    NotYet,
    Malformed,
}

/// Recognize `<function=NAME>` or `<call=NAME>` at the start of `span`
/// (ASCII case-insensitive on the literal portion, per §6). The matching
/// close tag mirrors whichever opening spelling was used.
fn scan_function_tag(span: &str) -> FunctionTagScan {
    for (prefix, closer) in [("<function=", "</function>"), ("<call=", "</call>")] {
        if span.len() >= prefix.len() && span.is_char_boundary(prefix.len()) && span[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let after = &span[prefix.len()..];
            return match after.find('>') {
                Some(name_end) => FunctionTagScan::Found {
                    name: after[..name_end].trim().to_string(),
                    consumed: prefix.len() + name_end + 1,
                    closer,
                },
                None => FunctionTagScan::NotYet,
            };
        }
        if span.len() < prefix.len() && prefix[..span.len()].eq_ignore_ascii_case(span) {
            return FunctionTagScan::NotYet;
        }
    }
    if span.is_empty() {
        return FunctionTagScan::NotYet;
    }
    FunctionTagScan::Malformed
}

/// Scan `span` for complete `<parameter=K>V</parameter>` pairs starting at
/// position 0, in document order. Stops at the first thing that isn't a
/// `<parameter=` open (typically `</function>`/`</tool_call>`, or an
/// incomplete trailing parameter left for the next round). Returns the
/// children found and the consumed byte offset.
fn tokenize_parameters(span: &str) -> (Vec<(String, String)>, usize) {
    let mut children = Vec::new();
    let mut pos = 0usize;
    loop {
        let rest = &span[pos..];
        let skip = rest.len() - rest.trim_start().len();
        pos += skip;
        let rest = &span[pos..];
        let Some(after) = rest.strip_prefix("<parameter=") else { break };
        let Some(tag_end) = after.find('>') else { break };
        let key = after[..tag_end].trim().to_string();
        let value_start = pos + "<parameter=".len() + tag_end + 1;
        match buffer::find_ci(&span[value_start..], "</parameter>") {
            Some((vstart, vend)) => {
                let value = trim_element_text(&span[value_start..value_start + vstart]);
                children.push((key, value));
                pos = value_start + vend;
            }
            None => break,
        }
    }
    (children, pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDescriptor;

    fn run(chunks: &[&str], tools: ToolRegistry) -> Vec<StreamEvent> {
        let mut parser = ShorthandXmlParser::new();
        let mut options = ParserOptions::default();
        let mut events = Vec::new();
        for chunk in chunks {
            parser.transform(chunk, &tools, &mut options, &mut |e| events.push(e));
        }
        parser.flush(&tools, &mut options, &mut |e| events.push(e));
        events
    }

    #[test]
    fn test_seed_scenario_5_literal_tool_tag_inside_value() {
        let tools = ToolRegistry::new(vec![ToolDescriptor::new("alpha", serde_json::json!({"type": "object"})).unwrap()]);
        let events = run(
            &["<tool_call><function=alpha><parameter=query>How to use </tool> tag</parameter></function></tool_call>"],
            tools,
        );
        let tool_call = events.iter().find_map(|e| match e {
            StreamEvent::ToolCall { tool_name, input, .. } => Some((tool_name.clone(), input.clone())),
            _ => None,
        });
        assert_eq!(
            tool_call,
            Some(("alpha".to_string(), r#"{"query":"How to use </tool> tag"}"#.to_string()))
        );
    }

    #[test]
    fn test_legacy_call_synonym_and_array_coercion() {
        let tools = ToolRegistry::new(vec![ToolDescriptor::new("math_sum", serde_json::json!({"type": "object"})).unwrap()]);
        let events = run(
            &["<tool_call><call=math_sum><parameter=numbers>3</parameter><parameter=numbers>5</parameter></call></tool_call>"],
            tools,
        );
        let tool_call = events.iter().find_map(|e| match e {
            StreamEvent::ToolCall { input, .. } => Some(input.clone()),
            _ => None,
        });
        assert_eq!(tool_call, Some(r#"{"numbers":["3","5"]}"#.to_string()));
    }

    #[test]
    fn test_split_across_chunks_preserves_prefix_monotonicity() {
        let tools = ToolRegistry::new(vec![ToolDescriptor::new("get_weather", serde_json::json!({"type": "object"})).unwrap()]);
        let events = run(
            &[
                "<tool_call><function=get_weather><parameter=loc",
                "ation>Seoul</parameter></function></tool_call>",
            ],
            tools,
        );
        let tool_call = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCall { input, .. } => Some(input.clone()),
                _ => None,
            })
            .unwrap();
        let deltas: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolInputDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, tool_call);
    }

    #[test]
    fn test_prose_around_call_is_preserved() {
        let tools = ToolRegistry::new(vec![ToolDescriptor::new("ping", serde_json::json!({"type": "object"})).unwrap()]);
        let events = run(
            &["Checking: <tool_call><function=ping></function></tool_call> done."],
            tools,
        );
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Checking:  done.");
    }
}
