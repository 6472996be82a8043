//! YAML-in-XML protocol (§4.6): `<tool_name>\nkey: value\n...\n</tool_name>`.
//!
//! Body content is YAML (parsed with `serde_yaml`, the same crate
//! `scottidler-loopr` depends on for its own tool-call plumbing). Progress
//! re-parses iteratively drop the last not-yet-stable line and retry, per
//! the stability rules in §4.6: an incomplete mapping line, sequence item,
//! split scalar continuation, or unterminated block scalar must never
//! surface in a progress candidate.

use crate::buffer::{self, ChunkBuffer};
use crate::delta::DeltaEmitter;
use crate::error::ErrorMetadata;
use crate::events::StreamEvent;
use crate::ids::{generate_segment_id, generate_tool_call_id};
use crate::json_prefix::to_incomplete_json_prefix;
use crate::options::ParserOptions;
use crate::protocol::{Enqueue, ProtocolParser};
use crate::tools::ToolRegistry;
use crate::xml_common::{CallState, TagMatcher};
use serde_json::Value;

enum State {
    Outside,
    Inside { call: CallState, settled: String },
}

/// Streaming parser for the YAML-in-XML wire protocol.
pub struct YamlXmlParser {
    state: State,
    buffer: ChunkBuffer,
    text_id: Option<String>,
    matcher: TagMatcher,
}

impl YamlXmlParser {
    /// Create a fresh parser, starting outside any tool element.
    pub fn new() -> Self {
        Self {
            state: State::Outside,
            buffer: ChunkBuffer::new(),
            text_id: None,
            matcher: TagMatcher::new(),
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

    fn try_progress(&mut self, id: &str, settled: &str, emitter: &mut DeltaEmitter, enqueue: &mut Enqueue<'_>) {
        let Some(Value::Object(map)) = stabilized_yaml_object(settled) else {
            return;
        };
        let Ok(candidate_json) = serde_json::to_string(&Value::Object(map)) else {
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
        settled: &str,
        emitter: &mut DeltaEmitter,
        options: &mut ParserOptions,
        enqueue: &mut Enqueue<'_>,
    ) {
        let parsed = serde_yaml::from_str::<Value>(settled)
            .ok()
            .or_else(|| stabilized_yaml_object(settled))
            .or_else(|| stabilized_yaml_object(strip_trailing_partial_close_tag(settled, tool_name)));

        let Some(Value::Object(map)) = parsed else {
            options.report_error("yaml-in-xml tool call body did not parse", ErrorMetadata::empty());
            if options.emit_raw_tool_call_text_on_error {
                let raw = format!("<{tool_name}>{settled}</{tool_name}>");
                self.flush_text(&raw, enqueue);
            }
            return;
        };

        let input = serde_json::to_string(&Value::Object(map)).unwrap_or_else(|_| "{}".to_string());
        match emitter.emit_final_remainder(&input) {
            Ok(Some(delta)) => enqueue(StreamEvent::ToolInputDelta { id: id.to_string(), delta }),
            Ok(None) => {}
            Err(meta) => options.report_error("yaml-in-xml final remainder did not extend emitted input", meta),
        }
        enqueue(StreamEvent::ToolInputEnd { id: id.to_string() });
        enqueue(StreamEvent::ToolCall {
            tool_call_id: id.to_string(),
            tool_name: tool_name.to_string(),
            input,
        });
    }
}

impl Default for YamlXmlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for YamlXmlParser {
    fn transform(&mut self, delta: &str, tools: &ToolRegistry, options: &mut ParserOptions, enqueue: &mut Enqueue<'_>) {
        self.buffer.append(delta);
        loop {
            match std::mem::replace(&mut self.state, State::Outside) {
                State::Outside => {
                    let sentinels: Vec<String> = tools.names().map(|n| format!("<{n}")).collect();
                    let sentinel_refs: Vec<&str> = sentinels.iter().map(String::as_str).collect();
                    let flushed = self.buffer.flush_safe_prefix(&sentinel_refs);
                    if !flushed.is_empty() {
                        self.flush_text(&flushed, enqueue);
                    }

                    let haystack = self.buffer.as_str().to_string();
                    let mut matched: Option<(String, usize)> = None;
                    for name in tools.names() {
                        let (open, _) = self.matcher.for_tool(name);
                        if let Some(caps) = open.captures(&haystack) {
                            let whole = caps.get(0).unwrap();
                            if whole.start() == 0 && caps.get(1).is_none() {
                                matched = Some((name.to_string(), whole.end()));
                                break;
                            }
                        }
                    }

                    match matched {
                        Some((name, len)) => {
                            self.buffer.consume(len);
                            self.close_text(enqueue);
                            let id = generate_tool_call_id();
                            enqueue(StreamEvent::ToolInputStart { id: id.clone(), tool_name: name.clone() });
                            self.state = State::Inside { call: CallState::new(id, name), settled: String::new() };
                            continue;
                        }
                        None => {
                            self.state = State::Outside;
                            break;
                        }
                    }
                }
                State::Inside { mut call, mut settled } => {
                    let close_literal = format!("</{}>", call.tool_name);
                    if let Some((start, end)) = buffer::find_ci(self.buffer.as_str(), &close_literal) {
                        settled.push_str(&self.buffer.as_str()[..start]);
                        self.buffer.consume(end);
                        self.state = State::Outside;
                        self.finalize(&call.id.clone(), &call.tool_name.clone(), &settled, &mut call.emitter, options, enqueue);
                        continue;
                    } else {
                        let partial_close = format!("</{}", call.tool_name);
                        let idx = buffer::potential_start_index(self.buffer.as_str(), &[partial_close.as_str()]);
                        settled.push_str(&self.buffer.as_str()[..idx]);
                        self.buffer.consume(idx);
                        self.try_progress(&call.id.clone(), &settled, &mut call.emitter, enqueue);
                        self.state = State::Inside { call, settled };
                        break;
                    }
                }
            }
        }
    }

    fn flush(&mut self, tools: &ToolRegistry, options: &mut ParserOptions, enqueue: &mut Enqueue<'_>) {
        let _ = tools;
        match std::mem::replace(&mut self.state, State::Outside) {
            State::Outside => {
                let remainder = self.buffer.take();
                self.flush_text(&remainder, enqueue);
            }
            State::Inside { mut call, mut settled } => {
                settled.push_str(&self.buffer.take());
                self.finalize(&call.id.clone(), &call.tool_name.clone(), &settled, &mut call.emitter, options, enqueue);
            }
        }
        self.close_text(enqueue);
    }

    fn close_open_text(&mut self, enqueue: &mut Enqueue<'_>) {
        self.close_text(enqueue);
    }
}

/// Best-effort strip of a trailing partial close-tag prefix (e.g. `</toolNa`)
/// at finish, so a dangling body can still be accepted (§4.6 finish policy).
fn strip_trailing_partial_close_tag<'a>(settled: &'a str, tool_name: &str) -> &'a str {
    let close = format!("</{tool_name}>");
    for len in (1..close.len()).rev() {
        if settled.ends_with(&close[..len]) {
            return &settled[..settled.len() - len];
        }
    }
    settled
}

/// Iteratively drop the last not-yet-stable line and attempt a YAML parse,
/// returning the first object value obtained this way (§4.6).
fn stabilized_yaml_object(settled: &str) -> Option<Value> {
    let mut lines: Vec<&str> = settled.lines().collect();
    loop {
        if lines.is_empty() {
            return None;
        }
        if let Some(last) = lines.last() {
            if !is_stable_trailing_line(last) {
                lines.pop();
                continue;
            }
        }
        let joined = lines.join("\n");
        match serde_yaml::from_str::<Value>(&joined) {
            Ok(value @ Value::Object(_)) => return Some(value),
            _ => {
                lines.pop();
                continue;
            }
        }
    }
}

/// True if `line` cannot still be in the middle of growing (§4.6 stability rules).
fn is_stable_trailing_line(line: &str) -> bool {
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.ends_with(':') {
        return false; // incomplete mapping line
    }
    if trimmed.trim_start() == "-" {
        return false; // incomplete sequence item
    }
    let bare = trimmed.trim_start();
    if bare == "|" || bare == ">" || bare.ends_with('|') || bare.ends_with('>') {
        return false; // unterminated block scalar heading
    }
    true
}
