//! Outer-container protocol (§4.8):
//! `<tool_call [name="N"]> ... </tool_call>`, where the container either
//! holds parameters directly (**single** mode) or one or more
//! `<call|function|tool|invoke [name="T"]>` subelements (**multi** mode).
//! Mode is determined lazily on the first meaningful inner tag.
//!
//! Repeated parameters within one call are array-coerced only while
//! contiguous; once a different key interrupts a run, that key is sealed —
//! a later repeat is rejected via `onError` and the sealed value is left
//! untouched (§4.8 "Repeated-parameter semantics").

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
use std::collections::{HashMap, HashSet};

const OUTER_OPEN_PREFIX: &str = "<tool_call";
const OUTER_CLOSE: &str = "</tool_call>";
const CALL_TAG_NAMES: [&str; 4] = ["call", "function", "tool", "invoke"];

/// Per-call parameter accumulator shared by single and multi mode.
#[derive(Default)]
struct ParamAccumulator {
    children: Vec<(String, String)>,
    sealed: HashSet<String>,
    last_key: Option<String>,
}

impl ParamAccumulator {
    fn append(&mut self, key: String, value: String, options: &mut ParserOptions) {
        if self.sealed.contains(&key) {
            options.report_error(
                "outer-container non-contiguous repeated parameter rejected",
                ErrorMetadata::empty(),
            );
            return;
        }
        if let Some(last) = &self.last_key {
            if *last != key {
                self.sealed.insert(last.clone());
            }
        }
        self.last_key = Some(key.clone());
        self.children.push((key, value));
    }
}

enum State {
    Outside,
    /// Consumed `<tool_call ...>`; mode not yet determined.
    Opened { outer_name: Option<String> },
    SingleMode { call: CallState, params: ParamAccumulator },
    /// Between subelements in multi mode, waiting for the next `<call...>`
    /// (or legacy-named) tag, or the container close.
    AwaitingNextCall,
    MultiModeInsideCall { call: CallState, params: ParamAccumulator, closer: String },
}

/// Streaming parser for the outer-container wire protocol.
pub struct OuterContainerParser {
    state: State,
    buffer: ChunkBuffer,
    text_id: Option<String>,
}

impl OuterContainerParser {
    /// Create a fresh parser, starting outside any container.
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

    fn emit_empty_call(&mut self, name: &str, tools: &ToolRegistry, enqueue: &mut Enqueue<'_>) {
        let id = generate_tool_call_id();
        enqueue(StreamEvent::ToolInputStart { id: id.clone(), tool_name: name.to_string() });
        let mut value = Value::Object(serde_json::Map::new());
        if let Some(schema) = tools.get(name) {
            crate::xml_common::coerce_leaves(&mut value, schema);
        }
        let input = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
        enqueue(StreamEvent::ToolInputEnd { id: id.clone() });
        enqueue(StreamEvent::ToolCall { tool_call_id: id, tool_name: name.to_string(), input });
    }

    fn try_progress(&mut self, tool_name: &str, id: &str, params: &ParamAccumulator, emitter: &mut DeltaEmitter, tools: &ToolRegistry, enqueue: &mut Enqueue<'_>) {
        let schema = tools.get(tool_name);
        let candidate = build_candidate_from_children(&params.children, schema);
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
        params: &ParamAccumulator,
        emitter: &mut DeltaEmitter,
        tools: &ToolRegistry,
        options: &mut ParserOptions,
        enqueue: &mut Enqueue<'_>,
    ) {
        let schema = tools.get(tool_name);
        let mut value = Value::Object(build_final_from_children(&params.children, schema));
        if let Some(s) = schema {
            crate::xml_common::coerce_leaves(&mut value, s);
        }
        let input = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
        match emitter.emit_final_remainder(&input) {
            Ok(Some(delta)) => enqueue(StreamEvent::ToolInputDelta { id: id.to_string(), delta }),
            Ok(None) => {}
            Err(meta) => options.report_error("outer-container final remainder did not extend emitted input", meta),
        }
        enqueue(StreamEvent::ToolInputEnd { id: id.to_string() });
        enqueue(StreamEvent::ToolCall {
            tool_call_id: id.to_string(),
            tool_name: tool_name.to_string(),
            input,
        });
    }
}

impl Default for OuterContainerParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for OuterContainerParser {
    fn transform(&mut self, delta: &str, tools: &ToolRegistry, options: &mut ParserOptions, enqueue: &mut Enqueue<'_>) {
        self.buffer.append(delta);
        loop {
            match std::mem::replace(&mut self.state, State::Outside) {
                State::Outside => {
                    let flushed = self.buffer.flush_safe_prefix(&[OUTER_OPEN_PREFIX]);
                    if !flushed.is_empty() {
                        self.flush_text(&flushed, enqueue);
                    }
                    match scan_open_tag(self.buffer.as_str()) {
                        Some(tag) if tag.name.eq_ignore_ascii_case("tool_call") => {
                            self.buffer.consume(tag.consumed);
                            self.close_text(enqueue);
                            let outer_name = tag.attrs.get("name").cloned();
                            if tag.self_closing {
                                match &outer_name {
                                    Some(name) => self.emit_empty_call(name, tools, enqueue),
                                    None => options.report_error(
                                        "outer-container self-closing <tool_call/> had no name attribute",
                                        ErrorMetadata::empty(),
                                    ),
                                }
                                self.state = State::Outside;
                            } else {
                                self.state = State::Opened { outer_name };
                            }
                            continue;
                        }
                        Some(_) | None => {
                            self.state = State::Outside;
                            break;
                        }
                    }
                }
                State::Opened { outer_name } => {
                    // Only grammar-insignificant whitespace can precede the
                    // first inner tag; nothing here is ever surfaced as prose.
                    let trimmed = self.buffer.as_str().trim_start();
                    if trimmed.is_empty() {
                        self.state = State::Opened { outer_name };
                        break;
                    }
                    if trimmed.len() >= OUTER_CLOSE.len() && trimmed.is_char_boundary(OUTER_CLOSE.len()) && trimmed[..OUTER_CLOSE.len()].eq_ignore_ascii_case(OUTER_CLOSE) {
                        let ws = self.buffer.as_str().len() - trimmed.len();
                        self.buffer.consume(ws + OUTER_CLOSE.len());
                        self.state = State::Outside;
                        continue;
                    }
                    let Some(tag) = scan_open_tag(trimmed) else {
                        self.state = State::Opened { outer_name };
                        break;
                    };
                    let ws = self.buffer.as_str().len() - trimmed.len();

                    if tag.name.eq_ignore_ascii_case("name") && !tag.self_closing {
                        let value_start = ws + tag.consumed;
                        match buffer::find_ci(&self.buffer.as_str()[value_start..], "</name>") {
                            Some((vstart, vend)) => {
                                let name = trim_element_text(&self.buffer.as_str()[value_start..value_start + vstart]);
                                self.buffer.consume(value_start + vend);
                                let id = generate_tool_call_id();
                                enqueue(StreamEvent::ToolInputStart { id: id.clone(), tool_name: name.clone() });
                                self.state = State::SingleMode { call: CallState::new(id, name), params: ParamAccumulator::default() };
                                continue;
                            }
                            None => {
                                self.state = State::Opened { outer_name };
                                break;
                            }
                        }
                    }

                    if tag.name.eq_ignore_ascii_case("parameter") {
                        let Some(name) = outer_name.clone() else {
                            options.report_error(
                                "outer-container single-mode parameter with no declared tool name",
                                ErrorMetadata::empty(),
                            );
                            self.state = State::Outside;
                            break;
                        };
                        let id = generate_tool_call_id();
                        enqueue(StreamEvent::ToolInputStart { id: id.clone(), tool_name: name.clone() });
                        self.state = State::SingleMode { call: CallState::new(id, name), params: ParamAccumulator::default() };
                        continue;
                    }

                    if CALL_TAG_NAMES.iter().any(|n| tag.name.eq_ignore_ascii_case(n)) {
                        self.buffer.consume(ws);
                        self.state = State::AwaitingNextCall;
                        continue;
                    }

                    // Unrecognized inner tag: skip past it conservatively.
                    self.buffer.consume(ws + tag.consumed);
                    self.state = State::Opened { outer_name };
                }
                State::SingleMode { mut call, mut params } => {
                    let idx = buffer::potential_start_index(self.buffer.as_str(), &["<parameter", OUTER_CLOSE]);
                    let settled = self.buffer.as_str()[..idx].to_string();
                    let consumed = tokenize_container_parameters(&settled, &mut params, options);
                    self.buffer.consume(consumed);

                    let remainder = self.buffer.as_str();
                    let trimmed = remainder.trim_start();
                    if trimmed.len() >= OUTER_CLOSE.len() && trimmed.is_char_boundary(OUTER_CLOSE.len()) && trimmed[..OUTER_CLOSE.len()].eq_ignore_ascii_case(OUTER_CLOSE) {
                        let ws = remainder.len() - trimmed.len();
                        self.buffer.consume(ws + OUTER_CLOSE.len());
                        self.state = State::Outside;
                        self.finalize(&call.id.clone(), &call.tool_name.clone(), &params, &mut call.emitter, tools, options, enqueue);
                        continue;
                    }

                    self.try_progress(&call.tool_name.clone(), &call.id.clone(), &params, &mut call.emitter, tools, enqueue);
                    self.state = State::SingleMode { call, params };
                    break;
                }
                State::AwaitingNextCall => {
                    let trimmed = self.buffer.as_str().trim_start();
                    if trimmed.is_empty() {
                        self.state = State::AwaitingNextCall;
                        break;
                    }
                    if trimmed.len() >= OUTER_CLOSE.len() && trimmed.is_char_boundary(OUTER_CLOSE.len()) && trimmed[..OUTER_CLOSE.len()].eq_ignore_ascii_case(OUTER_CLOSE) {
                        let ws = self.buffer.as_str().len() - trimmed.len();
                        self.buffer.consume(ws + OUTER_CLOSE.len());
                        self.state = State::Outside;
                        continue;
                    }
                    let Some(tag) = scan_open_tag(trimmed) else {
                        self.state = State::AwaitingNextCall;
                        break;
                    };
                    let ws = self.buffer.as_str().len() - trimmed.len();
                    if !CALL_TAG_NAMES.iter().any(|n| tag.name.eq_ignore_ascii_case(n)) {
                        // Not a recognized subelement; skip it conservatively.
                        self.buffer.consume(ws + tag.consumed);
                        self.state = State::AwaitingNextCall;
                        continue;
                    }
                    let name = tag.attrs.get("name").cloned().unwrap_or_default();
                    self.buffer.consume(ws + tag.consumed);
                    if tag.self_closing {
                        self.state = State::AwaitingNextCall;
                        self.emit_empty_call(&name, tools, enqueue);
                        continue;
                    }
                    let closer = format!("</{}>", tag.name.to_lowercase());
                    let id = generate_tool_call_id();
                    enqueue(StreamEvent::ToolInputStart { id: id.clone(), tool_name: name.clone() });
                    self.state = State::MultiModeInsideCall {
                        call: CallState::new(id, name),
                        params: ParamAccumulator::default(),
                        closer,
                    };
                    continue;
                }
                State::MultiModeInsideCall { mut call, mut params, closer } => {
                    let idx = buffer::potential_start_index(self.buffer.as_str(), &["<parameter", closer.as_str()]);
                    let settled = self.buffer.as_str()[..idx].to_string();
                    let consumed = tokenize_container_parameters(&settled, &mut params, options);
                    self.buffer.consume(consumed);

                    let remainder = self.buffer.as_str();
                    let trimmed = remainder.trim_start();
                    if trimmed.len() >= closer.len() && trimmed.is_char_boundary(closer.len()) && trimmed[..closer.len()].eq_ignore_ascii_case(&closer) {
                        let ws = remainder.len() - trimmed.len();
                        self.buffer.consume(ws + closer.len());
                        self.finalize(&call.id.clone(), &call.tool_name.clone(), &params, &mut call.emitter, tools, options, enqueue);
                        self.state = State::AwaitingNextCall;
                        continue;
                    }

                    self.try_progress(&call.tool_name.clone(), &call.id.clone(), &params, &mut call.emitter, tools, enqueue);
                    self.state = State::MultiModeInsideCall { call, params, closer };
                    break;
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
            State::Opened { .. } | State::AwaitingNextCall => {
                options.report_error("outer-container unterminated at finish", ErrorMetadata::empty());
                let remainder = self.buffer.take();
                self.flush_text(&remainder, enqueue);
            }
            State::SingleMode { mut call, mut params } => {
                let remainder = self.buffer.take();
                let _ = tokenize_container_parameters(&remainder, &mut params, options);
                self.finalize(&call.id.clone(), &call.tool_name.clone(), &params, &mut call.emitter, tools, options, enqueue);
            }
            State::MultiModeInsideCall { mut call, mut params, .. } => {
                let remainder = self.buffer.take();
                let _ = tokenize_container_parameters(&remainder, &mut params, options);
                self.finalize(&call.id.clone(), &call.tool_name.clone(), &params, &mut call.emitter, tools, options, enqueue);
            }
        }
        self.close_text(enqueue);
    }

    fn close_open_text(&mut self, enqueue: &mut Enqueue<'_>) {
        self.close_text(enqueue);
    }
}

struct OpenTag {
    name: String,
    attrs: HashMap<String, String>,
    self_closing: bool,
    consumed: usize,
}

/// Parse a single generic opening tag `<name attr="value" ... />` or
/// `<name attr="value" ...>` at the start of `span`. Returns `None` if `span`
/// doesn't begin with a complete tag yet (either it isn't `<`-prefixed, or
/// the closing `>` hasn't arrived).
fn scan_open_tag(span: &str) -> Option<OpenTag> {
    let rest = span.strip_prefix('<')?;
    let end = rest.find('>')?;
    let inner = &rest[..end];
    let self_closing = inner.trim_end().ends_with('/');
    let inner_trimmed = inner.trim_end().trim_end_matches('/').trim();
    let mut parts = inner_trimmed.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("").to_string();
    let mut attr_str = parts.next().unwrap_or("").trim();
    let mut attrs = HashMap::new();
    while let Some(eq_pos) = attr_str.find('=') {
        let key = attr_str[..eq_pos].trim().to_string();
        let after_eq = attr_str[eq_pos + 1..].trim_start();
        let Some(quote) = after_eq.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            break;
        };
        let Some(close_rel) = after_eq[1..].find(quote) else {
            break;
        };
        let value = after_eq[1..1 + close_rel].to_string();
        attrs.insert(key, value);
        attr_str = after_eq[1 + close_rel + 1..].trim_start();
    }
    Some(OpenTag { name, attrs, self_closing, consumed: 1 + end + 1 })
}

/// Scan `span` for complete `<parameter name="K">V</parameter>` (or
/// self-closing `<parameter name="K"/>`) pairs from position 0, applying
/// the contiguous-repeat sealing rule as each one lands. Returns the
/// consumed byte offset; stops at the first non-parameter tag or
/// incomplete trailing parameter.
fn tokenize_container_parameters(span: &str, params: &mut ParamAccumulator, options: &mut ParserOptions) -> usize {
    let mut pos = 0usize;
    loop {
        let rest = &span[pos..];
        let skip = rest.len() - rest.trim_start().len();
        pos += skip;
        let rest = &span[pos..];
        let Some(tag) = scan_open_tag(rest) else { break };
        if !tag.name.eq_ignore_ascii_case("parameter") {
            break;
        }
        let Some(key) = tag.attrs.get("name").cloned() else { break };
        if tag.self_closing {
            params.append(key, String::new(), options);
            pos += tag.consumed;
            continue;
        }
        let value_start = pos + tag.consumed;
        match buffer::find_ci(&span[value_start..], "</parameter>") {
            Some((vstart, vend)) => {
                let value = trim_element_text(&span[value_start..value_start + vstart]);
                params.append(key, value, options);
                pos = value_start + vend;
            }
            None => break,
        }
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDescriptor;

    fn run(chunks: &[&str], tools: ToolRegistry) -> Vec<StreamEvent> {
        let mut parser = OuterContainerParser::new();
        let mut options = ParserOptions::default();
        let mut events = Vec::new();
        for chunk in chunks {
            parser.transform(chunk, &tools, &mut options, &mut |e| events.push(e));
        }
        parser.flush(&tools, &mut options, &mut |e| events.push(e));
        events
    }

    #[test]
    fn test_single_mode_via_name_child() {
        let tools = ToolRegistry::new(vec![ToolDescriptor::new("get_weather", serde_json::json!({"type": "object"})).unwrap()]);
        let events = run(
            &[r#"<tool_call><name>get_weather</name><parameter name="location">NY</parameter></tool_call>"#],
            tools,
        );
        let tool_call = events.iter().find_map(|e| match e {
            StreamEvent::ToolCall { tool_name, input, .. } => Some((tool_name.clone(), input.clone())),
            _ => None,
        });
        assert_eq!(tool_call, Some(("get_weather".to_string(), r#"{"location":"NY"}"#.to_string())));
    }

    #[test]
    fn test_single_mode_via_outer_name_attribute() {
        let tools = ToolRegistry::new(vec![ToolDescriptor::new("get_weather", serde_json::json!({"type": "object"})).unwrap()]);
        let events = run(
            &[r#"<tool_call name="get_weather"><parameter name="location">NY</parameter></tool_call>"#],
            tools,
        );
        let tool_call = events.iter().find_map(|e| match e {
            StreamEvent::ToolCall { tool_name, input, .. } => Some((tool_name.clone(), input.clone())),
            _ => None,
        });
        assert_eq!(tool_call, Some(("get_weather".to_string(), r#"{"location":"NY"}"#.to_string())));
    }

    #[test]
    fn test_multi_mode_two_calls() {
        let tools = ToolRegistry::new(vec![
            ToolDescriptor::new("a", serde_json::json!({"type": "object"})).unwrap(),
            ToolDescriptor::new("b", serde_json::json!({"type": "object"})).unwrap(),
        ]);
        let events = run(
            &[r#"<tool_call><call name="a"><parameter name="x">1</parameter></call><function name="b"><parameter name="y">2</parameter></function></tool_call>"#],
            tools,
        );
        let calls: Vec<(String, String)> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall { tool_name, input, .. } => Some((tool_name.clone(), input.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            calls,
            vec![("a".to_string(), r#"{"x":"1"}"#.to_string()), ("b".to_string(), r#"{"y":"2"}"#.to_string())]
        );
    }

    #[test]
    fn test_self_closing_call_finalizes_immediately() {
        let tools = ToolRegistry::new(vec![ToolDescriptor::new("ping", serde_json::json!({"type": "object"})).unwrap()]);
        let events = run(&[r#"<tool_call><call name="ping"/></tool_call>"#], tools);
        let tool_call = events.iter().find_map(|e| match e {
            StreamEvent::ToolCall { input, .. } => Some(input.clone()),
            _ => None,
        });
        assert_eq!(tool_call, Some("{}".to_string()));
    }

    #[test]
    fn test_contiguous_repeat_becomes_array() {
        let tools = ToolRegistry::new(vec![ToolDescriptor::new("math_sum", serde_json::json!({"type": "object"})).unwrap()]);
        let events = run(
            &[r#"<tool_call name="math_sum"><parameter name="n">1</parameter><parameter name="n">2</parameter></tool_call>"#],
            tools,
        );
        let tool_call = events.iter().find_map(|e| match e {
            StreamEvent::ToolCall { input, .. } => Some(input.clone()),
            _ => None,
        });
        assert_eq!(tool_call, Some(r#"{"n":["1","2"]}"#.to_string()));
    }

    #[test]
    fn test_non_contiguous_repeat_is_rejected_and_sealed_value_unmodified() {
        let tools = ToolRegistry::new(vec![ToolDescriptor::new(
            "calc",
            serde_json::json!({"type": "object"}),
        )
        .unwrap()]);
        let events = run(
            &[r#"<tool_call name="calc"><parameter name="a">1</parameter><parameter name="b">2</parameter><parameter name="a">3</parameter></tool_call>"#],
            tools,
        );
        let tool_call = events.iter().find_map(|e| match e {
            StreamEvent::ToolCall { input, .. } => Some(input.clone()),
            _ => None,
        });
        assert_eq!(tool_call, Some(r#"{"a":"1","b":"2"}"#.to_string()));
    }
}
