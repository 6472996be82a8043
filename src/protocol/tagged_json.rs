//! Tagged-JSON protocol (§4.4): `<tool_call>{"name":...,"arguments":{...}}</tool_call>`.

use crate::buffer::{self, ChunkBuffer};
use crate::delta::DeltaEmitter;
use crate::error::ErrorMetadata;
use crate::events::StreamEvent;
use crate::ids::{generate_segment_id, generate_tool_call_id};
use crate::json_prefix::{to_incomplete_json_prefix, try_repair_and_parse};
use crate::options::ParserOptions;
use crate::protocol::{Enqueue, ProtocolParser};
use crate::tools::ToolRegistry;
use serde_json::Value;

#[derive(Debug)]
enum State {
    Outside,
    InsideToolCall { body: String },
}

/// Streaming parser for the tagged-JSON wire protocol.
pub struct TaggedJsonParser {
    state: State,
    buffer: ChunkBuffer,
    text_id: Option<String>,
    tool_call_id: Option<String>,
    tool_name: Option<String>,
    emitter: DeltaEmitter,
}

impl TaggedJsonParser {
    /// Create a fresh parser, starting outside any tool-call span.
    pub fn new() -> Self {
        Self {
            state: State::Outside,
            buffer: ChunkBuffer::new(),
            text_id: None,
            tool_call_id: None,
            tool_name: None,
            emitter: DeltaEmitter::new(),
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

    fn try_progress(&mut self, body: &str, tools: &ToolRegistry, enqueue: &mut Enqueue<'_>) {
        let Some(Value::Object(envelope)) = try_repair_and_parse(body) else {
            return;
        };
        let Some(name) = envelope.get("name").and_then(Value::as_str) else {
            return;
        };
        if self.tool_call_id.is_none() {
            if !tools.is_empty() && tools.get(name).is_none() {
                return;
            }
            let id = generate_tool_call_id();
            enqueue(StreamEvent::ToolInputStart { id: id.clone(), tool_name: name.to_string() });
            self.tool_call_id = Some(id);
            self.tool_name = Some(name.to_string());
        }
        let Some(arguments) = envelope.get("arguments") else {
            return;
        };
        let Ok(args_json) = serde_json::to_string(arguments) else {
            return;
        };
        let prefix = to_incomplete_json_prefix(&args_json);
        if let Some(delta) = self.emitter.emit_prefix_delta(&prefix) {
            if let Some(id) = self.tool_call_id.clone() {
                enqueue(StreamEvent::ToolInputDelta { id, delta });
            }
        }
    }

    /// Attempt a strict parse of the full accumulated body and, on success,
    /// close out the lifecycle. On failure, surfaces the raw span as text
    /// unconditionally mid-stream (§4.4), or only when
    /// `emit_raw_tool_call_text_on_error` is set at finish.
    fn finalize(
        &mut self,
        full_body: &str,
        tools: &ToolRegistry,
        options: &mut ParserOptions,
        enqueue: &mut Enqueue<'_>,
        force_raw_on_failure: bool,
    ) {
        let envelope = serde_json::from_str::<Value>(full_body).ok().and_then(|v| match v {
            Value::Object(map) => {
                let name = map.get("name").and_then(Value::as_str)?.to_string();
                let arguments = map.get("arguments")?.as_object()?.clone();
                if !name.trim().is_empty() && (tools.is_empty() || tools.get(&name).is_some()) {
                    Some((name, arguments))
                } else {
                    None
                }
            }
            _ => None,
        });

        match envelope {
            Some((name, arguments)) => {
                if self.tool_call_id.is_none() {
                    let id = generate_tool_call_id();
                    enqueue(StreamEvent::ToolInputStart { id: id.clone(), tool_name: name.clone() });
                    self.tool_call_id = Some(id);
                    self.tool_name = Some(name.clone());
                }
                let id = self.tool_call_id.clone().expect("assigned above");
                let args_json = serde_json::to_string(&Value::Object(arguments)).unwrap_or_default();
                match self.emitter.emit_final_remainder(&args_json) {
                    Ok(Some(delta)) => enqueue(StreamEvent::ToolInputDelta { id: id.clone(), delta }),
                    Ok(None) => {}
                    Err(meta) => options.report_error("tagged-json final remainder did not extend emitted input", meta),
                }
                enqueue(StreamEvent::ToolInputEnd { id: id.clone() });
                enqueue(StreamEvent::ToolCall {
                    tool_call_id: id,
                    tool_name: name,
                    input: args_json,
                });
            }
            None => {
                options.report_error("tagged-json tool call body did not parse as {name, arguments}", ErrorMetadata::empty());
                if force_raw_on_failure || options.emit_raw_tool_call_text_on_error {
                    let raw = format!("{}{}{}", options.tool_call_start, full_body, options.tool_call_end);
                    self.flush_text(&raw, enqueue);
                }
            }
        }

        self.tool_call_id = None;
        self.tool_name = None;
        self.emitter = DeltaEmitter::new();
    }
}

impl Default for TaggedJsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for TaggedJsonParser {
    fn transform(&mut self, delta: &str, tools: &ToolRegistry, options: &mut ParserOptions, enqueue: &mut Enqueue<'_>) {
        self.buffer.append(delta);
        loop {
            match &mut self.state {
                State::Outside => {
                    let sentinels = [options.tool_call_start.as_str()];
                    let flushed = self.buffer.flush_safe_prefix(&sentinels);
                    if !flushed.is_empty() {
                        self.flush_text(&flushed, enqueue);
                    }
                    match self.buffer.find_ci(&options.tool_call_start) {
                        Some((0, end)) => {
                            self.buffer.consume(end);
                            self.close_text(enqueue);
                            self.state = State::InsideToolCall { body: String::new() };
                        }
                        _ => break,
                    }
                }
                State::InsideToolCall { body } => {
                    if let Some((start, end)) = buffer::find_ci(self.buffer.as_str(), &options.tool_call_end) {
                        body.push_str(&self.buffer.as_str()[..start]);
                        let full_body = std::mem::take(body);
                        self.buffer.consume(end);
                        self.state = State::Outside;
                        self.finalize(&full_body, tools, options, enqueue, true);
                    } else {
                        let idx = buffer::potential_start_index(self.buffer.as_str(), &[options.tool_call_end.as_str()]);
                        body.push_str(&self.buffer.as_str()[..idx]);
                        self.buffer.consume(idx);
                        let snapshot = body.clone();
                        self.try_progress(&snapshot, tools, enqueue);
                        break;
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
            State::InsideToolCall { mut body } => {
                let trailing = self.buffer.take();
                if options.tool_call_end.starts_with(&trailing) {
                    self.finalize(&body, tools, options, enqueue, false);
                } else {
                    body.push_str(&trailing);
                    options.report_error("tagged-json tool call unterminated at finish", ErrorMetadata::empty());
                    if options.emit_raw_tool_call_text_on_error {
                        let raw = format!("{}{}", options.tool_call_start, body);
                        self.flush_text(&raw, enqueue);
                    }
                }
            }
        }
        self.close_text(enqueue);
    }

    fn close_open_text(&mut self, enqueue: &mut Enqueue<'_>) {
        self.close_text(enqueue);
    }
}
