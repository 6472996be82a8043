//! Protocol dispatch (§9: "model as a small enum of protocol kinds").
//!
//! Each of the five wire protocols is a self-contained streaming parser that
//! owns its own chunk buffer and per-call state; [`crate::parser::Transducer`]
//! just routes raw text deltas and pass-through events to the active one.

pub mod element_xml;
pub mod outer_container;
pub mod shorthand_xml;
pub mod tagged_json;
pub mod yaml_xml;

use crate::events::StreamEvent;
use crate::options::ParserOptions;
use crate::tools::ToolRegistry;

/// Callback every protocol parser drives to emit events, in order.
pub type Enqueue<'a> = dyn FnMut(StreamEvent) + 'a;

/// Common shape of a single-protocol streaming parser.
pub trait ProtocolParser {
    /// Consume a freshly-arrived text delta, emitting zero or more events.
    fn transform(&mut self, delta: &str, tools: &ToolRegistry, options: &mut ParserOptions, enqueue: &mut Enqueue<'_>);

    /// Called once at upstream finish: best-effort reconciliation of any
    /// dangling lifecycle, then emission of any remaining buffered text.
    fn flush(&mut self, tools: &ToolRegistry, options: &mut ParserOptions, enqueue: &mut Enqueue<'_>);

    /// Close any currently-open text segment without otherwise touching
    /// parser state (§5: a pass-through upstream event must first force any
    /// open text segment to `text-end`, but never closes an open tool-input
    /// window).
    fn close_open_text(&mut self, enqueue: &mut Enqueue<'_>);
}

/// Which wire protocol a [`crate::parser::Transducer`] is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// `<tool_call>{"name":...,"arguments":{...}}</tool_call>` (§4.4).
    TaggedJson,
    /// `<tool_name><param>value</param>...</tool_name>` (§4.5).
    ElementXml,
    /// `<tool_name>\nkey: value\n</tool_name>` (§4.6).
    YamlXml,
    /// `<function=name><parameter=k>v</parameter>...</function>` (§4.7).
    ShorthandXml,
    /// `<tool_call><call name="t"><parameter name="k">v</parameter></call></tool_call>` (§4.8).
    OuterContainer,
}

/// Construct the concrete parser for `kind`.
pub fn build(kind: ProtocolKind) -> Box<dyn ProtocolParser> {
    match kind {
        ProtocolKind::TaggedJson => Box::new(tagged_json::TaggedJsonParser::new()),
        ProtocolKind::ElementXml => Box::new(element_xml::ElementXmlParser::new()),
        ProtocolKind::YamlXml => Box::new(yaml_xml::YamlXmlParser::new()),
        ProtocolKind::ShorthandXml => Box::new(shorthand_xml::ShorthandXmlParser::new()),
        ProtocolKind::OuterContainer => Box::new(outer_container::OuterContainerParser::new()),
    }
}
