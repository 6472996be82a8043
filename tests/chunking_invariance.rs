//! P4 (chunking-invariance): for any input string and any two chunkings of
//! it, the final tool-call events are equal and text-delta concatenations
//! are equal, no matter how the input was split across `transform` calls.

use serde_json::json;
use tool_call_transducer::{
    ParserOptions, ProtocolKind, StreamEvent, ToolDescriptor, ToolRegistry, Transducer, UpstreamEvent,
};

fn run_chunked(kind: ProtocolKind, tools: &ToolRegistry, chunks: &[&str]) -> Vec<StreamEvent> {
    let mut transducer = Transducer::new(kind, tools.clone(), ParserOptions::default());
    let mut events = Vec::new();
    for chunk in chunks {
        transducer.transform(UpstreamEvent::TextDelta(chunk.to_string()), &mut |e| events.push(e));
    }
    transducer.transform(UpstreamEvent::Finish { raw_reason: None, raw_usage: None }, &mut |e| events.push(e));
    events
}

fn char_chunks(s: &str) -> Vec<&str> {
    s.char_indices()
        .map(|(i, c)| &s[i..i + c.len_utf8()])
        .collect()
}

fn tool_calls(events: &[StreamEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolCall { tool_name, input, .. } => Some((tool_name.clone(), input.clone())),
            _ => None,
        })
        .collect()
}

fn text_concat(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
            _ => None,
        })
        .collect()
}

fn assert_invariant_across_chunkings(kind: ProtocolKind, tools: ToolRegistry, whole: &str, other_chunking: &[&str]) {
    // sanity: other_chunking really does concatenate back to `whole`.
    assert_eq!(other_chunking.concat(), whole);

    let one_shot = run_chunked(kind, &tools, &[whole]);
    let char_by_char = char_chunks(whole);
    let by_char = run_chunked(kind, &tools, &char_by_char);
    let arbitrary = run_chunked(kind, &tools, other_chunking);

    let calls_one = tool_calls(&one_shot);
    let calls_char = tool_calls(&by_char);
    let calls_arb = tool_calls(&arbitrary);

    assert_eq!(calls_one.len(), calls_char.len());
    assert_eq!(calls_one.len(), calls_arb.len());
    for ((name1, input1), (name2, input2)) in calls_one.iter().zip(calls_char.iter()) {
        assert_eq!(name1, name2);
        let v1: serde_json::Value = serde_json::from_str(input1).unwrap();
        let v2: serde_json::Value = serde_json::from_str(input2).unwrap();
        assert_eq!(v1, v2);
    }
    for ((name1, input1), (name2, input2)) in calls_one.iter().zip(calls_arb.iter()) {
        assert_eq!(name1, name2);
        let v1: serde_json::Value = serde_json::from_str(input1).unwrap();
        let v2: serde_json::Value = serde_json::from_str(input2).unwrap();
        assert_eq!(v1, v2);
    }

    assert_eq!(text_concat(&one_shot), text_concat(&by_char));
    assert_eq!(text_concat(&one_shot), text_concat(&arbitrary));
}

#[test]
fn tagged_json_chunking_invariance() {
    let tools = ToolRegistry::new(vec![ToolDescriptor::new("get_weather", json!({"type": "object"})).unwrap()]);
    let whole = r#"Let's check. <tool_call>{"name":"get_weather","arguments":{"location":"Seoul","unit":"celsius"}}</tool_call> done."#;
    let chunks = vec![
        "Let's check. <tool_c",
        r#"all>{"name":"get_weather","ar"#,
        r#"guments":{"location":"Seoul","unit":"celsius"}}</tool_call"#,
        "> done.",
    ];
    assert_invariant_across_chunkings(ProtocolKind::TaggedJson, tools, whole, &chunks);
}

#[test]
fn element_xml_chunking_invariance() {
    let tools = ToolRegistry::new(vec![ToolDescriptor::new("get_weather", json!({"type": "object"})).unwrap()]);
    let whole = "<get_weather><location>Seoul</location><unit>celsius</unit></get_weather>";
    let chunks = vec![
        "<get_wea",
        "ther><loc",
        "ation>Seoul</location><un",
        "it>celsius</unit></get_weather>",
    ];
    assert_invariant_across_chunkings(ProtocolKind::ElementXml, tools, whole, &chunks);
}

#[test]
fn yaml_xml_chunking_invariance() {
    let tools = ToolRegistry::new(vec![ToolDescriptor::new("get_weather", json!({"type": "object"})).unwrap()]);
    let whole = "<get_weather>\nlocation: Seoul\nunit: celsius\n</get_weather>";
    let chunks = vec!["<get_weather>\nloc", "ation: Seoul\nunit: cel", "sius\n</get_weather>"];
    assert_invariant_across_chunkings(ProtocolKind::YamlXml, tools, whole, &chunks);
}

#[test]
fn shorthand_xml_chunking_invariance() {
    let tools = ToolRegistry::new(vec![ToolDescriptor::new("alpha", json!({"type": "object"})).unwrap()]);
    let whole = "<tool_call><function=alpha><parameter=query>weather in NY</parameter></function></tool_call>";
    let chunks = vec![
        "<tool_call><function=al",
        "pha><parameter=qu",
        "ery>weather in NY</parameter></function></tool_call>",
    ];
    assert_invariant_across_chunkings(ProtocolKind::ShorthandXml, tools, whole, &chunks);
}

#[test]
fn outer_container_chunking_invariance() {
    let tools = ToolRegistry::new(vec![ToolDescriptor::new("ping", json!({"type": "object"})).unwrap()]);
    let whole = r#"<tool_call name="ping"><parameter name="x">1</parameter></tool_call>"#;
    let chunks = vec![
        r#"<tool_call name="pi"#,
        r#"ng"><parameter name="x">"#,
        "1</parameter></tool_call>",
    ];
    assert_invariant_across_chunkings(ProtocolKind::OuterContainer, tools, whole, &chunks);
}
