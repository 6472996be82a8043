//! Tool-choice forced path (§4.10).
//!
//! When the caller has declared `tool-choice: required` (or a specific
//! tool), the model is asked for a non-streaming generation and the usual
//! wire-protocol parsing is bypassed entirely: the whole text must already be
//! a strict `{name, arguments}` envelope.

use crate::error::{Error, Result};
use crate::events::{FinishReason, StreamEvent, Usage};
use crate::ids::generate_tool_call_id;
use serde_json::Value;

/// Parse a forced-choice generation and produce its two terminal events, in
/// order: `tool-call` then `finish{reason: tool-calls}`.
///
/// `raw_finish_reason` and `raw_usage` come from the upstream response as-is;
/// they are normalized here the same way the streaming path normalizes them
/// (`FinishReason::normalize`, `Usage::from_json`) rather than hard-coding
/// `tool-calls`/zero usage, since a provider may still report a distinct
/// reason or populated usage alongside a forced call.
pub fn parse_forced_response(
    text: &str,
    raw_finish_reason: Option<&str>,
    raw_usage: Option<&Value>,
) -> Result<[StreamEvent; 2]> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::forced_path_envelope(format!("not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::forced_path_envelope("top-level value is not a JSON object"))?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::forced_path_envelope("missing string 'name' field"))?;
    let arguments = obj
        .get("arguments")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::forced_path_envelope("missing object 'arguments' field"))?;

    let input = serde_json::to_string(&Value::Object(arguments.clone()))?;

    let tool_call = StreamEvent::ToolCall {
        tool_call_id: generate_tool_call_id(),
        tool_name: name.to_string(),
        input,
    };
    let finish = StreamEvent::Finish {
        reason: FinishReason::normalize(raw_finish_reason.or(Some("tool_calls"))),
        usage: raw_usage.map(Usage::from_json).unwrap_or_default(),
    };
    Ok([tool_call, finish])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strict_envelope_emits_tool_call_then_finish() {
        let text = r#"{"name":"get_weather","arguments":{"location":"Seoul","unit":"celsius"}}"#;
        let [call, finish] = parse_forced_response(text, None, None).unwrap();
        match call {
            StreamEvent::ToolCall { tool_name, input, .. } => {
                assert_eq!(tool_name, "get_weather");
                let parsed: Value = serde_json::from_str(&input).unwrap();
                assert_eq!(parsed, json!({"location": "Seoul", "unit": "celsius"}));
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
        match finish {
            StreamEvent::Finish { reason, usage } => {
                assert_eq!(reason, FinishReason::ToolCalls);
                assert_eq!(usage, Usage::default());
            }
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_usage_shape_is_normalized() {
        let text = r#"{"name":"calc","arguments":{"a":1}}"#;
        let usage = json!({"prompt": 12, "completion": 4});
        let [_, finish] = parse_forced_response(text, None, Some(&usage)).unwrap();
        match finish {
            StreamEvent::Finish { usage, .. } => assert_eq!(usage, Usage::new(12, 4)),
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[test]
    fn test_raw_finish_reason_is_preserved_when_present() {
        let text = r#"{"name":"calc","arguments":{}}"#;
        let [_, finish] = parse_forced_response(text, Some("length"), None).unwrap();
        match finish {
            StreamEvent::Finish { reason, .. } => assert_eq!(reason, FinishReason::Length),
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_arguments_field_is_rejected() {
        let text = r#"{"name":"calc"}"#;
        let err = parse_forced_response(text, None, None).unwrap_err();
        assert!(matches!(err, Error::ForcedPathEnvelope(_)));
    }

    #[test]
    fn test_non_envelope_json_is_rejected() {
        let text = r#"[1, 2, 3]"#;
        let err = parse_forced_response(text, None, None).unwrap_err();
        assert!(matches!(err, Error::ForcedPathEnvelope(_)));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let err = parse_forced_response("not json at all", None, None).unwrap_err();
        assert!(matches!(err, Error::ForcedPathEnvelope(_)));
    }
}
