//! Incomplete-JSON prefix projector (§4.2).
//!
//! Converts a *complete* re-serialized JSON value into a stable textual
//! prefix that is safe to use as a growing streaming delta. The guarantee
//! that matters downstream is prefix-monotonicity: calling this on
//! successively "more complete" values of the same growing structure must
//! produce strings that extend one another.

/// Produce an incomplete-JSON prefix of `full`.
///
/// Strips the trailing run of closers (`}`, `]`) and then, if one remains
/// exposed, a single trailing `"`, trimming whitespace between each step. If
/// stripping empties the string, returns the canonical opener for `full`'s
/// leading non-whitespace character.
pub fn to_incomplete_json_prefix(full: &str) -> String {
    let opener = match full.trim_start().chars().next() {
        Some('{') | Some('}') => '{',
        Some('[') | Some(']') => '[',
        Some('"') => '"',
        _ => '{',
    };

    let mut s = full.trim_end();

    while let Some(last) = s.as_bytes().last() {
        if *last == b'}' || *last == b']' {
            s = s[..s.len() - 1].trim_end();
        } else {
            break;
        }
    }

    if s.as_bytes().last() == Some(&b'"') {
        s = s[..s.len() - 1].trim_end();
    }

    if s.is_empty() { opener.to_string() } else { s.to_string() }
}

/// Best-effort repair of a possibly-truncated JSON text: if `raw` doesn't
/// parse as-is, close any still-open string/array/object and retry; if that
/// still fails, drop the last character and repeat. Used by the tagged-JSON
/// protocol (§4.4) to turn an in-progress envelope body into *some* complete
/// JSON value it can project a stable prefix from.
///
/// Always terminates: each retry strictly shortens `raw`, and the empty
/// string has no closers to append, so the loop bottoms out at `None`.
pub fn try_repair_and_parse(raw: &str) -> Option<serde_json::Value> {
    let mut candidate = raw;
    loop {
        if let Some(value) = attempt_close(candidate) {
            return Some(value);
        }
        match candidate.char_indices().next_back() {
            Some((idx, _)) => candidate = &candidate[..idx],
            None => return None,
        }
    }
}

fn attempt_close(raw: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Some(value);
    }
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    for ch in raw.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    let mut repaired = raw.trim_end().to_string();
    if in_string {
        repaired.push('"');
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    serde_json::from_str(&repaired).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_repair_and_parse_closes_open_object() {
        let value = try_repair_and_parse(r#"{"name":"get_weather","arg"#).unwrap();
        assert_eq!(value, serde_json::json!({"name": "get_weather"}));
    }

    #[test]
    fn test_try_repair_and_parse_closes_nested_array() {
        let value = try_repair_and_parse(r#"{"a":[1,2,"#).unwrap();
        assert_eq!(value, serde_json::json!({"a": [1, 2]}));
    }

    #[test]
    fn test_try_repair_and_parse_accepts_already_complete_json() {
        let value = try_repair_and_parse(r#"{"a":1}"#).unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_try_repair_and_parse_gives_up_on_empty_input() {
        assert_eq!(try_repair_and_parse(""), None);
        assert_eq!(try_repair_and_parse("   "), None);
    }

    #[test]
    fn test_object_strips_one_closer() {
        assert_eq!(to_incomplete_json_prefix(r#"{"a":"Seo"}"#), r#"{"a":"Seo"#);
    }

    #[test]
    fn test_nested_object_strips_entire_trailing_closer_run() {
        assert_eq!(
            to_incomplete_json_prefix(r#"{"a":{"b":1}}"#),
            r#"{"a":{"b":1"#
        );
    }

    #[test]
    fn test_array_strips_one_closer() {
        assert_eq!(to_incomplete_json_prefix(r#"[1,2,3]"#), r#"[1,2,3"#);
    }

    #[test]
    fn test_empty_object_returns_opener() {
        assert_eq!(to_incomplete_json_prefix("{}"), "{");
    }

    #[test]
    fn test_empty_array_returns_opener() {
        assert_eq!(to_incomplete_json_prefix("[]"), "[");
    }

    #[test]
    fn test_bare_string_strips_trailing_quote() {
        assert_eq!(to_incomplete_json_prefix(r#""hello""#), r#""hello"#);
    }

    #[test]
    fn test_empty_string_literal_returns_opener() {
        assert_eq!(to_incomplete_json_prefix("\"\""), "\"");
    }

    #[test]
    fn test_trailing_whitespace_is_stripped_between_steps() {
        assert_eq!(to_incomplete_json_prefix("{\"a\":1}  \n"), "{\"a\":1");
    }

    #[test]
    fn test_result_is_always_a_prefix_of_input() {
        for full in [r#"{"a":"Seoul","b":[1,2,3]}"#, r#"[{"x":1},{"y":2}]"#, r#""plain""#] {
            let prefix = to_incomplete_json_prefix(full);
            assert!(full.starts_with(&prefix), "{prefix:?} not a prefix of {full:?}");
        }
    }
}
