//! Shared tag-scanning helpers for the four XML-flavored protocols
//! (element-XML, YAML-in-XML, shorthand-XML, outer-container).
//!
//! Per the design note in `SPEC_FULL.md` §9 ("Regex caches"): self-closing
//! and close-tag patterns are compiled once per tool name per parser
//! instance and reused for the lifetime of that instance.

use regex::Regex;
use std::collections::HashMap;

/// Caches compiled open/close tag regexes keyed by tool name.
///
/// Whitespace is tolerated inside the tag (`<name/>`, `< name />`), and
/// matching is ASCII case-insensitive, per §4.1/§4.5.
#[derive(Debug, Default)]
pub struct TagMatcher {
    cache: HashMap<String, (Regex, Regex)>,
}

impl TagMatcher {
    /// Create an empty matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (compiling and caching on first use) the `(open, close)` regex
    /// pair for `tool_name`. The open regex also matches the self-closing
    /// form (`<name/>`), capturing group 1 as `/` when self-closing.
    pub fn for_tool(&mut self, tool_name: &str) -> &(Regex, Regex) {
        self.cache
            .entry(tool_name.to_string())
            .or_insert_with(|| build_tag_regexes(tool_name))
    }
}

fn build_tag_regexes(tool_name: &str) -> (Regex, Regex) {
    let escaped = regex::escape(tool_name);
    let open = Regex::new(&format!(r"(?i)^<\s*{escaped}\s*(/)?\s*>")).expect("valid open-tag regex");
    let close = Regex::new(&format!(r"(?i)^</\s*{escaped}\s*>")).expect("valid close-tag regex");
    (open, close)
}

/// True if `s` contains only ASCII/Unicode whitespace (or is empty).
pub fn is_whitespace_only(s: &str) -> bool {
    s.chars().all(char::is_whitespace)
}

/// Trim a parsed element/text node's content the way element-XML does:
/// leading/trailing whitespace removed, interior whitespace preserved.
pub fn trim_element_text(s: &str) -> String {
    s.trim().to_string()
}

/// Scan forward from `start` in `haystack` for the next occurrence of any of
/// `markers` (ASCII case-insensitive), returning `(marker_index, marker)` —
/// the earliest match, preferring the first marker in `markers` on a tie.
///
/// Used by the shorthand-XML protocol (§4.7), where only a handful of
/// literal structural markers (`<parameter=`, `</parameter>`, `</function>`,
/// `</tool_call>`) are meaningful and everything else is literal `VALUE` text.
pub fn find_next_marker<'a>(haystack: &str, start: usize, markers: &[&'a str]) -> Option<(usize, &'a str)> {
    let mut best: Option<(usize, &str)> = None;
    for m in markers {
        if let Some((idx, _)) = crate::buffer::find_ci(&haystack[start..], m) {
            let abs = start + idx;
            match best {
                Some((best_idx, _)) if best_idx <= abs => {}
                _ => best = Some((abs, m)),
            }
        }
    }
    best
}

/// Decide whether `key` should be treated as an array in a finalized (or
/// progress) candidate object: either it has already repeated, or the
/// schema commits it to being an array regardless of current count (§4.5
/// stability rules).
pub fn key_is_array(key: &str, occurrences: usize, schema: Option<&crate::tools::ToolDescriptor>) -> bool {
    if occurrences >= 2 {
        return true;
    }
    schema.map(|s| s.property_is_array_typed(key)).unwrap_or(false)
}

/// Decide whether a single-occurrence scalar key is safe to surface eagerly
/// in a progress candidate: only when the schema explicitly commits the
/// property to a non-array type. Otherwise it is ambiguous and must be
/// withheld until end-of-call or a second occurrence (§4.5).
pub fn scalar_is_stable(key: &str, schema: Option<&crate::tools::ToolDescriptor>) -> bool {
    match schema.and_then(|s| s.properties()).and_then(|p| p.get(key)) {
        Some(prop) => !matches!(
            prop.get("type"),
            Some(serde_json::Value::String(t)) if t == "array"
        ) && prop.get("type").is_some(),
        None => false,
    }
}

/// Coerce string leaves of `value` to the type declared for the matching
/// property in `schema` (number/integer/boolean), one level deep. Anything
/// that fails to parse, or has no declared/non-primitive type, is left
/// untouched. This is the only numeric/boolean coercion this crate performs
/// itself; richer schema coercion (enums, unions, nested objects) remains
/// the external collaborator's job (see `SPEC_FULL.md` §4.5 and DESIGN.md).
pub fn coerce_leaves(value: &mut serde_json::Value, schema: &crate::tools::ToolDescriptor) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let Some(props) = schema.properties() else {
        return;
    };
    for (key, v) in obj.iter_mut() {
        let Some(prop) = props.get(key) else { continue };
        let declared_type = prop.get("type").and_then(serde_json::Value::as_str);
        match v {
            serde_json::Value::String(s) => {
                *v = coerce_scalar_string(s, declared_type);
            }
            serde_json::Value::Array(items) => {
                let item_type = prop
                    .get("items")
                    .and_then(|i| i.get("type"))
                    .and_then(serde_json::Value::as_str);
                for item in items.iter_mut() {
                    if let serde_json::Value::String(s) = item {
                        *item = coerce_scalar_string(s, item_type);
                    }
                }
            }
            _ => {}
        }
    }
}

fn coerce_scalar_string(s: &str, declared_type: Option<&str>) -> serde_json::Value {
    match declared_type {
        Some("number") => s
            .parse::<f64>()
            .ok()
            .and_then(|n| {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Some(serde_json::Number::from(n as i64))
                } else {
                    serde_json::Number::from_f64(n)
                }
            })
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(s.to_string())),
        Some("integer") => s
            .parse::<i64>()
            .ok()
            .map(|n| serde_json::Value::Number(n.into()))
            .unwrap_or_else(|| serde_json::Value::String(s.to_string())),
        Some("boolean") => match s {
            "true" => serde_json::Value::Bool(true),
            "false" => serde_json::Value::Bool(false),
            _ => serde_json::Value::String(s.to_string()),
        },
        _ => serde_json::Value::String(s.to_string()),
    }
}

/// Per-tool-call state shared by the XML-flavored protocols (element-XML,
/// YAML-in-XML, shorthand-XML, outer-container): the accumulating argument
/// map, its delta emitter, and the raw span for error recovery.
#[derive(Debug)]
pub struct CallState {
    /// Tool-call id, assigned once the tool name is known.
    pub id: String,
    /// Name of the tool being called.
    pub tool_name: String,
    /// Drives `tool-input-delta` emission for this call's arguments JSON.
    pub emitter: crate::delta::DeltaEmitter,
    /// Accumulated argument map, built incrementally as children complete.
    pub args: serde_json::Map<String, serde_json::Value>,
    /// Raw original markup, retained for `emitRawToolCallTextOnError`.
    pub raw: String,
}

impl CallState {
    /// Start fresh per-call state for a newly recognized tool invocation.
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            emitter: crate::delta::DeltaEmitter::new(),
            args: serde_json::Map::new(),
            raw: String::new(),
        }
    }
}

/// Group `children` (document-order `(key, value)` pairs, duplicates
/// allowed) into first-seen key order plus a per-key value list. Shared by
/// every XML-flavored protocol's array/scalar coercion logic (§4.5, §4.7,
/// §4.8).
pub fn group_in_order(children: &[(String, String)]) -> (Vec<String>, std::collections::HashMap<String, Vec<String>>) {
    let mut order = Vec::new();
    let mut grouped: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    for (k, v) in children {
        grouped.entry(k.clone()).or_default().push(v.clone());
        if !order.contains(k) {
            order.push(k.clone());
        }
    }
    (order, grouped)
}

/// Build a progress candidate object honoring the array/scalar withholding
/// stability rule: a key is only surfaced once it is either schema-committed
/// to an array, has repeated, or (for scalars) has a schema-declared
/// non-array type (§4.5, reused verbatim by §4.7/§4.8).
pub fn build_candidate_from_children(
    children: &[(String, String)],
    schema: Option<&crate::tools::ToolDescriptor>,
) -> serde_json::Map<String, serde_json::Value> {
    let (order, grouped) = group_in_order(children);
    let mut map = serde_json::Map::new();
    for key in order {
        let values = &grouped[&key];
        if key_is_array(&key, values.len(), schema) {
            map.insert(key, serde_json::Value::Array(values.iter().cloned().map(serde_json::Value::String).collect()));
        } else if values.len() == 1 && scalar_is_stable(&key, schema) {
            map.insert(key, serde_json::Value::String(values[0].clone()));
        }
    }
    map
}

/// Build the fully-resolved final object at call end: every key included.
pub fn build_final_from_children(
    children: &[(String, String)],
    schema: Option<&crate::tools::ToolDescriptor>,
) -> serde_json::Map<String, serde_json::Value> {
    let (order, grouped) = group_in_order(children);
    let mut map = serde_json::Map::new();
    for key in order {
        let values = &grouped[&key];
        if key_is_array(&key, values.len(), schema) {
            map.insert(key, serde_json::Value::Array(values.iter().cloned().map(serde_json::Value::String).collect()));
        } else {
            map.insert(key, serde_json::Value::String(values[0].clone()));
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_regex_matches_with_whitespace() {
        let mut matcher = TagMatcher::new();
        let (open, _) = matcher.for_tool("get_weather");
        assert!(open.is_match("<get_weather>"));
        assert!(open.is_match("< get_weather >"));
        assert!(open.is_match("<GET_WEATHER>"));
        assert!(!open.is_match("<get_weather_extra>"));
    }

    #[test]
    fn test_open_regex_matches_self_closing() {
        let mut matcher = TagMatcher::new();
        let (open, _) = matcher.for_tool("ping");
        let caps = open.captures("<ping/>").unwrap();
        assert_eq!(caps.get(1).map(|m| m.as_str()), Some("/"));
    }

    #[test]
    fn test_close_regex_matches_with_whitespace() {
        let mut matcher = TagMatcher::new();
        let (_, close) = matcher.for_tool("get_weather");
        assert!(close.is_match("</get_weather>"));
        assert!(close.is_match("</ get_weather >"));
    }

    #[test]
    fn test_matcher_caches_regex_per_tool_name() {
        let mut matcher = TagMatcher::new();
        matcher.for_tool("a");
        matcher.for_tool("b");
        assert_eq!(matcher.cache.len(), 2);
        matcher.for_tool("a");
        assert_eq!(matcher.cache.len(), 2);
    }

    #[test]
    fn test_find_next_marker_earliest_wins() {
        let haystack = "How to use </tool> tag</parameter>";
        let (idx, marker) = find_next_marker(haystack, 0, &["</parameter>", "</function>"]).unwrap();
        assert_eq!(marker, "</parameter>");
        assert_eq!(&haystack[idx..], "</parameter>");
    }

    #[test]
    fn test_is_whitespace_only() {
        assert!(is_whitespace_only("   \n\t"));
        assert!(is_whitespace_only(""));
        assert!(!is_whitespace_only(" x "));
    }
}
