//! Tool descriptors (§3 "Tool descriptor").
//!
//! A [`ToolDescriptor`] is just `{ name, input_schema }`; it drives two
//! things downstream: element-XML array-coercion decisions (§4.5) and the
//! arguments-only heuristic in the non-streaming recovery path (§4.9). This
//! crate never executes tools — that's an external collaborator's job — so,
//! unlike the teacher's `Tool`, there is no handler field here.

use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;

/// A tool the model may call: its name and the JSON Schema for its input.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Unique tool name, as it appears in markup (`<tool_name>`, `function=NAME`, etc).
    pub name: String,
    /// JSON Schema describing the shape of `arguments`.
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Construct a tool descriptor, validating the name and schema shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTool`] for an empty/whitespace name, and
    /// [`Error::InvalidSchema`] if `input_schema` is not a JSON object (§7:
    /// "Invalid tool descriptors ... The entry is skipped").
    pub fn new(name: impl Into<String>, input_schema: Value) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_tool("tool name cannot be empty or whitespace"));
        }
        if !input_schema.is_object() {
            return Err(Error::invalid_schema(&name, "inputSchema must be a JSON object"));
        }
        Ok(Self { name, input_schema })
    }

    /// The `properties` map of the schema, if present and well-formed.
    pub fn properties(&self) -> Option<&serde_json::Map<String, Value>> {
        self.input_schema.get("properties").and_then(Value::as_object)
    }

    /// True if a property named `key` is declared with `{"type": "array"}`
    /// (or an array of allowed types containing `"array"`). Used by the
    /// element-XML protocol's array-coercion stability rule (§4.5).
    pub fn property_is_array_typed(&self, key: &str) -> bool {
        let Some(props) = self.properties() else {
            return false;
        };
        let Some(prop) = props.get(key) else {
            return false;
        };
        match prop.get("type") {
            Some(Value::String(s)) => s == "array",
            Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("array")),
            _ => false,
        }
    }

    /// True if the schema forbids properties outside of `properties`
    /// (`"additionalProperties": false`).
    pub fn forbids_additional_properties(&self) -> bool {
        matches!(self.input_schema.get("additionalProperties"), Some(Value::Bool(false)))
    }

    /// Arguments-only heuristic acceptance test (§4.9): does `candidate`
    /// plausibly belong to this tool's schema, with no `name`/`arguments`
    /// envelope keys?
    pub fn accepts_arguments_only(&self, candidate: &serde_json::Map<String, Value>) -> bool {
        if candidate.contains_key("name") || candidate.contains_key("arguments") {
            return false;
        }
        let Some(props) = self.properties() else {
            return candidate.is_empty();
        };
        if candidate.is_empty() {
            return true;
        }
        let has_overlap = candidate.keys().any(|k| props.contains_key(k));
        if !has_overlap {
            return false;
        }
        if self.forbids_additional_properties() {
            return candidate.keys().all(|k| props.contains_key(k));
        }
        true
    }
}

/// A name-keyed registry of tool descriptors, as consumed by every protocol parser.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    by_name: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    /// Build a registry from a list of tool descriptors. Entries whose
    /// validation already failed should be filtered out by the caller before
    /// construction (§7: invalid entries are skipped with an `onError`, not
    /// propagated here, since they were never successfully constructed).
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        let by_name = tools.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self { by_name }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name)
    }

    /// True if exactly one tool is registered (gates the §4.9 arguments-only heuristic).
    pub fn is_single_tool(&self) -> bool {
        self.by_name.len() == 1
    }

    /// The sole registered tool, if there is exactly one.
    pub fn sole_tool(&self) -> Option<&ToolDescriptor> {
        if self.is_single_tool() { self.by_name.values().next() } else { None }
    }

    /// All tool names, for sentinel construction (e.g. `<{toolName}>` in element-XML).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
