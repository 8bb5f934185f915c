//! Dynamic value type for token parameters and process data.
//!
//! Wraps `serde_json::Value` to provide the type predicates, conversions,
//! and bounded rendering the engine and the debugger inspector need.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Reserved member name carrying the declared complex type of an object.
pub const TYPE_TAG: &str = "_type";

/// Well-known namespace prefixes stripped from type names for display.
const STRIPPED_PREFIXES: &[&str] = &["system.", "core."];

/// Dynamic value for token parameters, process variables, and entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(pub JsonValue);

impl Value {
    /// Create a null value.
    #[must_use]
    pub fn null() -> Self {
        Self(JsonValue::Null)
    }

    /// Create a boolean value.
    #[must_use]
    pub fn bool(v: bool) -> Self {
        Self(JsonValue::Bool(v))
    }

    /// Create an integer value.
    #[must_use]
    pub fn int(v: i64) -> Self {
        Self(JsonValue::Number(v.into()))
    }

    /// Create a floating-point value.
    #[must_use]
    pub fn float(v: f64) -> Self {
        Self(serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number))
    }

    /// Create a string value.
    #[must_use]
    pub fn string(v: impl Into<String>) -> Self {
        Self(JsonValue::String(v.into()))
    }

    /// Create an empty object value.
    #[must_use]
    pub fn object() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Create an array value from elements.
    #[must_use]
    pub fn array(items: Vec<Value>) -> Self {
        Self(JsonValue::Array(items.into_iter().map(|v| v.0).collect()))
    }

    /// Check if the value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Check if the value is an object.
    #[must_use]
    pub fn is_object(&self) -> bool {
        self.0.is_object()
    }

    /// Check if the value is an array.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.0.is_array()
    }

    /// Check if the value is a primitive (string, number, bool, or null).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !self.0.is_object() && !self.0.is_array()
    }

    /// Get as a string slice, if the value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// Get as an i64, if the value is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    /// Get as an f64, if the value is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_f64()
    }

    /// Get as a bool, if the value is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    /// Get an object member by name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<Value> {
        self.0.as_object().and_then(|m| m.get(name)).cloned().map(Self)
    }

    /// Get an array element by index.
    #[must_use]
    pub fn element(&self, index: usize) -> Option<Value> {
        self.0.as_array().and_then(|a| a.get(index)).cloned().map(Self)
    }

    /// Number of elements (arrays) or members (objects); zero otherwise.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.0 {
            JsonValue::Array(a) => a.len(),
            JsonValue::Object(m) => m.len(),
            _ => 0,
        }
    }

    /// Check if the container is empty (always true for primitives).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Object members in sorted order, excluding the type tag.
    #[must_use]
    pub fn sorted_members(&self) -> BTreeMap<String, Value> {
        match &self.0 {
            JsonValue::Object(m) => m
                .iter()
                .filter(|(k, _)| k.as_str() != TYPE_TAG)
                .map(|(k, v)| (k.clone(), Self(v.clone())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// The declared complex type tag of this object, if any.
    #[must_use]
    pub fn declared_type(&self) -> Option<&str> {
        self.0.as_object().and_then(|m| m.get(TYPE_TAG)).and_then(|v| v.as_str())
    }

    /// Display type name: the declared complex type (well-known namespace
    /// prefixes stripped), or the JSON kind.
    #[must_use]
    pub fn type_name(&self) -> String {
        if let Some(tag) = self.declared_type() {
            return strip_type_prefix(tag).to_string();
        }
        match &self.0 {
            JsonValue::Null => "null",
            JsonValue::Bool(_) => "Boolean",
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => "Integer",
            JsonValue::Number(_) => "Float",
            JsonValue::String(_) => "String",
            JsonValue::Array(_) => "List",
            JsonValue::Object(_) => "Object",
        }
        .to_string()
    }

    /// Whether the value has members of its own worth descending into.
    #[must_use]
    pub fn has_children(&self) -> bool {
        match &self.0 {
            JsonValue::Array(a) => !a.is_empty(),
            JsonValue::Object(m) => m.keys().any(|k| k != TYPE_TAG),
            _ => false,
        }
    }

    /// Bounded-length string rendering for display.
    ///
    /// Renders primitives verbatim and containers as compact JSON; output
    /// longer than `max_len` characters is truncated with an ellipsis.
    #[must_use]
    pub fn render(&self, max_len: usize) -> String {
        let full = match &self.0 {
            JsonValue::Null => "null".to_string(),
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        if full.chars().count() <= max_len {
            full
        } else {
            let truncated: String = full.chars().take(max_len).collect();
            format!("{}...", truncated)
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::null()
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Self(v)
    }
}

/// Strip a well-known namespace prefix from a type name.
#[must_use]
pub fn strip_type_prefix(name: &str) -> &str {
    for prefix in STRIPPED_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest;
        }
    }
    name
}
