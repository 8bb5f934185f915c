//! Parameter data types and the type registry.
//!
//! Simple types carry a string-to-value converter used during parameter
//! binding; complex types describe the declared members of structured
//! process data and decide assignability of supplied values.

use crate::error::{OpflowError, Result};
use crate::value::{Value, TYPE_TAG};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of simple (primitive) parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimpleKind {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point.
    Float,
    /// Boolean.
    Boolean,
}

impl SimpleKind {
    /// The display name of the type.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Integer => "Integer",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
        }
    }

    /// Convert a string rendering into a typed value.
    pub fn convert_from_str(&self, param: &str, input: &str) -> Result<Value> {
        let invalid = |cause: String| OpflowError::ParameterValidation {
            param: param.to_string(),
            expected: self.name().to_string(),
            cause,
        };
        match self {
            Self::String => Ok(Value::string(input)),
            Self::Integer => input
                .trim()
                .parse::<i64>()
                .map(Value::int)
                .map_err(|e| invalid(e.to_string())),
            Self::Float => input
                .trim()
                .parse::<f64>()
                .map(Value::float)
                .map_err(|e| invalid(e.to_string())),
            Self::Boolean => match input.trim() {
                "true" => Ok(Value::bool(true)),
                "false" => Ok(Value::bool(false)),
                other => Err(invalid(format!("'{}' is not a boolean", other))),
            },
        }
    }

    /// Check whether an already-typed value matches this kind.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.as_str().is_some(),
            Self::Integer => value.as_i64().is_some(),
            Self::Float => value.as_f64().is_some(),
            Self::Boolean => value.as_bool().is_some(),
        }
    }
}

/// A declared member of a complex type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDefinition {
    /// Member name.
    pub name: String,
    /// Name of the member's data type.
    pub type_name: String,
}

impl MemberDefinition {
    /// Create a member definition.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A declared complex data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexType {
    /// Fully qualified type name.
    pub name: String,
    /// Declared members.
    pub members: Vec<MemberDefinition>,
}

impl ComplexType {
    /// Create a complex type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Add a declared member.
    #[must_use]
    pub fn with_member(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.members.push(MemberDefinition::new(name, type_name));
        self
    }

    /// Check whether a supplied value is assignable to this type.
    ///
    /// The value must be an object; an explicit type tag, when present,
    /// must name this type.
    #[must_use]
    pub fn is_assignable(&self, value: &Value) -> bool {
        if !value.is_object() {
            return false;
        }
        match value.declared_type() {
            None => true,
            Some(tag) => tag == self.name,
        }
    }

    /// Create an empty instance carrying this type's tag.
    #[must_use]
    pub fn instantiate(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(
            TYPE_TAG.to_string(),
            serde_json::Value::String(self.name.clone()),
        );
        Value(serde_json::Value::Object(map))
    }
}

/// A parameter data type: simple with a converter, or complex with members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// A primitive type.
    Simple(SimpleKind),
    /// A structured type.
    Complex(ComplexType),
}

impl DataType {
    /// The display name of the type.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Simple(kind) => kind.name(),
            Self::Complex(t) => &t.name,
        }
    }

    /// Check if the type is simple.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        matches!(self, Self::Simple(_))
    }
}

/// Registry of data types by name.
///
/// Always contains the four simple types; complex types are registered by
/// the model provider.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, DataType>,
}

impl TypeRegistry {
    /// Create a registry pre-populated with the simple types.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            types: HashMap::new(),
        };
        for kind in [
            SimpleKind::String,
            SimpleKind::Integer,
            SimpleKind::Float,
            SimpleKind::Boolean,
        ] {
            registry
                .types
                .insert(kind.name().to_string(), DataType::Simple(kind));
        }
        registry
    }

    /// Register a complex type.
    pub fn register(&mut self, complex: ComplexType) {
        self.types
            .insert(complex.name.clone(), DataType::Complex(complex));
    }

    /// Look up a type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DataType> {
        self.types.get(name)
    }
}
