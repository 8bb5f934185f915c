//! Type-directed member enumeration for the remote inspector.
//!
//! Inspection is an explicit per-type capability: anything the inspector
//! can descend into implements [`Describable`] and reports `(key, type,
//! value, has_children)` tuples, instead of being discovered by naming
//! convention at runtime.

use opflow_core::token::TokenContext;
use opflow_core::value::Value;
use std::collections::BTreeMap;

/// Maximum number of collection elements enumerated before the synthetic
/// "more" marker is emitted.
pub const MEMBER_DISPLAY_CAP: usize = 20;

/// Maximum rendered length of a member value.
pub const VALUE_RENDER_CAP: usize = 256;

/// One member row reported to the inspector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMemberInfo {
    /// Display key.
    pub key: String,
    /// Type name, well-known namespace prefixes stripped.
    pub type_name: String,
    /// Bounded-length string rendering of the value.
    pub value: String,
    /// Whether the value itself has further members.
    pub has_children: bool,
}

impl ObjectMemberInfo {
    fn for_value(key: impl Into<String>, value: &Value) -> Self {
        Self {
            key: key.into(),
            type_name: value.type_name(),
            value: value.render(VALUE_RENDER_CAP),
            has_children: value.has_children(),
        }
    }

    fn more_marker(remaining: usize) -> Self {
        Self {
            key: "...".to_string(),
            type_name: String::new(),
            value: format!("({} more)", remaining),
            has_children: false,
        }
    }
}

/// Capability of enumerating one's members for the inspector.
pub trait Describable {
    /// Enumerate members. With `skip_defaults`, members holding null or
    /// default values are omitted.
    fn describe_members(&self, skip_defaults: bool) -> Vec<ObjectMemberInfo>;
}

impl Describable for Value {
    fn describe_members(&self, skip_defaults: bool) -> Vec<ObjectMemberInfo> {
        if self.is_array() {
            let len = self.len();
            let mut members: Vec<ObjectMemberInfo> = (0..len.min(MEMBER_DISPLAY_CAP))
                .filter_map(|i| self.element(i).map(|v| (i, v)))
                .map(|(i, v)| ObjectMemberInfo::for_value(format!("[{}]", i), &v))
                .collect();
            if len > MEMBER_DISPLAY_CAP {
                members.push(ObjectMemberInfo::more_marker(len - MEMBER_DISPLAY_CAP));
            }
            return members;
        }
        if self.is_object() {
            return self
                .sorted_members()
                .iter()
                .filter(|(_, v)| !skip_defaults || !is_default_value(v))
                .map(|(k, v)| ObjectMemberInfo::for_value(k.clone(), v))
                .collect();
        }
        Vec::new()
    }
}

impl Describable for TokenContext {
    /// A token context enumerates its bound parameters, sorted by their
    /// qualified names.
    fn describe_members(&self, skip_defaults: bool) -> Vec<ObjectMemberInfo> {
        let sorted: BTreeMap<&String, &Value> = self.param_values.iter().collect();
        sorted
            .into_iter()
            .filter(|(_, v)| !skip_defaults || !is_default_value(v))
            .map(|(k, v)| ObjectMemberInfo::for_value(k.clone(), v))
            .collect()
    }
}

fn is_default_value(value: &Value) -> bool {
    value.is_null()
        || value.as_str() == Some("")
        || ((value.is_object() || value.is_array()) && value.is_empty())
}
