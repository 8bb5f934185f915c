//! Read and write evaluation of path expressions against a token context.

use super::parser::{parse, PathExpr, Segment, SegmentKind};
use super::{GetFlags, PersistenceContext, SetFlags};
use crate::error::{OpflowError, Result};
use crate::model::TypeRegistry;
use crate::token::{TokenContext, PROCESS_VARIABLE_PREFIX};
use crate::value::Value;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

fn eval_error(source: &str, column: usize, cause: impl Into<String>) -> OpflowError {
    OpflowError::ExpressionEvaluation {
        expression: source.to_string(),
        column,
        cause: cause.into(),
    }
}

/// The path-expression evaluator.
///
/// Stateless apart from its pluggable root-resolution environment: a
/// caller-supplied override map, an optional name prefix for scoped lookups
/// (e.g. "relative to the current node and socket"), a persistence-context
/// provider for the `##` operator, and a type registry for validating deref
/// targets.
#[derive(Default, Clone, Copy)]
pub struct Evaluator<'a> {
    overrides: Option<&'a HashMap<String, Value>>,
    name_prefix: Option<&'a str>,
    persistence: Option<&'a dyn PersistenceContext>,
    types: Option<&'a TypeRegistry>,
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator with an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            overrides: None,
            name_prefix: None,
            persistence: None,
            types: None,
        }
    }

    /// Supply an override map consulted before any token lookup.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &'a HashMap<String, Value>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Scope bare identifiers under a name prefix (tried before the bare
    /// name).
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: &'a str) -> Self {
        self.name_prefix = Some(prefix);
        self
    }

    /// Supply the persistence context required by the `##` operator.
    #[must_use]
    pub fn with_persistence(mut self, persistence: &'a dyn PersistenceContext) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Supply a type registry for validating `##` targets.
    #[must_use]
    pub fn with_types(mut self, types: &'a TypeRegistry) -> Self {
        self.types = Some(types);
        self
    }

    fn resolve_root(&self, token: &TokenContext, name: &str) -> Option<Value> {
        if let Some(overrides) = self.overrides {
            if let Some(v) = overrides.get(name) {
                return Some(v.clone());
            }
        }
        if name.starts_with(PROCESS_VARIABLE_PREFIX) {
            return token.process_variable(name).cloned();
        }
        if let Some(prefix) = self.name_prefix {
            if let Some(v) = token.param(&format!("{}.{}", prefix, name)) {
                return Some(v.clone());
            }
        }
        token.param(name).cloned()
    }

    /// Evaluate a path expression and return the addressed value.
    pub fn get(&self, token: &TokenContext, expression: &str, flags: GetFlags) -> Result<Value> {
        let path = parse(expression)?;

        let mut current = match self.resolve_root(token, &path.root) {
            Some(v) => v,
            None => {
                if flags.contains(GetFlags::OBJECT_MUST_EXIST) {
                    return Err(eval_error(
                        expression,
                        path.root_col,
                        format!("unknown object '{}'", path.root),
                    ));
                }
                return Ok(Value::null());
            }
        };

        for segment in &path.segments {
            current = match &segment.kind {
                SegmentKind::Member(name) => {
                    match self.step_member(&current, name, &path, segment, flags)? {
                        Some(v) => v,
                        None => return Ok(Value::null()),
                    }
                }
                SegmentKind::Index(raw) => {
                    match self.step_index(&current, raw, &path, segment, flags)? {
                        Some(v) => v,
                        None => return Ok(Value::null()),
                    }
                }
                SegmentKind::Deref(type_name) => {
                    match self.step_deref(&current, type_name, &path, segment, flags)? {
                        Some(v) => v,
                        None => return Ok(Value::null()),
                    }
                }
            };
        }

        Ok(current)
    }

    /// `.member` — property read. `Ok(None)` means "degrade to null".
    fn step_member(
        &self,
        current: &Value,
        name: &str,
        path: &PathExpr,
        segment: &Segment,
        flags: GetFlags,
    ) -> Result<Option<Value>> {
        if current.is_null() {
            if flags.contains(GetFlags::MEMBER_MUST_EXIST) {
                return Err(eval_error(&path.source, segment.col, "member access on null value"));
            }
            return Ok(None);
        }
        if !current.is_object() {
            return Err(eval_error(
                &path.source,
                segment.col,
                format!("cannot read member '{}' of a {} value", name, current.type_name()),
            ));
        }
        match current.member(name) {
            Some(v) => Ok(Some(v)),
            None => {
                if flags.contains(GetFlags::MEMBER_MUST_EXIST) {
                    Err(eval_error(&path.source, segment.col, format!("no member '{}'", name)))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// `[index]` — dispatched on the runtime type of the current value.
    fn step_index(
        &self,
        current: &Value,
        raw: &str,
        path: &PathExpr,
        segment: &Segment,
        flags: GetFlags,
    ) -> Result<Option<Value>> {
        if current.is_null() {
            if flags.contains(GetFlags::MEMBER_MUST_EXIST) {
                return Err(eval_error(&path.source, segment.col, "index access on null value"));
            }
            return Ok(None);
        }
        if current.is_array() {
            let index: usize = raw.trim().parse().map_err(|_| {
                eval_error(
                    &path.source,
                    segment.col,
                    format!("index '{}' is not numeric", raw),
                )
            })?;
            // Out-of-range indexing is an error, never a silent null.
            return match current.element(index) {
                Some(v) => Ok(Some(v)),
                None => Err(eval_error(
                    &path.source,
                    segment.col,
                    format!("index {} out of range (length {})", index, current.len()),
                )),
            };
        }
        if current.is_object() {
            // Direct key lookup, then the string-rendered key as fallback.
            let found = current.member(raw).or_else(|| current.member(raw.trim()));
            return match found {
                Some(v) => Ok(Some(v)),
                None => {
                    if flags.contains(GetFlags::MEMBER_MUST_EXIST) {
                        Err(eval_error(&path.source, segment.col, format!("no key '{}'", raw)))
                    } else {
                        Ok(None)
                    }
                }
            };
        }
        Err(eval_error(
            &path.source,
            segment.col,
            format!("cannot index into a {} value", current.type_name()),
        ))
    }

    /// `##TypeName` — persisted-entity lookup by id value.
    fn step_deref(
        &self,
        current: &Value,
        type_name: &str,
        path: &PathExpr,
        segment: &Segment,
        flags: GetFlags,
    ) -> Result<Option<Value>> {
        let persistence = self.persistence.ok_or_else(|| {
            eval_error(&path.source, segment.col, "no persistence context available")
        })?;
        if let Some(types) = self.types {
            match types.get(type_name) {
                Some(dt) if dt.is_simple() => {
                    return Err(eval_error(
                        &path.source,
                        segment.col,
                        format!("cannot dereference simple type '{}'", type_name),
                    ));
                }
                Some(_) => {}
                None => {
                    return Err(eval_error(
                        &path.source,
                        segment.col,
                        format!("unknown data type '{}'", type_name),
                    ));
                }
            }
        }
        if current.is_null() {
            if flags.contains(GetFlags::MEMBER_MUST_EXIST) {
                return Err(eval_error(&path.source, segment.col, "dereference of null id"));
            }
            return Ok(None);
        }
        match persistence.fetch(type_name, current)? {
            Some(v) => Ok(Some(v)),
            None => {
                if flags.contains(GetFlags::MEMBER_MUST_EXIST) {
                    Err(eval_error(
                        &path.source,
                        segment.col,
                        format!("no {} entity for id {}", type_name, current.render(64)),
                    ))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Write a value through a path expression.
    ///
    /// The write grammar is restricted to member chains; index and deref
    /// segments are rejected as syntax errors.
    pub fn set(
        &self,
        token: &mut TokenContext,
        expression: &str,
        value: Value,
        flags: SetFlags,
    ) -> Result<()> {
        let path = parse(expression)?;

        for segment in &path.segments {
            match segment.kind {
                SegmentKind::Member(_) => {}
                SegmentKind::Index(_) | SegmentKind::Deref(_) => {
                    return Err(OpflowError::ExpressionSyntax {
                        expression: expression.to_string(),
                        column: segment.col,
                        cause: "only member access is allowed when writing".to_string(),
                    });
                }
            }
        }

        let is_process_variable = path.root.starts_with(PROCESS_VARIABLE_PREFIX);
        let root_key = if is_process_variable {
            path.root.clone()
        } else {
            match self.name_prefix {
                Some(prefix) => format!("{}.{}", prefix, path.root),
                None => path.root.clone(),
            }
        };

        if path.segments.is_empty() {
            if is_process_variable {
                token.set_process_variable(root_key, value);
            } else {
                token.set_param(root_key, value);
            }
            return Ok(());
        }

        let existing = if is_process_variable {
            token.process_variable(&root_key).cloned()
        } else {
            token.param(&root_key).cloned()
        };

        let mut root_value = match existing {
            Some(v) if v.is_primitive() && !v.is_null() => {
                // Simple target types forbid any member suffix.
                return Err(eval_error(
                    expression,
                    path.segments[0].col,
                    format!("cannot write member of a {} value", v.type_name()),
                ));
            }
            Some(v) if v.is_null() => {
                if flags.contains(SetFlags::CREATE_TOP_LEVEL_OBJECT) {
                    Value::object()
                } else {
                    return Err(eval_error(
                        expression,
                        path.root_col,
                        format!("object '{}' is null", path.root),
                    ));
                }
            }
            Some(v) => v,
            None => {
                if flags.contains(SetFlags::CREATE_TOP_LEVEL_OBJECT) {
                    Value::object()
                } else {
                    return Err(eval_error(
                        expression,
                        path.root_col,
                        format!("unknown object '{}'", path.root),
                    ));
                }
            }
        };

        self.write_members(&mut root_value, &path, value, flags)?;

        if is_process_variable {
            token.set_process_variable(root_key, root_value);
        } else {
            token.set_param(root_key, root_value);
        }
        Ok(())
    }

    fn write_members(
        &self,
        root: &mut Value,
        path: &PathExpr,
        value: Value,
        flags: SetFlags,
    ) -> Result<()> {
        let mut cursor: &mut JsonValue = &mut root.0;
        let last = path.segments.len() - 1;

        for (i, segment) in path.segments.iter().enumerate() {
            let SegmentKind::Member(name) = &segment.kind else {
                unreachable!("non-member segments are rejected before writing");
            };

            if cursor.is_null() {
                if flags.contains(SetFlags::CREATE_INTERMEDIATE_OBJECTS) {
                    *cursor = JsonValue::Object(serde_json::Map::new());
                } else {
                    return Err(eval_error(&path.source, segment.col, "member access on null value"));
                }
            }
            let Some(map) = cursor.as_object_mut() else {
                return Err(eval_error(
                    &path.source,
                    segment.col,
                    format!("cannot write member '{}' of a non-object value", name),
                ));
            };

            if i == last {
                map.insert(name.clone(), value.0);
                return Ok(());
            }

            if !map.contains_key(name) {
                if flags.contains(SetFlags::CREATE_INTERMEDIATE_OBJECTS) {
                    map.insert(name.clone(), JsonValue::Object(serde_json::Map::new()));
                } else {
                    return Err(eval_error(&path.source, segment.col, format!("no member '{}'", name)));
                }
            }
            cursor = map.get_mut(name).expect("member present after insert");
        }
        unreachable!("segments are non-empty")
    }
}
