//! Bridge between the engine and an embedded script interpreter.
//!
//! The interpreter itself is an external collaborator; the bridge copies
//! named variables into a scope before the run, hands the scope to the
//! interpreter, and writes changed variables back through the expression
//! evaluator afterwards. Errors raised inside script code are wrapped as
//! `ScriptTarget` so callers can unwrap the original cause.

use opflow_core::error::{OpflowError, Result};
use opflow_core::expr::{Evaluator, GetFlags, SetFlags};
use opflow_core::token::TokenContext;
use opflow_core::value::Value;
use std::collections::HashMap;

/// Named variables visible to a script run.
#[derive(Debug, Default, Clone)]
pub struct ScriptScope {
    variables: HashMap<String, Value>,
}

impl ScriptScope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Set a variable.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Names of all variables in the scope.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.variables.keys().map(String::as_str).collect()
    }
}

/// An embedded script interpreter.
pub trait ScriptEngine: Send + Sync {
    /// Run a script against a variable scope and return its result value.
    fn run(&self, source: &str, scope: &mut ScriptScope) -> Result<Value>;
}

/// A variable binding: script variable name and the token path expression
/// it is copied from or to.
pub type VariableBinding<'a> = (&'a str, &'a str);

/// Copies variables in and out around script execution.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptBridge;

impl ScriptBridge {
    /// Create a bridge.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Run a script against a token.
    ///
    /// Each input binding is read from the token via the evaluator and
    /// placed into the scope under its variable name; after the run each
    /// output binding is written back, creating missing objects along the
    /// path.
    pub fn run(
        &self,
        interpreter: &dyn ScriptEngine,
        source: &str,
        token: &mut TokenContext,
        inputs: &[VariableBinding<'_>],
        outputs: &[VariableBinding<'_>],
    ) -> Result<Value> {
        let evaluator = Evaluator::new();
        let mut scope = ScriptScope::new();
        for (name, path) in inputs {
            let value = evaluator.get(token, path, GetFlags::empty())?;
            scope.set(*name, value);
        }

        let result = interpreter
            .run(source, &mut scope)
            .map_err(|e| OpflowError::ScriptTarget {
                script: excerpt(source),
                source: Box::new(e),
            })?;

        for (name, path) in outputs {
            let value = scope.get(name).cloned().unwrap_or_default();
            evaluator.set(token, path, value, SetFlags::CREATE_ALL_OBJECTS)?;
        }
        Ok(result)
    }
}

fn excerpt(source: &str) -> String {
    const MAX: usize = 40;
    if source.chars().count() <= MAX {
        source.to_string()
    } else {
        let head: String = source.chars().take(MAX).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Interprets the single statement `result = total * 2`.
    struct DoublingInterpreter;

    impl ScriptEngine for DoublingInterpreter {
        fn run(&self, _source: &str, scope: &mut ScriptScope) -> Result<Value> {
            let total = scope.get("total").and_then(Value::as_i64).unwrap_or(0);
            let doubled = Value::int(total * 2);
            scope.set("result", doubled.clone());
            Ok(doubled)
        }
    }

    struct FailingInterpreter;

    impl ScriptEngine for FailingInterpreter {
        fn run(&self, _source: &str, _scope: &mut ScriptScope) -> Result<Value> {
            Err(OpflowError::ExpressionEvaluation {
                expression: "total".to_string(),
                column: 0,
                cause: "undefined variable".to_string(),
            })
        }
    }

    #[test]
    fn variables_are_copied_in_and_out() {
        let mut token = TokenContext::new();
        token.set_param("order", Value(serde_json::json!({"total": 21})));

        let result = ScriptBridge::new()
            .run(
                &DoublingInterpreter,
                "result = total * 2",
                &mut token,
                &[("total", "order.total")],
                &[("result", "order.doubled")],
            )
            .unwrap();

        assert_eq!(result.as_i64(), Some(42));
        let written = token.param("order").unwrap().member("doubled").unwrap();
        assert_eq!(written.as_i64(), Some(42));
    }

    #[test]
    fn script_errors_are_wrapped_with_cause() {
        let mut token = TokenContext::new();
        let err = ScriptBridge::new()
            .run(&FailingInterpreter, "boom()", &mut token, &[], &[])
            .unwrap_err();

        assert_eq!(err.code(), "E303");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn long_scripts_are_excerpted() {
        let long = "x".repeat(100);
        assert_eq!(excerpt(&long).chars().count(), 43);
        assert_eq!(excerpt("short"), "short");
    }
}
