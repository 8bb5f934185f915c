//! The node handler trait and its execution context.

use crate::error::Result;
use crate::expr::{Evaluator, GetFlags, SetFlags};
use crate::model::NodeDefinition;
use crate::token::TokenContext;
use crate::value::Value;
use std::future::Future;
use std::pin::Pin;

/// Outcome of a node handler execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    /// The exit socket to leave through; `None` selects the default.
    pub exit_socket: Option<String>,
}

impl HandlerOutcome {
    /// Leave through the default exit socket.
    #[must_use]
    pub fn default_exit() -> Self {
        Self { exit_socket: None }
    }

    /// Leave through a named exit socket.
    #[must_use]
    pub fn exit(socket: impl Into<String>) -> Self {
        Self {
            exit_socket: Some(socket.into()),
        }
    }
}

/// Execution context handed to a node handler.
///
/// Exposes the token's bound parameters and process variables; nested
/// fields are reached through the path-expression evaluator.
pub struct HandlerContext<'a> {
    /// The token being advanced.
    pub token: &'a mut TokenContext,
    /// The node being executed.
    pub node: &'a NodeDefinition,
    /// The entry socket the token arrived through.
    pub entry_socket: &'a str,
}

impl HandlerContext<'_> {
    /// Read an input parameter of the entry socket.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Value> {
        let key = TokenContext::qualified_param_name(&self.node.name, self.entry_socket, name);
        self.token.param(&key)
    }

    /// Bind an output parameter on an exit socket of this node.
    pub fn set_output(&mut self, socket: &str, name: &str, value: Value) {
        let key = TokenContext::qualified_param_name(&self.node.name, socket, name);
        self.token.set_param(key, value);
    }

    /// Read a process variable.
    #[must_use]
    pub fn process_variable(&self, name: &str) -> Option<&Value> {
        self.token.process_variable(name)
    }

    /// Set a process variable.
    pub fn set_process_variable(&mut self, name: impl Into<String>, value: Value) {
        self.token.set_process_variable(name, value);
    }

    /// Evaluate a path expression against the token, scoped to this node
    /// and entry socket.
    pub fn get_path(&self, expression: &str) -> Result<Value> {
        let prefix = format!("{}.{}", self.node.name, self.entry_socket);
        Evaluator::new()
            .with_name_prefix(&prefix)
            .get(self.token, expression, GetFlags::empty())
    }

    /// Write through a path expression against the token, scoped to this
    /// node and entry socket. Missing objects along the path are created.
    pub fn set_path(&mut self, expression: &str, value: Value) -> Result<()> {
        let prefix = format!("{}.{}", self.node.name, self.entry_socket);
        Evaluator::new().with_name_prefix(&prefix).set(
            self.token,
            expression,
            value,
            SetFlags::CREATE_ALL_OBJECTS,
        )
    }
}

/// A boxed future for async handler execution.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<HandlerOutcome>> + Send + 'a>>;

/// The trait implemented by every node handler.
///
/// Handlers are the units of application logic attached to activity nodes.
/// A handler reads the entry socket's parameters, performs its work, binds
/// output parameters, and chooses the exit socket.
pub trait NodeHandler: Send + Sync {
    /// Execute the handler.
    fn execute<'a>(&'a self, ctx: HandlerContext<'a>) -> HandlerFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeKind, SocketDefinition};

    struct DoubleHandler;

    impl NodeHandler for DoubleHandler {
        fn execute<'a>(&'a self, mut ctx: HandlerContext<'a>) -> HandlerFuture<'a> {
            Box::pin(async move {
                let amount = ctx.input("amount").and_then(Value::as_i64).unwrap_or(0);
                ctx.set_output("Out", "amount", Value::int(amount * 2));
                Ok(HandlerOutcome::default_exit())
            })
        }
    }

    fn sample_node() -> NodeDefinition {
        NodeDefinition::new("Double", NodeKind::Activity)
            .with_entry(SocketDefinition::new("In").default_socket().with_param("amount", "Integer"))
            .with_exit(SocketDefinition::new("Out").default_socket().with_param("amount", "Integer"))
    }

    #[tokio::test]
    async fn handler_reads_inputs_and_binds_outputs() {
        let node = sample_node();
        let mut token = TokenContext::new();
        token.set_param("Double.In.amount", Value::int(21));

        let ctx = HandlerContext {
            token: &mut token,
            node: &node,
            entry_socket: "In",
        };
        let outcome = DoubleHandler.execute(ctx).await.unwrap();

        assert_eq!(outcome, HandlerOutcome::default_exit());
        assert_eq!(token.param("Double.Out.amount").unwrap().as_i64(), Some(42));
    }

    #[test]
    fn outcome_constructors() {
        assert_eq!(HandlerOutcome::exit("Rejected").exit_socket.as_deref(), Some("Rejected"));
        assert!(HandlerOutcome::default_exit().exit_socket.is_none());
    }
}
