//! Error types for OPFLOW.
//!
//! This module provides strongly-typed errors with actionable context.
//! All errors include relevant identifiers (token ID, expression, client ID)
//! to aid in debugging and tracing.

use crate::types::{TaskId, TokenId};
use thiserror::Error;

/// The main error type for OPFLOW operations.
#[derive(Error, Debug)]
pub enum OpflowError {
    // =========================================================================
    // Model Reference Errors (E100-E199)
    // =========================================================================
    /// A symbolic node/socket reference could not be resolved.
    #[error("E101: Cannot resolve model reference '{reference}': {cause}")]
    ModelReference {
        /// The textual reference that failed to resolve.
        reference: String,
        /// Reason for the resolution failure.
        cause: String,
    },

    /// A process start was attempted at a node outside its visibility scope.
    #[error("E102: Start scope violation at '{reference}': {cause}")]
    StartScope {
        /// The initial-node reference.
        reference: String,
        /// Reason for the rejection.
        cause: String,
    },

    // =========================================================================
    // Parameter Binding Errors (E200-E299)
    // =========================================================================
    /// String conversion of a simple-typed parameter failed.
    #[error("E201: Parameter '{param}' failed validation for type {expected}: {cause}")]
    ParameterValidation {
        /// The qualified parameter name.
        param: String,
        /// The declared target type.
        expected: String,
        /// Reason for the conversion failure.
        cause: String,
    },

    /// A complex-typed parameter value is not assignable to its target type.
    #[error("E202: Parameter '{param}' has incorrect type: expected {expected}, got {actual}")]
    IncorrectParameterType {
        /// The qualified parameter name.
        param: String,
        /// The declared target type.
        expected: String,
        /// The supplied value type.
        actual: String,
    },

    // =========================================================================
    // Expression Errors (E300-E399)
    // =========================================================================
    /// The path expression violates the grammar.
    #[error("E301: Syntax error in expression '{expression}' at column {column}: {cause}")]
    ExpressionSyntax {
        /// The offending expression.
        expression: String,
        /// Zero-based column of the violation.
        column: usize,
        /// Description of the violation.
        cause: String,
    },

    /// The path expression could not be evaluated against the data.
    #[error("E302: Cannot evaluate expression '{expression}' at column {column}: {cause}")]
    ExpressionEvaluation {
        /// The offending expression.
        expression: String,
        /// Zero-based column of the failing segment.
        column: usize,
        /// Description of the failure.
        cause: String,
    },

    /// An error was raised inside embedded script code.
    ///
    /// Distinguished from [`OpflowError::ExpressionEvaluation`] so callers
    /// can unwrap the original cause via `source()`.
    #[error("E303: Script '{script}' raised an error: {source}")]
    ScriptTarget {
        /// Name or excerpt of the script.
        script: String,
        /// The original error raised by the script.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // =========================================================================
    // Debugger Errors (E400-E499)
    // =========================================================================
    /// A debugger operation used an invalid or unregistered client id.
    #[error("E401: Debugger protocol violation for client '{client}': {cause}")]
    DebuggerProtocol {
        /// The client id the operation was issued for.
        client: String,
        /// Description of the violation.
        cause: String,
    },

    /// Token execution was aborted by a debugger `stop` command.
    #[error("E402: Token {token} stopped by debugger")]
    StoppedByDebugger {
        /// The token whose execution was cancelled.
        token: TokenId,
    },

    // =========================================================================
    // Token Store / Lifecycle Errors (E500-E599)
    // =========================================================================
    /// No token context exists under the given id.
    #[error("E501: Token context {token} not found")]
    TokenNotFound {
        /// The missing token id.
        token: TokenId,
    },

    /// A lifecycle operation was attempted in the wrong state.
    #[error("E502: Token {token} is in state {state}, expected {expected}")]
    InvalidLifecycleState {
        /// The token id.
        token: TokenId,
        /// The observed state.
        state: String,
        /// The state the operation requires.
        expected: String,
    },

    /// An operation requires a current position but the token has none.
    #[error("E503: Token {token} has no current position")]
    NoCurrentPosition {
        /// The token id.
        token: TokenId,
    },

    /// No workflow task exists under the given id.
    #[error("E504: Workflow task {task} not found")]
    WorkflowTaskNotFound {
        /// The missing task id.
        task: TaskId,
    },

    // =========================================================================
    // Handler / Engine Errors (E600-E699)
    // =========================================================================
    /// A node references a handler that is not registered.
    #[error("E601: Handler '{name}' not found")]
    HandlerNotFound {
        /// The missing handler name.
        name: String,
    },

    /// A node handler returned an error.
    #[error("E602: Handler failed at node '{node}' for token {token}: {cause}")]
    HandlerFailed {
        /// The node whose handler failed.
        node: String,
        /// The token being executed.
        token: TokenId,
        /// Reason for the failure.
        cause: String,
    },
}

impl OpflowError {
    /// Get the error code (e.g., "E101").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ModelReference { .. } => "E101",
            Self::StartScope { .. } => "E102",
            Self::ParameterValidation { .. } => "E201",
            Self::IncorrectParameterType { .. } => "E202",
            Self::ExpressionSyntax { .. } => "E301",
            Self::ExpressionEvaluation { .. } => "E302",
            Self::ScriptTarget { .. } => "E303",
            Self::DebuggerProtocol { .. } => "E401",
            Self::StoppedByDebugger { .. } => "E402",
            Self::TokenNotFound { .. } => "E501",
            Self::InvalidLifecycleState { .. } => "E502",
            Self::NoCurrentPosition { .. } => "E503",
            Self::WorkflowTaskNotFound { .. } => "E504",
            Self::HandlerNotFound { .. } => "E601",
            Self::HandlerFailed { .. } => "E602",
        }
    }

    /// Check if this error is fatal to the originating call.
    ///
    /// Fatal errors are never retried automatically and must not mutate the
    /// stored token position.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ModelReference { .. }
                | Self::StartScope { .. }
                | Self::ParameterValidation { .. }
                | Self::IncorrectParameterType { .. }
        )
    }

    /// Check if this error originates in the expression evaluator.
    #[must_use]
    pub fn is_expression_error(&self) -> bool {
        matches!(
            self,
            Self::ExpressionSyntax { .. } | Self::ExpressionEvaluation { .. }
        )
    }

    /// Check if this error is a cooperative cancellation rather than a
    /// failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::StoppedByDebugger { .. })
    }
}

/// Result type alias using `OpflowError`.
pub type Result<T> = std::result::Result<T, OpflowError>;
