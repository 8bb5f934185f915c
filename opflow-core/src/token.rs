//! The Token Context: persisted execution state of one process instance.

use crate::model::ModelQualifier;
use crate::types::{ClientId, RunnerId, TokenId};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved name prefix distinguishing process variables from parameters.
pub const PROCESS_VARIABLE_PREFIX: &str = "_";

/// Scheduling status of a token.
///
/// This is a closed enumeration; engine code must not invent new states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created but never positioned or committed.
    #[default]
    Created,
    /// Claimed for execution, not yet running.
    Selected,
    /// Currently executed by a worker.
    Running,
    /// Parked at a suspension point.
    Suspended,
    /// Terminally finished.
    Completed,
}

impl LifecycleState {
    /// The display name of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Selected => "selected",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
        }
    }

    /// Whether a worker currently holds a claim on the context.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Selected | Self::Running)
    }
}

/// A pending instruction the scheduler must honor before or while executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleRequest {
    /// No pending instruction.
    #[default]
    None,
    /// The token should be picked up and executed.
    Resume,
    /// The token should terminate gracefully before its next step.
    Stop,
}

/// One caller frame pushed when a subprocess call is entered.
///
/// The call-stack depth distinguishes step-over from step-into in the
/// debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStackFrame {
    /// Position execution returns to when the callee completes.
    pub return_position: ModelQualifier,
}

impl CallStackFrame {
    /// Create a frame returning to the given position.
    #[must_use]
    pub fn new(return_position: ModelQualifier) -> Self {
        Self { return_position }
    }
}

/// The persisted execution state of one running process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenContext {
    /// Opaque persistent id.
    pub id: TokenId,
    /// Current position, or `None` once the token has ended.
    pub current_socket: Option<ModelQualifier>,
    /// Scheduling status.
    pub lifecycle_state: LifecycleState,
    /// Pending scheduling instruction.
    pub lifecycle_request: LifecycleRequest,
    /// Dispatch priority; lower values are claimed first.
    pub priority: u32,
    /// The runner holding the claim while `Selected`/`Running`.
    pub owner: Option<RunnerId>,
    /// Socket-qualified parameter values (`"Node.Socket.param"`).
    pub param_values: HashMap<String, Value>,
    /// Model-scoped variables, keyed by their reserved-prefix names.
    pub process_variables: HashMap<String, Value>,
    /// The model owning the current position, resolved per start/resume.
    pub executing_model: Option<String>,
    /// Caller frames of nested subprocess calls.
    pub call_stack: Vec<CallStackFrame>,
    /// Sticky association with one debugger client.
    pub debugger_id: Option<ClientId>,
    /// Parent token for child contexts spawned by this one.
    pub parent: Option<TokenId>,
}

impl TokenContext {
    /// Create a fresh context with an empty position.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: TokenId::new(),
            current_socket: None,
            lifecycle_state: LifecycleState::Created,
            lifecycle_request: LifecycleRequest::None,
            priority: 0,
            owner: None,
            param_values: HashMap::new(),
            process_variables: HashMap::new(),
            executing_model: None,
            call_stack: Vec::new(),
            debugger_id: None,
            parent: None,
        }
    }

    /// Set the dispatch priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach the token to a debugger client.
    #[must_use]
    pub fn with_debugger(mut self, client: ClientId) -> Self {
        self.debugger_id = Some(client);
        self
    }

    /// Set the position where a newly created token starts.
    pub fn set_initial_position(&mut self, position: ModelQualifier) {
        self.executing_model = Some(position.model.clone());
        self.current_socket = Some(position);
    }

    /// Set the position where a suspended token resumes.
    pub fn set_resumption_position(&mut self, position: ModelQualifier) {
        self.executing_model = Some(position.model.clone());
        self.current_socket = Some(position);
    }

    /// Current call-stack depth.
    #[must_use]
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Push a caller frame when entering a subprocess.
    pub fn push_frame(&mut self, frame: CallStackFrame) {
        self.call_stack.push(frame);
    }

    /// Pop the innermost caller frame when a subprocess completes.
    pub fn pop_frame(&mut self) -> Option<CallStackFrame> {
        self.call_stack.pop()
    }

    /// Build the socket-qualified key of a parameter.
    #[must_use]
    pub fn qualified_param_name(node: &str, socket: &str, param: &str) -> String {
        format!("{}.{}.{}", node, socket, param)
    }

    /// Read a parameter by its qualified name.
    #[must_use]
    pub fn param(&self, qualified: &str) -> Option<&Value> {
        self.param_values.get(qualified)
    }

    /// Bind a parameter under its qualified name.
    pub fn set_param(&mut self, qualified: impl Into<String>, value: Value) {
        self.param_values.insert(qualified.into(), value);
    }

    /// Drop all parameters bound to sockets of the given node.
    ///
    /// Called once the token has moved past a node so stale bindings do not
    /// accumulate.
    pub fn clear_node_params(&mut self, node: &str) {
        let prefix = format!("{}.", node);
        self.param_values.retain(|k, _| !k.starts_with(&prefix));
    }

    /// Read a process variable. The name must carry the reserved prefix.
    #[must_use]
    pub fn process_variable(&self, name: &str) -> Option<&Value> {
        self.process_variables.get(name)
    }

    /// Set a process variable. The name must carry the reserved prefix.
    pub fn set_process_variable(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        debug_assert!(
            name.starts_with(PROCESS_VARIABLE_PREFIX),
            "process variable names must start with '{}'",
            PROCESS_VARIABLE_PREFIX
        );
        self.process_variables.insert(name, value);
    }

    /// Request graceful termination before the next step.
    pub fn request_stop(&mut self) {
        self.lifecycle_request = LifecycleRequest::Stop;
    }

    /// Whether the token has ended (no current position).
    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.current_socket.is_none()
    }
}

impl Default for TokenContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_is_unpositioned() {
        let ctx = TokenContext::new();
        assert!(ctx.has_ended());
        assert_eq!(ctx.lifecycle_state, LifecycleState::Created);
        assert_eq!(ctx.lifecycle_request, LifecycleRequest::None);
        assert_eq!(ctx.call_depth(), 0);
    }

    #[test]
    fn initial_position_resolves_model() {
        let mut ctx = TokenContext::new();
        ctx.set_initial_position(ModelQualifier::socket("Shop", "Order", "Start", "In"));
        assert_eq!(ctx.executing_model.as_deref(), Some("Shop"));
        assert!(!ctx.has_ended());
    }

    #[test]
    fn qualified_params() {
        let mut ctx = TokenContext::new();
        let key = TokenContext::qualified_param_name("Approve", "In", "amount");
        assert_eq!(key, "Approve.In.amount");
        ctx.set_param(key.clone(), Value::float(99.5));
        assert_eq!(ctx.param(&key).unwrap().as_f64(), Some(99.5));
    }

    #[test]
    fn clear_node_params_is_scoped() {
        let mut ctx = TokenContext::new();
        ctx.set_param("Approve.In.amount", Value::int(1));
        ctx.set_param("Approve.Out.result", Value::int(2));
        ctx.set_param("Ship.In.amount", Value::int(3));
        ctx.clear_node_params("Approve");
        assert!(ctx.param("Approve.In.amount").is_none());
        assert!(ctx.param("Approve.Out.result").is_none());
        assert!(ctx.param("Ship.In.amount").is_some());
    }

    #[test]
    fn call_stack_depth() {
        let mut ctx = TokenContext::new();
        ctx.push_frame(CallStackFrame::new(ModelQualifier::socket(
            "Shop", "Order", "Call", "Out",
        )));
        assert_eq!(ctx.call_depth(), 1);
        let frame = ctx.pop_frame().unwrap();
        assert_eq!(frame.return_position.node, "Call");
        assert_eq!(ctx.call_depth(), 0);
    }

    #[test]
    fn claimed_states() {
        assert!(LifecycleState::Selected.is_claimed());
        assert!(LifecycleState::Running.is_claimed());
        assert!(!LifecycleState::Suspended.is_claimed());
        assert!(!LifecycleState::Completed.is_claimed());
    }

    #[test]
    fn stop_request() {
        let mut ctx = TokenContext::new();
        ctx.request_stop();
        assert_eq!(ctx.lifecycle_request, LifecycleRequest::Stop);
    }
}
