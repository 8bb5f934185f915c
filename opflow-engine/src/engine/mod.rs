//! The engine: controlled state transitions of token contexts.
//!
//! The engine performs exactly one kind of work: advancing a claimed token
//! socket-by-socket through its process graph. Everything around it is a
//! collaborator: the model registry resolves references, the token store
//! persists position changes, the debugger is notified at every socket
//! transition before any handler runs, and workflow suspension goes through
//! the task store.

use crate::debugger::{Debugger, EngineEvent};
use crate::store::{TaskStatus, TokenStore, WorkflowTask, WorkflowTaskStore};
use opflow_core::error::{OpflowError, Result};
use opflow_core::logging::{LogCategory, LogCollector, LogEvent, NullCollector};
use opflow_core::model::{
    HandlerContext, ModelQualifier, ModelRegistry, NodeDefinition, NodeKind, ProcessVisibility,
    SocketDefinition, SocketRef,
};
use opflow_core::token::{
    CallStackFrame, LifecycleRequest, LifecycleState, TokenContext,
};
use opflow_core::types::{TaskId, TokenId};
use opflow_core::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The state-transition core.
pub struct Engine {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn TokenStore>,
    tasks: Arc<dyn WorkflowTaskStore>,
    debugger: Option<Arc<Debugger>>,
    collector: Arc<dyn LogCollector>,
}

impl Engine {
    /// Create an engine over a model registry and stores.
    #[must_use]
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn TokenStore>,
        tasks: Arc<dyn WorkflowTaskStore>,
    ) -> Self {
        Self {
            registry,
            store,
            tasks,
            debugger: None,
            collector: Arc::new(NullCollector),
        }
    }

    /// Attach a debugger notified at every socket transition.
    #[must_use]
    pub fn with_debugger(mut self, debugger: Arc<Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    /// Attach a log collector.
    #[must_use]
    pub fn with_collector(mut self, collector: Arc<dyn LogCollector>) -> Self {
        self.collector = collector;
        self
    }

    /// The token store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// The workflow task store.
    #[must_use]
    pub fn tasks(&self) -> &Arc<dyn WorkflowTaskStore> {
        &self.tasks
    }

    /// The model registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// The attached debugger, if any.
    #[must_use]
    pub fn debugger(&self) -> Option<&Arc<Debugger>> {
        self.debugger.as_ref()
    }

    // =========================================================================
    // Reference resolution
    // =========================================================================

    /// Resolve a textual socket reference.
    ///
    /// Accepts `"/Model/Process.Node"` (absolute, optionally with a
    /// socket), `".SocketName"` (socket on the current node), or a bare
    /// socket name relative to `current`. Returns `None` when nothing
    /// resolves and `must_exist` is false; raises `ModelReference`
    /// otherwise.
    pub fn resolve_socket_ref(
        &self,
        reference: &str,
        current: Option<&ModelQualifier>,
        must_exist: bool,
    ) -> Result<Option<ModelQualifier>> {
        let parsed = SocketRef::parse(reference)?;

        let resolved = match parsed {
            SocketRef::Absolute(q) => match self.registry.node(&q) {
                Ok((_, node)) => {
                    let socket = match &q.socket {
                        Some(name) => node
                            .entry_socket(name)
                            .or_else(|| node.exit_socket(name))
                            .map(|s| s.name.clone()),
                        None => node.default_entry_socket().map(|s| s.name.clone()),
                    };
                    socket.map(|s| ModelQualifier::socket(&q.model, &q.process, &q.node, s))
                }
                Err(_) => None,
            },
            SocketRef::CurrentNode(name) | SocketRef::Relative(name) => match current {
                Some(cur) => {
                    let (_, node) = self.registry.node(&cur.node_qualifier())?;
                    node.exit_socket(&name)
                        .or_else(|| node.entry_socket(&name))
                        .map(|s| cur.with_socket(s.name.clone()))
                }
                None => None,
            },
        };

        match resolved {
            Some(q) => Ok(Some(q)),
            None if must_exist => Err(OpflowError::ModelReference {
                reference: reference.to_string(),
                cause: "reference does not resolve to a socket".to_string(),
            }),
            None => Ok(None),
        }
    }

    /// Resolve an absolute start reference and position a fresh token at
    /// it, enforcing the initial node's start scope.
    pub fn set_initial_position(&self, token: &mut TokenContext, reference: &str) -> Result<()> {
        let position = self
            .resolve_socket_ref(reference, None, true)?
            .expect("must_exist resolution returned a position");
        let (_, node) = self.registry.node(&position.node_qualifier())?;
        match node.kind {
            NodeKind::Initial {
                visibility: ProcessVisibility::Public,
            } => {}
            NodeKind::Initial {
                visibility: ProcessVisibility::Private,
            } => {
                return Err(OpflowError::StartScope {
                    reference: reference.to_string(),
                    cause: "initial node is private to subprocess calls".to_string(),
                });
            }
            _ => {
                return Err(OpflowError::StartScope {
                    reference: reference.to_string(),
                    cause: "not an initial node".to_string(),
                });
            }
        }
        token.set_initial_position(position);
        Ok(())
    }

    // =========================================================================
    // Start / resume / end
    // =========================================================================

    /// Bind input parameters and mark a created token for scheduling.
    ///
    /// Requires the position to have been set by the facade. Binding errors
    /// are surfaced synchronously and leave the token untouched.
    pub fn start_token(
        &self,
        token: &mut TokenContext,
        params: &HashMap<String, Value>,
    ) -> Result<()> {
        if token.lifecycle_state != LifecycleState::Created {
            return Err(OpflowError::InvalidLifecycleState {
                token: token.id,
                state: token.lifecycle_state.as_str().to_string(),
                expected: LifecycleState::Created.as_str().to_string(),
            });
        }
        let position = token
            .current_socket
            .clone()
            .ok_or(OpflowError::NoCurrentPosition { token: token.id })?;

        self.bind_parameters(token, &position, params)?;
        token.lifecycle_state = LifecycleState::Selected;
        token.lifecycle_request = LifecycleRequest::Resume;
        token.owner = None;

        self.collector.collect(
            LogEvent::info(LogCategory::Token, "Token started")
                .with_token_id(token.id)
                .with_process(position.process.clone())
                .with_field("position", position.to_string()),
        );
        tracing::info!(token_id = %token.id, position = %position, "Token started");
        Ok(())
    }

    /// Reposition a suspended token and mark it for scheduling.
    pub fn resume_token(
        &self,
        token: &mut TokenContext,
        reference: &str,
        params: &HashMap<String, Value>,
    ) -> Result<()> {
        if token.lifecycle_state != LifecycleState::Suspended {
            return Err(OpflowError::InvalidLifecycleState {
                token: token.id,
                state: token.lifecycle_state.as_str().to_string(),
                expected: LifecycleState::Suspended.as_str().to_string(),
            });
        }
        let position = self
            .resolve_socket_ref(reference, token.current_socket.as_ref(), true)?
            .expect("must_exist resolution returned a position");

        self.bind_parameters(token, &position, params)?;
        token.set_resumption_position(position.clone());
        token.lifecycle_state = LifecycleState::Selected;
        token.lifecycle_request = LifecycleRequest::Resume;
        token.owner = None;

        tracing::info!(token_id = %token.id, position = %position, "Token resumed");
        Ok(())
    }

    /// End a token.
    ///
    /// A claimed token is asked to stop cooperatively (any halted worker is
    /// released immediately); an idle token is deleted together with its
    /// child contexts, completing associated workflow tasks.
    pub fn end_token(&self, id: TokenId) -> Result<()> {
        let mut token = self.store.get(id)?;
        if token.lifecycle_state.is_claimed() {
            token.request_stop();
            self.store.update(&token)?;
            if let Some(debugger) = &self.debugger {
                debugger.stop_halts_for_token(id);
            }
            tracing::info!(token_id = %id, "Stop requested for executing token");
            return Ok(());
        }

        for child in self.store.find_children(id) {
            self.store.delete(child.id)?;
        }
        self.complete_tasks(id)?;
        self.store.delete(id)?;

        self.collector
            .collect(LogEvent::info(LogCategory::Token, "Token ended").with_token_id(id));
        tracing::info!(token_id = %id, "Token ended");
        Ok(())
    }

    /// Resume a suspended workflow task.
    ///
    /// Resolves the resumption socket from the task's position, optionally
    /// assigns the task (recording the acceptance time), and marks the
    /// token for scheduling. Task and token are persisted together.
    pub fn resume_workflow(
        &self,
        task_id: TaskId,
        resumption_ref: &str,
        user: Option<&str>,
    ) -> Result<()> {
        let mut task = self.tasks.get(task_id)?;
        let mut token = self.store.get(task.token)?;

        let position = self
            .resolve_socket_ref(resumption_ref, Some(&task.position), true)?
            .expect("must_exist resolution returned a position");

        if let Some(user) = user {
            task.accept(user);
        }
        token.set_resumption_position(position.clone());
        token.lifecycle_request = LifecycleRequest::Resume;

        self.store.update(&token)?;
        self.tasks.update(&task)?;

        self.collector.collect(
            LogEvent::info(LogCategory::Token, "Workflow resumed")
                .with_token_id(token.id)
                .with_field("task", task.id.to_string())
                .with_field("position", position.to_string()),
        );
        tracing::info!(token_id = %token.id, task_id = %task.id, position = %position, "Workflow resumed");
        Ok(())
    }

    /// Commit the position/parameter mutations of a working copy, making
    /// the token visible to the scheduler.
    pub fn commit_token_context_transaction(&self, token: &TokenContext) -> Result<()> {
        match self.store.get(token.id) {
            Ok(_) => self.store.update(token),
            Err(OpflowError::TokenNotFound { .. }) => self.store.create(token.clone()),
            Err(e) => Err(e),
        }
    }

    /// Discard a working copy and return the stored state, if any.
    pub fn rollback_token_context_transaction(&self, id: TokenId) -> Result<Option<TokenContext>> {
        match self.store.get(id) {
            Ok(token) => Ok(Some(token)),
            Err(OpflowError::TokenNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Parameter binding
    // =========================================================================

    /// Bind supplied parameter values against the declared parameters of a
    /// socket.
    ///
    /// Simple types are parsed from strings via the type's converter;
    /// complex types require the supplied value to be assignable. All
    /// bindings are staged and applied only when every one validates.
    fn bind_parameters(
        &self,
        token: &mut TokenContext,
        position: &ModelQualifier,
        params: &HashMap<String, Value>,
    ) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }
        let (_, node) = self.registry.node(&position.node_qualifier())?;
        let socket_name = position
            .socket
            .clone()
            .or_else(|| node.default_entry_socket().map(|s| s.name.clone()))
            .ok_or_else(|| OpflowError::ModelReference {
                reference: position.to_string(),
                cause: "node has no entry socket".to_string(),
            })?;
        let socket = node
            .entry_socket(&socket_name)
            .or_else(|| node.exit_socket(&socket_name))
            .ok_or_else(|| OpflowError::ModelReference {
                reference: position.to_string(),
                cause: "no such socket".to_string(),
            })?;

        let mut staged: Vec<(String, Value)> = Vec::new();
        for param_def in &socket.params {
            let Some(supplied) = params.get(&param_def.name) else {
                continue;
            };
            let qualified =
                TokenContext::qualified_param_name(&node.name, &socket.name, &param_def.name);
            let data_type = self.registry.types().get(&param_def.type_name).ok_or_else(|| {
                OpflowError::ModelReference {
                    reference: param_def.type_name.clone(),
                    cause: "unknown data type".to_string(),
                }
            })?;

            let bound = match data_type {
                opflow_core::model::DataType::Simple(kind) => {
                    if let Some(text) = supplied.as_str() {
                        kind.convert_from_str(&qualified, text)?
                    } else if kind.accepts(supplied) {
                        supplied.clone()
                    } else {
                        return Err(OpflowError::ParameterValidation {
                            param: qualified,
                            expected: kind.name().to_string(),
                            cause: format!("value of type {} is not convertible", supplied.type_name()),
                        });
                    }
                }
                opflow_core::model::DataType::Complex(complex) => {
                    if !complex.is_assignable(supplied) {
                        return Err(OpflowError::IncorrectParameterType {
                            param: qualified,
                            expected: complex.name.clone(),
                            actual: supplied.type_name(),
                        });
                    }
                    supplied.clone()
                }
            };
            staged.push((qualified, bound));
        }

        for (name, _) in params {
            if socket.param(name).is_none() {
                tracing::warn!(param = %name, socket = %socket.name, "Ignoring undeclared parameter");
            }
        }
        for (qualified, value) in staged {
            token.set_param(qualified, value);
        }
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute a claimed token until it suspends, completes, or is stopped.
    ///
    /// Any error raised mid-execution parks the context (suspended, no
    /// pending request) before propagating, so a context is never left
    /// claimed. A debugger stop ends the token in a terminal state.
    pub async fn execute_token(&self, id: TokenId) -> Result<()> {
        let mut token = self.store.get(id)?;
        if token.lifecycle_state != LifecycleState::Selected {
            return Err(OpflowError::InvalidLifecycleState {
                token: id,
                state: token.lifecycle_state.as_str().to_string(),
                expected: LifecycleState::Selected.as_str().to_string(),
            });
        }
        token.lifecycle_state = LifecycleState::Running;
        if token.lifecycle_request == LifecycleRequest::Resume {
            token.lifecycle_request = LifecycleRequest::None;
        }
        self.store.update(&token)?;

        match self.run_steps(&mut token).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancellation() => {
                self.finish_token(&mut token)?;
                Err(e)
            }
            Err(e) => {
                token.lifecycle_state = LifecycleState::Suspended;
                token.lifecycle_request = LifecycleRequest::None;
                token.owner = None;
                self.store.update(&token)?;
                self.collector.collect(
                    LogEvent::error(LogCategory::Engine, "Token execution failed")
                        .with_token_id(token.id)
                        .with_field("error", e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// The socket-to-socket step loop.
    async fn run_steps(&self, token: &mut TokenContext) -> Result<()> {
        loop {
            if token.lifecycle_request == LifecycleRequest::Stop {
                tracing::info!(token_id = %token.id, "Honoring stop request");
                self.finish_token(token)?;
                return Ok(());
            }
            let Some(position) = token.current_socket.clone() else {
                self.finish_token(token)?;
                return Ok(());
            };

            let (_, node) = self.registry.node(&position.node_qualifier())?;
            let socket_name = position
                .socket
                .clone()
                .or_else(|| node.default_entry_socket().map(|s| s.name.clone()))
                .ok_or_else(|| OpflowError::ModelReference {
                    reference: position.to_string(),
                    cause: "node has no sockets".to_string(),
                })?;

            if node.entry_socket(&socket_name).is_some() {
                self.step_entry(token, &position, node, &socket_name).await?;
            } else if let Some(exit) = node.exit_socket(&socket_name) {
                self.step_exit(token, &position, node, exit).await?;
            } else {
                return Err(OpflowError::ModelReference {
                    reference: position.to_string(),
                    cause: "no such socket".to_string(),
                });
            }

            // Suspension and completion leave the running state.
            if token.lifecycle_state != LifecycleState::Running {
                return Ok(());
            }
        }
    }

    /// Advance the token standing at an entry socket.
    async fn step_entry(
        &self,
        token: &mut TokenContext,
        position: &ModelQualifier,
        node: &NodeDefinition,
        socket_name: &str,
    ) -> Result<()> {
        let event = match &node.kind {
            NodeKind::Workflow => EngineEvent::Workflow,
            NodeKind::SubprocessCall { .. } => EngineEvent::Socket {
                enters_subprocess: true,
            },
            NodeKind::Initial { .. } if token.call_depth() == 0 => EngineEvent::TopLevel,
            _ => EngineEvent::Socket {
                enters_subprocess: false,
            },
        };
        self.notify_debugger(token, position, event).await?;

        match &node.kind {
            NodeKind::SubprocessCall { target } => {
                let return_socket =
                    node.default_exit_socket()
                        .ok_or_else(|| OpflowError::ModelReference {
                            reference: position.to_string(),
                            cause: "call node has no exit socket".to_string(),
                        })?;
                token.push_frame(CallStackFrame::new(
                    position.with_socket(return_socket.name.clone()),
                ));
                let entry = self
                    .registry
                    .resolve_subprocess_entry(&position.model, target)?;
                token.executing_model = Some(entry.model.clone());
                token.current_socket = Some(entry);
                self.store.update(token)?;
            }
            NodeKind::Workflow => {
                let task = WorkflowTask::new(token.id, position.clone());
                let task_id = task.id;
                self.tasks.create(task)?;
                token.lifecycle_state = LifecycleState::Suspended;
                token.lifecycle_request = LifecycleRequest::None;
                token.owner = None;
                self.store.update(token)?;

                self.collector.collect(
                    LogEvent::info(LogCategory::Token, "Token suspended at workflow node")
                        .with_token_id(token.id)
                        .with_field("task", task_id.to_string())
                        .with_field("position", position.to_string()),
                );
                tracing::info!(token_id = %token.id, position = %position, "Token suspended at workflow node");
            }
            NodeKind::Final => match token.pop_frame() {
                Some(frame) => {
                    token.executing_model = Some(frame.return_position.model.clone());
                    token.current_socket = Some(frame.return_position);
                    self.store.update(token)?;
                }
                None => {
                    self.finish_token(token)?;
                }
            },
            NodeKind::Initial { .. } | NodeKind::Activity => {
                let exit_name = match &node.handler {
                    Some(key) => {
                        let handler = self.registry.handler(key)?;
                        let ctx = HandlerContext {
                            token: &mut *token,
                            node,
                            entry_socket: socket_name,
                        };
                        match handler.execute(ctx).await {
                            Ok(outcome) => outcome.exit_socket,
                            Err(e) => {
                                let message = e.to_string();
                                self.notify_debugger(
                                    token,
                                    position,
                                    EngineEvent::Exception(message.clone()),
                                )
                                .await?;
                                return Err(OpflowError::HandlerFailed {
                                    node: node.name.clone(),
                                    token: token.id,
                                    cause: message,
                                });
                            }
                        }
                    }
                    None => None,
                };
                let exit = match &exit_name {
                    Some(name) => {
                        node.exit_socket(name)
                            .ok_or_else(|| OpflowError::ModelReference {
                                reference: format!("{}.{}", node.name, name),
                                cause: "handler selected an unknown exit socket".to_string(),
                            })?
                    }
                    None => node
                        .default_exit_socket()
                        .ok_or_else(|| OpflowError::ModelReference {
                            reference: position.to_string(),
                            cause: "node has no exit socket".to_string(),
                        })?,
                };
                token.current_socket = Some(position.with_socket(exit.name.clone()));
                self.store.update(token)?;
            }
        }
        Ok(())
    }

    /// Advance the token standing at an exit socket by following its
    /// control link.
    async fn step_exit(
        &self,
        token: &mut TokenContext,
        position: &ModelQualifier,
        node: &NodeDefinition,
        exit: &SocketDefinition,
    ) -> Result<()> {
        self.notify_debugger(
            token,
            position,
            EngineEvent::Socket {
                enters_subprocess: false,
            },
        )
        .await?;

        let Some(link) = &exit.target else {
            // Unlinked exit socket: the process path ends here.
            self.finish_token(token)?;
            return Ok(());
        };

        let (_, target_node) = self.registry.node(&ModelQualifier::node(
            position.model.clone(),
            position.process.clone(),
            link.node.clone(),
        ))?;
        let target_socket =
            target_node
                .entry_socket(&link.socket)
                .ok_or_else(|| OpflowError::ModelReference {
                    reference: format!("{}.{}", link.node, link.socket),
                    cause: "control link targets an unknown entry socket".to_string(),
                })?;

        // Forward identically named parameters from the exit socket to the
        // target entry socket.
        for param_def in &target_socket.params {
            let from =
                TokenContext::qualified_param_name(&node.name, &exit.name, &param_def.name);
            if let Some(value) = token.param(&from).cloned() {
                let to = TokenContext::qualified_param_name(
                    &link.node,
                    &target_socket.name,
                    &param_def.name,
                );
                token.set_param(to, value);
            }
        }
        if link.node != node.name {
            token.clear_node_params(&node.name);
        }

        token.current_socket = Some(ModelQualifier::socket(
            position.model.clone(),
            position.process.clone(),
            link.node.clone(),
            target_socket.name.clone(),
        ));
        self.store.update(token)?;
        Ok(())
    }

    /// Mark a token terminally completed and resolve its workflow tasks.
    fn finish_token(&self, token: &mut TokenContext) -> Result<()> {
        token.lifecycle_state = LifecycleState::Completed;
        token.lifecycle_request = LifecycleRequest::None;
        token.owner = None;
        token.current_socket = None;
        self.store.update(token)?;
        self.complete_tasks(token.id)?;

        self.collector
            .collect(LogEvent::info(LogCategory::Token, "Token completed").with_token_id(token.id));
        tracing::info!(token_id = %token.id, "Token completed");
        Ok(())
    }

    fn complete_tasks(&self, token: TokenId) -> Result<()> {
        for mut task in self.tasks.find_by_token(token) {
            if task.status != TaskStatus::Completed {
                task.complete();
                self.tasks.update(&task)?;
            }
        }
        Ok(())
    }

    async fn notify_debugger(
        &self,
        token: &TokenContext,
        position: &ModelQualifier,
        event: EngineEvent,
    ) -> Result<()> {
        if let Some(debugger) = &self.debugger {
            if token.debugger_id.is_some() {
                debugger.socket_reached(token, position, event).await?;
            }
        }
        Ok(())
    }
}
