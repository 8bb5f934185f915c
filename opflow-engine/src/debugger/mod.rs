//! The debugger: client registration, breakpoint evaluation, the halt
//! handshake, and remote inspection.
//!
//! The engine calls [`Debugger::socket_reached`] at every socket transition
//! before invoking any handler. When the token's client decides to halt,
//! the worker blocks receiving on a per-halt resume channel; the command
//! path (driven by a remote inspector over any transport) resolves the halt
//! and releases the worker. Closing the channel — client unregistration or
//! process kill — wakes the worker with a cancellation, so no worker thread
//! is ever leaked blocked.
//!
//! When a second token halts while the first is still halted under the same
//! client, the new halt queues behind the active one; resolving the active
//! halt promotes the next in FIFO order.

mod client;
mod halt;
mod inspect;

pub use client::{
    Breakpoint, BreakpointState, DebuggerClient, DebuggerMode, StepKind, StepMode, SYSTEM_MODEL,
};
pub use halt::{EngineEvent, HaltCause, HaltInfo, HaltResolution};
pub use inspect::{Describable, ObjectMemberInfo, MEMBER_DISPLAY_CAP, VALUE_RENDER_CAP};

use opflow_core::error::{OpflowError, Result};
use opflow_core::expr::{Evaluator, GetFlags};
use opflow_core::logging::{LogCategory, LogCollector, LogEvent, NullCollector};
use opflow_core::model::ModelQualifier;
use opflow_core::token::{CallStackFrame, TokenContext};
use opflow_core::types::{ClientId, TokenId};
use opflow_core::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A control command issued by a debugger client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerCommand {
    /// Abort token execution with a cancellation; does not resume.
    Stop,
    /// Resume unconditionally until the next breakpoint or process end.
    Run,
    /// Resume until the very next socket, regardless of call depth.
    StepNext,
    /// Resume until the next socket, entering subprocess calls.
    StepInto,
    /// Resume, skipping over subprocess calls.
    StepOver,
    /// Resume until the call stack returns to the caller.
    StepOut,
    /// Install a temporary breakpoint at the position and run.
    StepUntil(ModelQualifier),
}

/// The debugger service.
pub struct Debugger {
    clients: Mutex<HashMap<ClientId, DebuggerClient>>,
    collector: Arc<dyn LogCollector>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debugger {
    /// Create a debugger without a log collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            collector: Arc::new(NullCollector),
        }
    }

    /// Attach a log collector.
    #[must_use]
    pub fn with_collector(mut self, collector: Arc<dyn LogCollector>) -> Self {
        self.collector = collector;
        self
    }

    fn protocol_error(client: &ClientId, cause: impl Into<String>) -> OpflowError {
        OpflowError::DebuggerProtocol {
            client: client.to_string(),
            cause: cause.into(),
        }
    }

    // =========================================================================
    // Client registration
    // =========================================================================

    /// Register a client. Rejects an already-registered id.
    ///
    /// An idle client auto-expires after `timeout_secs` seconds of
    /// inactivity; `0` disables expiry.
    pub fn register_client(&self, id: ClientId, timeout_secs: u64) -> Result<()> {
        let mut clients = self.clients.lock();
        if clients.contains_key(&id) {
            return Err(Self::protocol_error(&id, "client already registered"));
        }
        clients.insert(id.clone(), DebuggerClient::new(id.clone(), timeout_secs));

        self.collector.collect(
            LogEvent::info(LogCategory::Debugger, "Client registered").with_client_id(id.clone()),
        );
        tracing::info!(client_id = %id, timeout_secs, "Debugger client registered");
        Ok(())
    }

    /// Unregister a client, releasing every worker halted on its behalf
    /// with a cancellation.
    pub fn unregister_client(&self, id: &ClientId) -> Result<()> {
        let mut client = {
            let mut clients = self.clients.lock();
            clients
                .remove(id)
                .ok_or_else(|| Self::protocol_error(id, "client not registered"))?
        };
        let released = client.halts.len();
        while let Some(halt) = client.halts.pop_front() {
            halt.resolve(HaltResolution::Stop);
        }

        self.collector.collect(
            LogEvent::info(LogCategory::Debugger, "Client unregistered")
                .with_client_id(id.clone())
                .with_field("released_halts", released.to_string()),
        );
        tracing::info!(client_id = %id, released, "Debugger client unregistered");
        Ok(())
    }

    /// Unregister every client.
    pub fn unregister_all_clients(&self) {
        let ids: Vec<ClientId> = self.clients.lock().keys().cloned().collect();
        for id in ids {
            let _ = self.unregister_client(&id);
        }
    }

    /// Remove clients idle past their timeout; returns the count removed.
    pub fn expire_idle_clients(&self) -> usize {
        let expired: Vec<ClientId> = self
            .clients
            .lock()
            .values()
            .filter(|c| c.is_expired())
            .map(|c| c.id.clone())
            .collect();
        for id in &expired {
            tracing::warn!(client_id = %id, "Expiring idle debugger client");
            let _ = self.unregister_client(id);
        }
        expired.len()
    }

    /// Whether a client is registered.
    #[must_use]
    pub fn has_client(&self, id: &ClientId) -> bool {
        self.clients.lock().contains_key(id)
    }

    /// Number of registered clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Set the mode flags of a client.
    pub fn set_mode(&self, id: &ClientId, mode: DebuggerMode) -> Result<()> {
        self.with_client(id, |client| {
            client.mode = mode;
            Ok(())
        })
    }

    fn with_client<T>(
        &self,
        id: &ClientId,
        f: impl FnOnce(&mut DebuggerClient) -> Result<T>,
    ) -> Result<T> {
        let mut clients = self.clients.lock();
        let client = clients
            .get_mut(id)
            .ok_or_else(|| Self::protocol_error(id, "client not registered"))?;
        client.touch();
        f(client)
    }

    // =========================================================================
    // Breakpoint management
    // =========================================================================

    /// Install or replace a breakpoint.
    pub fn set_breakpoint(
        &self,
        id: &ClientId,
        qualifier: ModelQualifier,
        state: BreakpointState,
    ) -> Result<()> {
        self.with_client(id, |client| {
            client.set_breakpoint(qualifier, state);
            Ok(())
        })
    }

    /// Remove a breakpoint.
    pub fn clear_breakpoint(&self, id: &ClientId, qualifier: &ModelQualifier) -> Result<()> {
        self.with_client(id, |client| {
            client.clear_breakpoint(qualifier);
            Ok(())
        })
    }

    /// Update the state of all breakpoints of one process, or of the whole
    /// client when `process` is `None`.
    pub fn update_breakpoints(
        &self,
        id: &ClientId,
        process: Option<&str>,
        state: BreakpointState,
    ) -> Result<()> {
        self.with_client(id, |client| {
            client.update_breakpoints(process, state);
            Ok(())
        })
    }

    /// Remove all breakpoints of one process, or of the whole client when
    /// `process` is `None`.
    pub fn clear_breakpoints(&self, id: &ClientId, process: Option<&str>) -> Result<()> {
        self.with_client(id, |client| {
            client.clear_breakpoints(process);
            Ok(())
        })
    }

    /// All breakpoints of a client.
    pub fn breakpoints(&self, id: &ClientId) -> Result<Vec<Breakpoint>> {
        self.with_client(id, |client| Ok(client.breakpoints()))
    }

    // =========================================================================
    // Engine hook
    // =========================================================================

    /// Evaluate a socket transition for the token's client and block until
    /// the client resumes the token when a halt matches.
    ///
    /// Returns `Err(StoppedByDebugger)` when the halt is resolved with a
    /// stop, or when the client goes away while the worker is blocked.
    pub async fn socket_reached(
        &self,
        token: &TokenContext,
        position: &ModelQualifier,
        event: EngineEvent,
    ) -> Result<()> {
        let Some(client_id) = token.debugger_id.clone() else {
            return Ok(());
        };

        let rx = {
            let mut clients = self.clients.lock();
            let Some(client) = clients.get_mut(&client_id) else {
                return Ok(());
            };
            let Some(cause) = client.should_halt(token.call_depth(), position, &event) else {
                return Ok(());
            };
            // The completed step consumed the pending mode.
            client.step_mode = None;
            let (halt, rx) = HaltInfo::new(position.clone(), cause, token);
            client.halts.push_back(halt);
            rx
        };

        self.collector.collect(
            LogEvent::info(LogCategory::Debugger, "Token halted")
                .with_token_id(token.id)
                .with_client_id(client_id.clone())
                .with_field("position", position.to_string()),
        );
        tracing::debug!(token_id = %token.id, client_id = %client_id, position = %position, "Token halted");

        match rx.await {
            Ok(HaltResolution::Resume) => Ok(()),
            Ok(HaltResolution::Stop) | Err(_) => {
                Err(OpflowError::StoppedByDebugger { token: token.id })
            }
        }
    }

    /// Release every halt held for a token with a cancellation.
    ///
    /// Used when a halted process is killed: the blocked worker is released
    /// immediately instead of waiting for its next checkpoint.
    pub fn stop_halts_for_token(&self, token: TokenId) {
        let mut clients = self.clients.lock();
        for client in clients.values_mut() {
            let mut kept = std::collections::VecDeque::new();
            while let Some(halt) = client.halts.pop_front() {
                if halt.token_id == token {
                    halt.resolve(HaltResolution::Stop);
                } else {
                    kept.push_back(halt);
                }
            }
            client.halts = kept;
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Resolve the active halt of a client with a command.
    ///
    /// The active halt is the queue head; resolving it promotes the next
    /// queued halt. Step modes are installed under the client lock before
    /// the worker is released, so the worker cannot race past the mode.
    pub fn command(&self, id: &ClientId, command: DebuggerCommand) -> Result<()> {
        let halt = self.with_client(id, |client| {
            let halt = client
                .halts
                .pop_front()
                .ok_or_else(|| Self::protocol_error(id, "client has no active halt"))?;

            client.step_mode = match &command {
                DebuggerCommand::StepNext => Some(StepMode {
                    kind: StepKind::Next,
                    saved_depth: halt.call_depth,
                }),
                DebuggerCommand::StepInto => Some(StepMode {
                    kind: StepKind::Into,
                    saved_depth: halt.call_depth,
                }),
                DebuggerCommand::StepOver => Some(StepMode {
                    kind: StepKind::Over,
                    saved_depth: halt.call_depth,
                }),
                DebuggerCommand::StepOut => Some(StepMode {
                    kind: StepKind::Out,
                    saved_depth: halt.call_depth,
                }),
                DebuggerCommand::Stop | DebuggerCommand::Run | DebuggerCommand::StepUntil(_) => {
                    None
                }
            };
            if let DebuggerCommand::StepUntil(position) = &command {
                client.set_breakpoint(position.clone(), BreakpointState::TEMPORARY);
            }
            Ok(halt)
        })?;

        tracing::debug!(client_id = %id, token_id = %halt.token_id, ?command, "Debugger command");

        match command {
            DebuggerCommand::Stop => halt.resolve(HaltResolution::Stop),
            _ => halt.resolve(HaltResolution::Resume),
        }
        Ok(())
    }

    /// Abort the halted token.
    pub fn stop(&self, id: &ClientId) -> Result<()> {
        self.command(id, DebuggerCommand::Stop)
    }

    /// Resume until the next breakpoint or process end.
    pub fn run(&self, id: &ClientId) -> Result<()> {
        self.command(id, DebuggerCommand::Run)
    }

    /// Resume until the very next socket.
    pub fn step_next(&self, id: &ClientId) -> Result<()> {
        self.command(id, DebuggerCommand::StepNext)
    }

    /// Resume until the next socket, entering subprocess calls.
    pub fn step_into(&self, id: &ClientId) -> Result<()> {
        self.command(id, DebuggerCommand::StepInto)
    }

    /// Resume, skipping over subprocess calls.
    pub fn step_over(&self, id: &ClientId) -> Result<()> {
        self.command(id, DebuggerCommand::StepOver)
    }

    /// Resume until the call stack returns to the caller.
    pub fn step_out(&self, id: &ClientId) -> Result<()> {
        self.command(id, DebuggerCommand::StepOut)
    }

    /// Install a temporary breakpoint at the position and run.
    pub fn step_until(&self, id: &ClientId, position: ModelQualifier) -> Result<()> {
        self.command(id, DebuggerCommand::StepUntil(position))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Whether a client currently has an active halt.
    #[must_use]
    pub fn is_halted(&self, id: &ClientId) -> bool {
        self.clients
            .lock()
            .get(id)
            .is_some_and(|c| c.active_halt().is_some())
    }

    /// Position of the active halt, if any.
    #[must_use]
    pub fn active_halt_position(&self, id: &ClientId) -> Option<ModelQualifier> {
        self.clients
            .lock()
            .get(id)
            .and_then(|c| c.active_halt())
            .map(|h| h.position.clone())
    }

    /// Token of the active halt, if any.
    #[must_use]
    pub fn halted_token(&self, id: &ClientId) -> Option<TokenId> {
        self.clients
            .lock()
            .get(id)
            .and_then(|c| c.active_halt())
            .map(|h| h.token_id)
    }

    fn with_active_halt<T>(
        &self,
        id: &ClientId,
        f: impl FnOnce(&HaltInfo) -> Result<T>,
    ) -> Result<T> {
        let mut clients = self.clients.lock();
        let client = clients
            .get_mut(id)
            .ok_or_else(|| Self::protocol_error(id, "client not registered"))?;
        client.touch();
        let halt = client
            .active_halt()
            .ok_or_else(|| Self::protocol_error(id, "client has no active halt"))?;
        f(halt)
    }

    /// Resolve a value against the active halt's token via the expression
    /// evaluator.
    pub fn get_object_value(&self, id: &ClientId, expression: &str) -> Result<Value> {
        self.with_active_halt(id, |halt| {
            Evaluator::new().get(&halt.snapshot, expression, GetFlags::OBJECT_MUST_EXIST)
        })
    }

    /// Enumerate the members of a value rooted at the active halt's token.
    ///
    /// With no expression the token itself is described (its bound
    /// parameters, sorted). `skip_defaults` omits null/default-valued
    /// members.
    pub fn get_object_members(
        &self,
        id: &ClientId,
        expression: Option<&str>,
        skip_defaults: bool,
    ) -> Result<Vec<ObjectMemberInfo>> {
        self.with_active_halt(id, |halt| match expression {
            None | Some("") => Ok(halt.snapshot.describe_members(skip_defaults)),
            Some(expr) => {
                let value =
                    Evaluator::new().get(&halt.snapshot, expr, GetFlags::OBJECT_MUST_EXIST)?;
                Ok(value.describe_members(skip_defaults))
            }
        })
    }

    /// Ordered caller frames of the active halt.
    pub fn get_call_stack_elements(&self, id: &ClientId) -> Result<Vec<CallStackFrame>> {
        self.with_active_halt(id, |halt| Ok(halt.snapshot.call_stack.clone()))
    }
}
