//! Per-client debugger state: mode flags, breakpoints, step modes, and the
//! halt queue.

use super::halt::{EngineEvent, HaltCause, HaltInfo};
use bitflags::bitflags;
use opflow_core::model::ModelQualifier;
use opflow_core::types::ClientId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Name of the model whose positions are skipped under
/// [`DebuggerMode::SKIP_SYSTEM_MODEL`].
pub const SYSTEM_MODEL: &str = "System";

bitflags! {
    /// Debugger mode flags of a client.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebuggerMode: u32 {
        /// Never halt at positions inside the system model.
        const SKIP_SYSTEM_MODEL = 1 << 0;
        /// Halt when an exception is in flight.
        const BREAK_ON_EXCEPTION = 1 << 1;
        /// Halt at the first socket of a top-level process.
        const BREAK_ON_TOP_LEVEL = 1 << 2;
        /// Halt at workflow nodes.
        const BREAK_ON_WORKFLOW = 1 << 3;
    }
}

bitflags! {
    /// State bits of a breakpoint.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BreakpointState: u32 {
        /// The breakpoint is present but never matches.
        const DISABLED = 1 << 0;
        /// The breakpoint applies to every token, not only attached ones.
        const GLOBAL = 1 << 1;
        /// The breakpoint is consumed after its first hit (step-until).
        const TEMPORARY = 1 << 2;
    }
}

/// An immutable position plus a mutable state bitmask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// The position the breakpoint matches.
    pub qualifier: ModelQualifier,
    /// State bits.
    pub state: BreakpointState,
}

impl Breakpoint {
    /// Create a breakpoint with the given state.
    #[must_use]
    pub fn new(qualifier: ModelQualifier, state: BreakpointState) -> Self {
        Self { qualifier, state }
    }

    /// Whether the breakpoint currently matches hits.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.state.contains(BreakpointState::DISABLED)
    }
}

/// The kind of a pending step command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Halt at the very next socket, regardless of call depth.
    Next,
    /// Halt at the next socket; a socket beginning a subprocess call is
    /// passed through so the halt lands on the callee's first socket.
    Into,
    /// Halt only at sockets whose call depth is at most the saved depth.
    Over,
    /// Halt once the call depth drops below the saved depth.
    Out,
}

/// A pending step command with the call depth saved when it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepMode {
    /// The step kind.
    pub kind: StepKind,
    /// Call depth of the halt the command was issued from.
    pub saved_depth: usize,
}

/// State of one registered debugger client.
#[derive(Debug)]
pub struct DebuggerClient {
    /// The client id.
    pub id: ClientId,
    /// Idle seconds before auto-unregistration; `0` disables expiry.
    pub timeout_secs: u64,
    /// Mode flags.
    pub mode: DebuggerMode,
    /// Pending step command, if any.
    pub step_mode: Option<StepMode>,
    /// Halted tokens, oldest first; the head is the active halt.
    pub halts: VecDeque<HaltInfo>,
    breakpoints: HashMap<ModelQualifier, Breakpoint>,
    last_activity: Instant,
}

impl DebuggerClient {
    /// Create a client with the given idle timeout.
    #[must_use]
    pub fn new(id: ClientId, timeout_secs: u64) -> Self {
        Self {
            id,
            timeout_secs,
            mode: DebuggerMode::default(),
            step_mode: None,
            halts: VecDeque::new(),
            breakpoints: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    /// Record client activity, postponing expiry.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Whether the client has been idle past its timeout.
    ///
    /// A client with halted tokens never expires; someone is attached to it.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.timeout_secs > 0
            && self.halts.is_empty()
            && self.last_activity.elapsed() >= Duration::from_secs(self.timeout_secs)
    }

    /// Install or replace a breakpoint.
    pub fn set_breakpoint(&mut self, qualifier: ModelQualifier, state: BreakpointState) {
        self.breakpoints
            .insert(qualifier.clone(), Breakpoint::new(qualifier, state));
    }

    /// Remove a breakpoint.
    pub fn clear_breakpoint(&mut self, qualifier: &ModelQualifier) {
        self.breakpoints.remove(qualifier);
    }

    /// Update the state of all breakpoints of one process, or of the whole
    /// client when `process` is `None`.
    pub fn update_breakpoints(&mut self, process: Option<&str>, state: BreakpointState) {
        for bp in self.breakpoints.values_mut() {
            if process.is_none_or(|p| bp.qualifier.process == p) {
                bp.state = state;
            }
        }
    }

    /// Remove all breakpoints of one process, or all breakpoints of the
    /// client when `process` is `None`.
    pub fn clear_breakpoints(&mut self, process: Option<&str>) {
        match process {
            Some(p) => self.breakpoints.retain(|q, _| q.process != p),
            None => self.breakpoints.clear(),
        }
    }

    /// All breakpoints of the client.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().cloned().collect()
    }

    /// Find an active breakpoint matching a position and consume it when
    /// temporary.
    fn take_breakpoint_hit(&mut self, position: &ModelQualifier) -> bool {
        let hit = self
            .breakpoints
            .values()
            .find(|bp| bp.is_active() && bp.qualifier.matches(position))
            .map(|bp| (bp.qualifier.clone(), bp.state));
        match hit {
            Some((qualifier, state)) => {
                if state.contains(BreakpointState::TEMPORARY) {
                    self.breakpoints.remove(&qualifier);
                }
                true
            }
            None => false,
        }
    }

    /// Decide whether an engine event halts this client's token.
    ///
    /// Order: pending step command, then breakpoints, then mode flags.
    /// Temporary breakpoints are consumed by the decision.
    pub fn should_halt(
        &mut self,
        call_depth: usize,
        position: &ModelQualifier,
        event: &EngineEvent,
    ) -> Option<HaltCause> {
        if self.mode.contains(DebuggerMode::SKIP_SYSTEM_MODEL) && position.model == SYSTEM_MODEL {
            return None;
        }

        if let EngineEvent::Exception(message) = event {
            if self.mode.contains(DebuggerMode::BREAK_ON_EXCEPTION) {
                return Some(HaltCause::Exception(message.clone()));
            }
            return None;
        }

        if let Some(step) = self.step_mode {
            let enters_subprocess = matches!(
                event,
                EngineEvent::Socket {
                    enters_subprocess: true
                }
            );
            let hit = match step.kind {
                StepKind::Next => true,
                StepKind::Into => !enters_subprocess,
                StepKind::Over => call_depth <= step.saved_depth,
                StepKind::Out => call_depth < step.saved_depth,
            };
            if hit {
                return Some(HaltCause::Step);
            }
        }

        if self.take_breakpoint_hit(position) {
            return Some(HaltCause::Breakpoint);
        }

        match event {
            EngineEvent::TopLevel if self.mode.contains(DebuggerMode::BREAK_ON_TOP_LEVEL) => {
                Some(HaltCause::TopLevel)
            }
            EngineEvent::Workflow if self.mode.contains(DebuggerMode::BREAK_ON_WORKFLOW) => {
                Some(HaltCause::Workflow)
            }
            _ => None,
        }
    }

    /// The currently active halt, if any.
    #[must_use]
    pub fn active_halt(&self) -> Option<&HaltInfo> {
        self.halts.front()
    }
}
