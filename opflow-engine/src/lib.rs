//! OPFLOW Engine Library
//!
//! The runtime half of the OPFLOW business-process engine:
//!
//! - **Engine**: single controlled state transitions of token contexts
//! - **Runner**: the scheduler that claims and dispatches executable tokens
//!   while guaranteeing at-most-one concurrent execution per token id
//! - **Debugger**: breakpoints, the halt handshake, stepping, and remote
//!   inspection
//! - **Stores**: the token-context and workflow-task collaborator
//!   contracts plus in-memory implementations
//! - **Facade**: the thin orchestration API external callers use
//!
//! Foundational types (token contexts, the process-model interface, the
//! path-expression evaluator) live in `opflow-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod debugger;
pub mod engine;
pub mod facade;
pub mod runner;
pub mod script;
pub mod store;

// Re-export key types at crate root for convenience
pub use debugger::{Breakpoint, BreakpointState, Debugger, DebuggerCommand, DebuggerMode};
pub use engine::Engine;
pub use facade::ProcessFacade;
pub use runner::{Runner, RunnerConfig};
pub use script::{ScriptBridge, ScriptEngine, ScriptScope};
pub use store::{MemoryTokenStore, MemoryWorkflowTaskStore, TokenStore, WorkflowTaskStore};
