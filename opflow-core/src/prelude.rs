//! Convenience re-exports for downstream crates and tests.

pub use crate::error::{OpflowError, Result};
pub use crate::expr::{Evaluator, GetFlags, PersistenceContext, SetFlags};
pub use crate::logging::{BufferedCollector, LogCategory, LogCollector, LogEvent, LogLevel};
pub use crate::model::{
    ControlLink, HandlerContext, HandlerFuture, HandlerOutcome, ModelQualifier, ModelRegistry,
    NodeDefinition, NodeHandler, NodeKind, ProcessDefinition, ProcessVisibility, SocketDefinition,
    SocketRef,
};
pub use crate::token::{
    CallStackFrame, LifecycleRequest, LifecycleState, TokenContext, PROCESS_VARIABLE_PREFIX,
};
pub use crate::types::{ClientId, RunnerId, TaskId, TokenId};
pub use crate::value::Value;
