//! OPFLOW Core Library
//!
//! This crate provides the foundational types and stateless algorithms for
//! the OPFLOW business-process engine:
//!
//! - **Token Context**: the persisted execution state of one process
//!   instance (position, parameters, lifecycle flags)
//! - **Model interface**: qualified positions, process/node/socket
//!   definitions, data types, and the handler trait
//! - **Expression evaluator**: the path language used to read and write
//!   nested fields of process data
//! - **Errors and logging**: the workspace-wide error taxonomy and the
//!   structured log collector
//!
//! The runtime (engine, scheduler, debugger, facade) lives in
//! `opflow-engine`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod expr;
pub mod logging;
pub mod model;
pub mod prelude;
pub mod token;
pub mod types;
pub mod value;

// Re-export key types at crate root for convenience
pub use error::{OpflowError, Result};
pub use expr::{Evaluator, GetFlags, PersistenceContext, SetFlags};
pub use model::{ModelQualifier, ModelRegistry, NodeHandler, SocketRef};
pub use token::{LifecycleRequest, LifecycleState, TokenContext};
pub use types::{ClientId, RunnerId, TaskId, TokenId};
pub use value::Value;
