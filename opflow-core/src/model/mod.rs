//! The process-model interface: qualified positions, definitions, data
//! types, handlers, and the registry the engine resolves against.

mod definition;
mod handler;
mod qualifier;
mod registry;
mod types;

pub use definition::{
    ControlLink, NodeDefinition, NodeKind, ParamDefinition, ProcessDefinition, ProcessVisibility,
    SocketDefinition,
};
pub use handler::{HandlerContext, HandlerFuture, HandlerOutcome, NodeHandler};
pub use qualifier::{ModelQualifier, SocketRef};
pub use registry::ModelRegistry;
pub use types::{ComplexType, DataType, MemberDefinition, SimpleKind, TypeRegistry};
