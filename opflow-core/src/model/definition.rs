//! Process, node, and socket definitions.
//!
//! These types describe the static shape of a process graph the engine
//! advances tokens through. Model authoring is an external concern; the
//! definitions here are what the model resolver hands to the engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Visibility scope of a process entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProcessVisibility {
    /// May be started by external callers.
    #[default]
    Public,
    /// May only be entered through a subprocess call.
    Private,
}

/// The behavioral kind of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// An entry node where tokens may start.
    Initial {
        /// Start scope of this entry.
        visibility: ProcessVisibility,
    },
    /// A terminal node; reaching it ends the process (or returns to the
    /// caller when the call stack is non-empty).
    Final,
    /// A regular activity node executed by a handler.
    Activity,
    /// A node that calls another process and pushes a caller frame.
    SubprocessCall {
        /// Qualified target `"/Model/Process"` or plain process name in the
        /// same model.
        target: String,
    },
    /// A node that suspends the token and creates a workflow task.
    Workflow,
}

/// A control link from an exit socket to the entry socket of another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlLink {
    /// Target node name.
    pub node: String,
    /// Target entry socket name.
    pub socket: String,
}

impl ControlLink {
    /// Create a control link.
    #[must_use]
    pub fn new(node: impl Into<String>, socket: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            socket: socket.into(),
        }
    }
}

/// A declared parameter of a socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDefinition {
    /// Parameter name, unique per socket.
    pub name: String,
    /// Name of the parameter's data type in the type registry.
    pub type_name: String,
}

impl ParamDefinition {
    /// Create a parameter definition.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A named connection point on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketDefinition {
    /// Socket name, unique per node and direction.
    pub name: String,
    /// Declared parameters.
    pub params: Vec<ParamDefinition>,
    /// Whether this is the default socket of its direction.
    pub is_default: bool,
    /// Control link to the next node (exit sockets only).
    pub target: Option<ControlLink>,
}

impl SocketDefinition {
    /// Create a socket definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            is_default: false,
            target: None,
        }
    }

    /// Mark this socket as the default of its direction.
    #[must_use]
    pub fn default_socket(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Add a declared parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push(ParamDefinition::new(name, type_name));
        self
    }

    /// Link this exit socket to the entry socket of another node.
    #[must_use]
    pub fn linked_to(mut self, node: impl Into<String>, socket: impl Into<String>) -> Self {
        self.target = Some(ControlLink::new(node, socket));
        self
    }

    /// Get a declared parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamDefinition> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// A node in a process graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Node name, unique per process.
    pub name: String,
    /// Behavioral kind.
    pub kind: NodeKind,
    /// Entry sockets.
    pub entry_sockets: Vec<SocketDefinition>,
    /// Exit sockets.
    pub exit_sockets: Vec<SocketDefinition>,
    /// Key of the handler executing this node, if any.
    pub handler: Option<String>,
}

impl NodeDefinition {
    /// Create a node definition.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            entry_sockets: Vec::new(),
            exit_sockets: Vec::new(),
            handler: None,
        }
    }

    /// Add an entry socket.
    #[must_use]
    pub fn with_entry(mut self, socket: SocketDefinition) -> Self {
        self.entry_sockets.push(socket);
        self
    }

    /// Add an exit socket.
    #[must_use]
    pub fn with_exit(mut self, socket: SocketDefinition) -> Self {
        self.exit_sockets.push(socket);
        self
    }

    /// Set the handler key.
    #[must_use]
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    /// Get an entry socket by name.
    #[must_use]
    pub fn entry_socket(&self, name: &str) -> Option<&SocketDefinition> {
        self.entry_sockets.iter().find(|s| s.name == name)
    }

    /// Get an exit socket by name.
    #[must_use]
    pub fn exit_socket(&self, name: &str) -> Option<&SocketDefinition> {
        self.exit_sockets.iter().find(|s| s.name == name)
    }

    /// The default entry socket (explicitly flagged, else the first).
    #[must_use]
    pub fn default_entry_socket(&self) -> Option<&SocketDefinition> {
        self.entry_sockets
            .iter()
            .find(|s| s.is_default)
            .or_else(|| self.entry_sockets.first())
    }

    /// The default exit socket (explicitly flagged, else the first).
    #[must_use]
    pub fn default_exit_socket(&self) -> Option<&SocketDefinition> {
        self.exit_sockets
            .iter()
            .find(|s| s.is_default)
            .or_else(|| self.exit_sockets.first())
    }
}

/// A process definition: a named graph of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Name of the owning model.
    pub model: String,
    /// Process name, unique per model.
    pub name: String,
    /// Nodes by name.
    pub nodes: HashMap<String, NodeDefinition>,
}

impl ProcessDefinition {
    /// Create an empty process definition.
    #[must_use]
    pub fn new(model: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            name: name.into(),
            nodes: HashMap::new(),
        }
    }

    /// Add a node.
    #[must_use]
    pub fn with_node(mut self, node: NodeDefinition) -> Self {
        self.nodes.insert(node.name.clone(), node);
        self
    }

    /// Get a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeDefinition> {
        self.nodes.get(name)
    }

    /// The initial node of this process, if exactly one is declared.
    #[must_use]
    pub fn initial_node(&self) -> Option<&NodeDefinition> {
        let mut initials = self
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Initial { .. }));
        let first = initials.next();
        if initials.next().is_some() {
            return None;
        }
        first
    }
}
