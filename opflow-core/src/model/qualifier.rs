//! Qualified positions and textual socket references.

use crate::error::{OpflowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fully qualified position in a process graph.
///
/// The canonical textual form is `/Model/Process.Node.Socket`; node-level
/// qualifiers omit the socket. Qualifiers key breakpoint tables and record
/// token positions, so they are cheap to clone, hash, and compare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelQualifier {
    /// Name of the owning model.
    pub model: String,
    /// Name of the process within the model.
    pub process: String,
    /// Name of the node within the process.
    pub node: String,
    /// Name of the socket on the node, if socket-level.
    pub socket: Option<String>,
}

impl ModelQualifier {
    /// Create a node-level qualifier.
    #[must_use]
    pub fn node(
        model: impl Into<String>,
        process: impl Into<String>,
        node: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            process: process.into(),
            node: node.into(),
            socket: None,
        }
    }

    /// Create a socket-level qualifier.
    #[must_use]
    pub fn socket(
        model: impl Into<String>,
        process: impl Into<String>,
        node: impl Into<String>,
        socket: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            process: process.into(),
            node: node.into(),
            socket: Some(socket.into()),
        }
    }

    /// The node-level qualifier for this position.
    #[must_use]
    pub fn node_qualifier(&self) -> Self {
        Self {
            model: self.model.clone(),
            process: self.process.clone(),
            node: self.node.clone(),
            socket: None,
        }
    }

    /// This position with a different socket.
    #[must_use]
    pub fn with_socket(&self, socket: impl Into<String>) -> Self {
        Self {
            model: self.model.clone(),
            process: self.process.clone(),
            node: self.node.clone(),
            socket: Some(socket.into()),
        }
    }

    /// Check whether this qualifier (as a breakpoint position) matches an
    /// execution position. A node-level qualifier matches every socket on
    /// that node; a socket-level qualifier matches exactly.
    #[must_use]
    pub fn matches(&self, position: &ModelQualifier) -> bool {
        if self.model != position.model
            || self.process != position.process
            || self.node != position.node
        {
            return false;
        }
        match &self.socket {
            None => true,
            Some(s) => position.socket.as_deref() == Some(s.as_str()),
        }
    }

    /// Parse the canonical form `/Model/Process.Node[.Socket]`.
    pub fn parse(s: &str) -> Result<Self> {
        let err = |cause: &str| OpflowError::ModelReference {
            reference: s.to_string(),
            cause: cause.to_string(),
        };

        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| err("qualifier must start with '/'"))?;
        let (model, local) = rest
            .split_once('/')
            .ok_or_else(|| err("qualifier must name a model and a process"))?;
        if model.is_empty() {
            return Err(err("model name is empty"));
        }

        let mut parts = local.split('.');
        let process = parts.next().filter(|p| !p.is_empty());
        let node = parts.next().filter(|p| !p.is_empty());
        let socket = parts.next().filter(|p| !p.is_empty());
        if parts.next().is_some() {
            return Err(err("too many path segments"));
        }

        match (process, node) {
            (Some(process), Some(node)) => Ok(Self {
                model: model.to_string(),
                process: process.to_string(),
                node: node.to_string(),
                socket: socket.map(str::to_string),
            }),
            _ => Err(err("qualifier must name a process and a node")),
        }
    }
}

impl fmt::Display for ModelQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}.{}", self.model, self.process, self.node)?;
        if let Some(socket) = &self.socket {
            write!(f, ".{}", socket)?;
        }
        Ok(())
    }
}

/// A textual socket reference as accepted by the engine.
///
/// Three forms are supported:
/// - `"/Model/Process.Node"` (optionally `.Socket`) — absolute;
/// - `".SocketName"` — a socket on the current node;
/// - `"SocketName"` — a bare socket name resolved against the current node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketRef {
    /// An absolute qualifier.
    Absolute(ModelQualifier),
    /// A socket on the current node, written with a leading dot.
    CurrentNode(String),
    /// A bare socket name relative to the current position.
    Relative(String),
}

impl SocketRef {
    /// Parse a textual socket reference.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(OpflowError::ModelReference {
                reference: s.to_string(),
                cause: "empty reference".to_string(),
            });
        }
        if s.starts_with('/') {
            return Ok(Self::Absolute(ModelQualifier::parse(s)?));
        }
        if let Some(name) = s.strip_prefix('.') {
            if name.is_empty() || name.contains('.') {
                return Err(OpflowError::ModelReference {
                    reference: s.to_string(),
                    cause: "invalid socket name".to_string(),
                });
            }
            return Ok(Self::CurrentNode(name.to_string()));
        }
        if s.contains('.') {
            return Err(OpflowError::ModelReference {
                reference: s.to_string(),
                cause: "relative references must be bare socket names".to_string(),
            });
        }
        Ok(Self::Relative(s.to_string()))
    }
}
