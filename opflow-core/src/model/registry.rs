//! The process-model registry.
//!
//! The registry is the engine's window onto the process model collaborator:
//! process lookup by qualified name, node/socket resolution, parameter type
//! lookup, and the handler table.

use crate::error::{OpflowError, Result};
use crate::model::{ModelQualifier, NodeDefinition, NodeHandler, ProcessDefinition, TypeRegistry};
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory model registry.
#[derive(Default)]
pub struct ModelRegistry {
    processes: HashMap<(String, String), Arc<ProcessDefinition>>,
    types: TypeRegistry,
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl ModelRegistry {
    /// Create an empty registry with the builtin simple types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            processes: HashMap::new(),
            types: TypeRegistry::new(),
            handlers: HashMap::new(),
        }
    }

    /// Add a process definition.
    pub fn add_process(&mut self, process: ProcessDefinition) {
        let key = (process.model.clone(), process.name.clone());
        self.processes.insert(key, Arc::new(process));
    }

    /// Access the type registry.
    #[must_use]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Mutable access to the type registry, for model providers.
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    /// Register a node handler under a key.
    pub fn register_handler(&mut self, name: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Look up a handler by key.
    pub fn handler(&self, name: &str) -> Result<Arc<dyn NodeHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| OpflowError::HandlerNotFound {
                name: name.to_string(),
            })
    }

    /// Look up a process by model and name.
    pub fn process(&self, model: &str, name: &str) -> Result<&Arc<ProcessDefinition>> {
        self.processes
            .get(&(model.to_string(), name.to_string()))
            .ok_or_else(|| OpflowError::ModelReference {
                reference: format!("/{}/{}", model, name),
                cause: "no such process".to_string(),
            })
    }

    /// Resolve a qualifier to its process and node definitions.
    pub fn node(&self, position: &ModelQualifier) -> Result<(&ProcessDefinition, &NodeDefinition)> {
        let process = self.process(&position.model, &position.process)?;
        let node = process
            .node(&position.node)
            .ok_or_else(|| OpflowError::ModelReference {
                reference: position.to_string(),
                cause: "no such node".to_string(),
            })?;
        Ok((process, node))
    }

    /// Resolve a subprocess-call target to the entry position of its
    /// initial node.
    ///
    /// Targets are either `"/Model/Process"` or a plain process name in the
    /// calling model.
    pub fn resolve_subprocess_entry(
        &self,
        calling_model: &str,
        target: &str,
    ) -> Result<ModelQualifier> {
        let (model, name) = match target.strip_prefix('/') {
            Some(rest) => rest.split_once('/').ok_or_else(|| OpflowError::ModelReference {
                reference: target.to_string(),
                cause: "subprocess target must be '/Model/Process' or a process name".to_string(),
            })?,
            None => (calling_model, target),
        };
        let process = self.process(model, name)?;
        let initial = process
            .initial_node()
            .ok_or_else(|| OpflowError::ModelReference {
                reference: target.to_string(),
                cause: "process has no unambiguous initial node".to_string(),
            })?;
        let entry = initial
            .default_entry_socket()
            .ok_or_else(|| OpflowError::ModelReference {
                reference: target.to_string(),
                cause: format!("initial node '{}' has no entry socket", initial.name),
            })?;
        Ok(ModelQualifier::socket(
            model,
            name,
            initial.name.clone(),
            entry.name.clone(),
        ))
    }

}
