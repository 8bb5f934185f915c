//! Workflow tasks created when a token suspends at a workflow node.

use chrono::{DateTime, Utc};
use opflow_core::error::{OpflowError, Result};
use opflow_core::model::ModelQualifier;
use opflow_core::types::{TaskId, TokenId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Processing status of a workflow task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a user to pick it up.
    #[default]
    Open,
    /// Assigned to a user.
    Assigned,
    /// Resolved; the owning token has moved on or ended.
    Completed,
}

/// A human task representing a suspended workflow node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Task id.
    pub id: TaskId,
    /// The suspended token this task belongs to.
    pub token: TokenId,
    /// The workflow node position the token is suspended at.
    pub position: ModelQualifier,
    /// The user the task is assigned to, if any.
    pub assignee: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was accepted by its assignee.
    pub accepted_at: Option<DateTime<Utc>>,
    /// Processing status.
    pub status: TaskStatus,
}

impl WorkflowTask {
    /// Create an open task for a suspended token.
    #[must_use]
    pub fn new(token: TokenId, position: ModelQualifier) -> Self {
        Self {
            id: TaskId::new(),
            token,
            position,
            assignee: None,
            created_at: Utc::now(),
            accepted_at: None,
            status: TaskStatus::Open,
        }
    }

    /// Assign the task to a user and record the acceptance time.
    pub fn accept(&mut self, user: impl Into<String>) {
        self.assignee = Some(user.into());
        self.accepted_at = Some(Utc::now());
        self.status = TaskStatus::Assigned;
    }

    /// Mark the task completed.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
    }
}

/// Persistence contract for workflow tasks.
pub trait WorkflowTaskStore: Send + Sync {
    /// Persist a new task.
    fn create(&self, task: WorkflowTask) -> Result<()>;

    /// Fetch a task by id.
    fn get(&self, id: TaskId) -> Result<WorkflowTask>;

    /// Persist the current state of a task.
    fn update(&self, task: &WorkflowTask) -> Result<()>;

    /// All tasks belonging to a token.
    fn find_by_token(&self, token: TokenId) -> Vec<WorkflowTask>;
}

/// In-memory workflow task store for testing and development.
#[derive(Debug, Default)]
pub struct MemoryWorkflowTaskStore {
    tasks: RwLock<HashMap<TaskId, WorkflowTask>>,
}

impl MemoryWorkflowTaskStore {
    /// Create a new in-memory task store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowTaskStore for MemoryWorkflowTaskStore {
    fn create(&self, task: WorkflowTask) -> Result<()> {
        self.tasks.write().insert(task.id, task);
        Ok(())
    }

    fn get(&self, id: TaskId) -> Result<WorkflowTask> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or(OpflowError::WorkflowTaskNotFound { task: id })
    }

    fn update(&self, task: &WorkflowTask) -> Result<()> {
        self.tasks.write().insert(task.id, task.clone());
        Ok(())
    }

    fn find_by_token(&self, token: TokenId) -> Vec<WorkflowTask> {
        self.tasks
            .read()
            .values()
            .filter(|t| t.token == token)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> WorkflowTask {
        WorkflowTask::new(
            TokenId::new(),
            ModelQualifier::socket("Shop", "Order", "Review", "In"),
        )
    }

    #[test]
    fn accept_records_time_and_assignee() {
        let mut task = sample_task();
        assert_eq!(task.status, TaskStatus::Open);

        task.accept("alice");
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assignee.as_deref(), Some("alice"));
        assert!(task.accepted_at.is_some());
    }

    #[test]
    fn store_roundtrip() {
        let store = MemoryWorkflowTaskStore::new();
        let task = sample_task();
        let id = task.id;
        let token = task.token;

        store.create(task).unwrap();
        assert_eq!(store.get(id).unwrap().token, token);
        assert_eq!(store.find_by_token(token).len(), 1);

        let err = store.get(TaskId::new()).unwrap_err();
        assert_eq!(err.code(), "E504");
    }

    #[test]
    fn complete_transitions_status() {
        let store = MemoryWorkflowTaskStore::new();
        let mut task = sample_task();
        let id = task.id;
        store.create(task.clone()).unwrap();

        task.complete();
        store.update(&task).unwrap();
        assert_eq!(store.get(id).unwrap().status, TaskStatus::Completed);
    }
}
