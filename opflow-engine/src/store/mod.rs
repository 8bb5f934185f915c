//! Token context store trait and the in-memory implementation.

mod workflow;

pub use workflow::{
    MemoryWorkflowTaskStore, TaskStatus, WorkflowTask, WorkflowTaskStore,
};

use dashmap::DashMap;
use opflow_core::error::{OpflowError, Result};
use opflow_core::token::{LifecycleRequest, LifecycleState, TokenContext};
use opflow_core::types::{RunnerId, TokenId};

/// Persistence contract for token contexts.
///
/// The store is a collaborator: any backend works as long as `claim` is an
/// atomic state transition. The atomic claim is the only transition that
/// releases a context for execution, which is what guarantees a token id is
/// never dispatched twice concurrently.
pub trait TokenStore: Send + Sync {
    /// Persist a new context.
    fn create(&self, context: TokenContext) -> Result<()>;

    /// Fetch a context by id.
    fn get(&self, id: TokenId) -> Result<TokenContext>;

    /// Persist the current state of a context.
    fn update(&self, context: &TokenContext) -> Result<()>;

    /// Remove a context.
    fn delete(&self, id: TokenId) -> Result<()>;

    /// All contexts eligible for dispatch, ordered ascending by priority.
    ///
    /// Eligible means suspended with a pending request, or selected by a
    /// start/resume call but not yet owned by any runner.
    fn find_executable(&self) -> Vec<TokenContext>;

    /// Atomically claim a context for execution.
    ///
    /// Transitions `Suspended → Selected` (or stamps ownership on an
    /// unowned `Selected` context) and records the claiming runner.
    /// Returns `false` when the context was raced away or is no longer
    /// claimable.
    fn claim(&self, id: TokenId, owner: &RunnerId) -> bool;

    /// Contexts currently claimed (`Selected`/`Running`), optionally
    /// filtered by owning runner.
    fn find_claimed(&self, owner: Option<&RunnerId>) -> Vec<TokenContext>;

    /// Child contexts of a parent token.
    fn find_children(&self, parent: TokenId) -> Vec<TokenContext>;

    /// Number of stored contexts.
    fn count(&self) -> usize;
}

/// In-memory token store for testing and development.
///
/// The claim relies on the map's per-entry lock for atomicity.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    contexts: DashMap<TokenId, TokenContext>,
}

impl MemoryTokenStore {
    /// Create a new in-memory token store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn create(&self, context: TokenContext) -> Result<()> {
        self.contexts.insert(context.id, context);
        Ok(())
    }

    fn get(&self, id: TokenId) -> Result<TokenContext> {
        self.contexts
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(OpflowError::TokenNotFound { token: id })
    }

    fn update(&self, context: &TokenContext) -> Result<()> {
        self.contexts.insert(context.id, context.clone());
        Ok(())
    }

    fn delete(&self, id: TokenId) -> Result<()> {
        self.contexts.remove(&id);
        Ok(())
    }

    fn find_executable(&self) -> Vec<TokenContext> {
        let mut pending: Vec<TokenContext> = self
            .contexts
            .iter()
            .filter(|entry| {
                let ctx = entry.value();
                match ctx.lifecycle_state {
                    LifecycleState::Suspended => ctx.lifecycle_request != LifecycleRequest::None,
                    LifecycleState::Selected => ctx.owner.is_none(),
                    _ => false,
                }
            })
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|ctx| ctx.priority);
        pending
    }

    fn claim(&self, id: TokenId, owner: &RunnerId) -> bool {
        let Some(mut entry) = self.contexts.get_mut(&id) else {
            return false;
        };
        let ctx = entry.value_mut();
        match ctx.lifecycle_state {
            LifecycleState::Suspended if ctx.lifecycle_request != LifecycleRequest::None => {
                ctx.lifecycle_state = LifecycleState::Selected;
                ctx.owner = Some(owner.clone());
                true
            }
            LifecycleState::Selected if ctx.owner.is_none() => {
                ctx.owner = Some(owner.clone());
                true
            }
            _ => false,
        }
    }

    fn find_claimed(&self, owner: Option<&RunnerId>) -> Vec<TokenContext> {
        self.contexts
            .iter()
            .filter(|entry| {
                let ctx = entry.value();
                ctx.lifecycle_state.is_claimed()
                    && owner.is_none_or(|o| ctx.owner.as_ref() == Some(o))
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn find_children(&self, parent: TokenId) -> Vec<TokenContext> {
        self.contexts
            .iter()
            .filter(|entry| entry.value().parent == Some(parent))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn count(&self) -> usize {
        self.contexts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_context(priority: u32) -> TokenContext {
        let mut ctx = TokenContext::new().with_priority(priority);
        ctx.lifecycle_state = LifecycleState::Suspended;
        ctx.lifecycle_request = LifecycleRequest::Resume;
        ctx
    }

    #[test]
    fn create_get_delete() {
        let store = MemoryTokenStore::new();
        let ctx = TokenContext::new();
        let id = ctx.id;

        store.create(ctx).unwrap();
        assert!(store.get(id).is_ok());

        store.delete(id).unwrap();
        let err = store.get(id).unwrap_err();
        assert_eq!(err.code(), "E501");
    }

    #[test]
    fn find_executable_orders_by_priority() {
        let store = MemoryTokenStore::new();
        store.create(pending_context(5)).unwrap();
        store.create(pending_context(1)).unwrap();
        store.create(pending_context(3)).unwrap();

        let priorities: Vec<u32> = store.find_executable().iter().map(|c| c.priority).collect();
        assert_eq!(priorities, vec![1, 3, 5]);
    }

    #[test]
    fn find_executable_skips_parked_and_claimed() {
        let store = MemoryTokenStore::new();

        let mut parked = TokenContext::new();
        parked.lifecycle_state = LifecycleState::Suspended;
        parked.lifecycle_request = LifecycleRequest::None;
        store.create(parked).unwrap();

        let mut owned = pending_context(0);
        owned.lifecycle_state = LifecycleState::Selected;
        owned.owner = Some(RunnerId::new("other"));
        store.create(owned).unwrap();

        assert!(store.find_executable().is_empty());
    }

    #[test]
    fn claim_is_exclusive() {
        let store = MemoryTokenStore::new();
        let ctx = pending_context(0);
        let id = ctx.id;
        store.create(ctx).unwrap();

        let runner = RunnerId::new("node-1");
        assert!(store.claim(id, &runner));
        assert!(!store.claim(id, &RunnerId::new("node-2")));

        let claimed = store.get(id).unwrap();
        assert_eq!(claimed.lifecycle_state, LifecycleState::Selected);
        assert_eq!(claimed.owner, Some(runner));
    }

    #[test]
    fn claim_unowned_selected() {
        let store = MemoryTokenStore::new();
        let mut ctx = TokenContext::new();
        ctx.lifecycle_state = LifecycleState::Selected;
        ctx.lifecycle_request = LifecycleRequest::Resume;
        let id = ctx.id;
        store.create(ctx).unwrap();

        assert!(store.claim(id, &RunnerId::new("node-1")));
        assert!(!store.claim(id, &RunnerId::new("node-2")));
    }

    #[test]
    fn find_claimed_by_owner() {
        let store = MemoryTokenStore::new();
        let runner = RunnerId::new("node-1");

        let mut mine = TokenContext::new();
        mine.lifecycle_state = LifecycleState::Running;
        mine.owner = Some(runner.clone());
        store.create(mine).unwrap();

        let mut theirs = TokenContext::new();
        theirs.lifecycle_state = LifecycleState::Selected;
        theirs.owner = Some(RunnerId::new("node-2"));
        store.create(theirs).unwrap();

        assert_eq!(store.find_claimed(Some(&runner)).len(), 1);
        assert_eq!(store.find_claimed(None).len(), 2);
    }

    #[test]
    fn find_children_by_parent() {
        let store = MemoryTokenStore::new();
        let parent = TokenContext::new();
        let parent_id = parent.id;
        store.create(parent).unwrap();

        let mut child = TokenContext::new();
        child.parent = Some(parent_id);
        store.create(child).unwrap();

        assert_eq!(store.find_children(parent_id).len(), 1);
    }
}
