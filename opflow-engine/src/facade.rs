//! The process facade: the call boundary external callers compose the
//! engine, runner, and debugger through.
//!
//! The facade owns the transaction boundary around start/resume: mutations
//! happen on an uncommitted working copy, and only
//! [`ProcessFacade::commit_token_context_transaction`] makes the token
//! visible to the scheduler. Binding and resolution errors therefore never
//! leak a half-mutated position into the store.

use crate::debugger::Debugger;
use crate::engine::Engine;
use crate::runner::Runner;
use opflow_core::error::{OpflowError, Result};
use opflow_core::token::TokenContext;
use opflow_core::types::{RunnerId, TaskId, TokenId};
use opflow_core::value::Value;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// Thin orchestration API over the engine, runner, and debugger.
pub struct ProcessFacade {
    engine: Arc<Engine>,
    runner: Arc<Runner>,
    pending: Mutex<HashMap<TokenId, TokenContext>>,
}

impl ProcessFacade {
    /// Create a facade.
    #[must_use]
    pub fn new(engine: Arc<Engine>, runner: Arc<Runner>) -> Self {
        Self {
            engine,
            runner,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// The runner.
    #[must_use]
    pub fn runner(&self) -> &Arc<Runner> {
        &self.runner
    }

    /// The debugger, when one is attached to the engine.
    #[must_use]
    pub fn debugger(&self) -> Option<&Arc<Debugger>> {
        self.engine.debugger()
    }

    // =========================================================================
    // Token transactions
    // =========================================================================

    /// Create a token with an empty position.
    ///
    /// The token exists only in the current transaction until committed.
    pub fn create_token(&self) -> TokenId {
        self.create_token_from(TokenContext::new())
    }

    /// Create a token from a prepared context (priority, debugger
    /// attachment, parent).
    pub fn create_token_from(&self, context: TokenContext) -> TokenId {
        let id = context.id;
        self.pending.lock().insert(id, context);
        id
    }

    fn with_working_copy<T>(
        &self,
        id: TokenId,
        f: impl FnOnce(&Engine, &mut TokenContext) -> Result<T>,
    ) -> Result<T> {
        let mut pending = self.pending.lock();
        let context = match pending.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.engine.store().get(id)?),
        };
        f(&self.engine, context)
    }

    /// Position a created token at an absolute start reference.
    pub fn set_initial_position(&self, id: TokenId, reference: &str) -> Result<()> {
        self.with_working_copy(id, |engine, context| {
            engine.set_initial_position(context, reference)
        })
    }

    /// Position a created token at a start reference, bind parameters, and
    /// mark it for scheduling.
    ///
    /// The token becomes visible to the scheduler only after commit.
    pub fn start_token(
        &self,
        id: TokenId,
        reference: &str,
        params: &HashMap<String, Value>,
    ) -> Result<()> {
        self.with_working_copy(id, |engine, context| {
            engine.set_initial_position(context, reference)?;
            engine.start_token(context, params)
        })
    }

    /// Reposition a suspended token and mark it for scheduling.
    pub fn resume_token(
        &self,
        id: TokenId,
        reference: &str,
        params: &HashMap<String, Value>,
    ) -> Result<()> {
        self.with_working_copy(id, |engine, context| {
            engine.resume_token(context, reference, params)
        })
    }

    /// Persist the transaction's mutations, making the token visible to
    /// the scheduler.
    pub fn commit_token_context_transaction(&self, id: TokenId) -> Result<()> {
        let context = self
            .pending
            .lock()
            .remove(&id)
            .ok_or(OpflowError::TokenNotFound { token: id })?;
        self.engine.commit_token_context_transaction(&context)
    }

    /// Discard the transaction's mutations.
    pub fn rollback_token_context_transaction(&self, id: TokenId) -> Result<()> {
        self.pending.lock().remove(&id);
        self.engine.rollback_token_context_transaction(id)?;
        Ok(())
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// End a token (cooperatively when executing, destructively when idle).
    pub fn end_token(&self, id: TokenId) -> Result<()> {
        self.engine.end_token(id)
    }

    /// Resume a suspended workflow task.
    pub fn resume_workflow(
        &self,
        task: TaskId,
        resumption_ref: &str,
        user: Option<&str>,
    ) -> Result<()> {
        self.engine.resume_workflow(task, resumption_ref, user)
    }

    // =========================================================================
    // Scheduler operations
    // =========================================================================

    /// Dispatch pending contexts to worker tasks.
    pub fn execute_pending_contexts_in_different_thread(&self) -> Result<usize> {
        self.runner.execute_pending_contexts_in_different_thread()
    }

    /// Execute pending contexts inline, for deterministic tests.
    pub async fn execute_pending_contexts_in_this_thread(&self) -> Result<bool> {
        self.runner.execute_pending_contexts_in_this_thread().await
    }

    /// Run the poll loop until stopped.
    pub async fn main_execution_loop(&self, sleep_ms: u64) {
        self.runner.main_execution_loop(sleep_ms).await;
    }

    /// Stop dispatching and await quiescence.
    pub async fn wait_for_stop(&self, timeout_ms: i64) -> bool {
        self.runner.wait_for_stop(timeout_ms).await
    }

    /// Startup-only crash repair of claimed contexts.
    pub fn reset_executing_token_state(&self, owner: Option<&RunnerId>) -> Result<usize> {
        self.runner.reset_executing_token_state(owner)
    }
}
