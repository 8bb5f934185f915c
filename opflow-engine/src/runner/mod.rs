//! The engine runner: turns "tokens ready to run" into "tokens running".
//!
//! The runner polls the token store for executable contexts, claims each
//! one atomically, and dispatches it to a worker task. Concurrency is
//! bounded by a semaphore; orderly shutdown sets a stop flag and awaits the
//! in-flight counter draining to zero.

use crate::engine::Engine;
use opflow_core::error::Result;
use opflow_core::token::{LifecycleRequest, LifecycleState};
use opflow_core::types::RunnerId;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

/// Configuration for the runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Identity of this scheduler instance, stamped onto claimed contexts.
    pub runner_id: RunnerId,
    /// Idle sleep of the main execution loop in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum concurrently executing tokens.
    pub max_concurrent_tokens: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runner_id: RunnerId::new("local"),
            poll_interval_ms: 500,
            max_concurrent_tokens: 16,
        }
    }
}

impl RunnerConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `OPFLOW_RUNNER_ID`: Identity of this scheduler instance
    /// - `OPFLOW_POLL_INTERVAL_MS`: Idle sleep of the main loop
    /// - `OPFLOW_MAX_CONCURRENT_TOKENS`: Maximum concurrent executions
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            runner_id: std::env::var("OPFLOW_RUNNER_ID")
                .map(RunnerId::new)
                .unwrap_or(defaults.runner_id),
            poll_interval_ms: std::env::var("OPFLOW_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.poll_interval_ms),
            max_concurrent_tokens: std::env::var("OPFLOW_MAX_CONCURRENT_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_tokens),
        }
    }

    /// Set the runner id.
    #[must_use]
    pub fn with_runner_id(mut self, id: impl Into<String>) -> Self {
        self.runner_id = RunnerId::new(id);
        self
    }

    /// Set the maximum concurrently executing tokens.
    #[must_use]
    pub fn with_max_concurrent_tokens(mut self, max: usize) -> Self {
        self.max_concurrent_tokens = max.max(1);
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }
}

/// The scheduler.
pub struct Runner {
    engine: Arc<Engine>,
    config: RunnerConfig,
    stopping: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    quiesced: Arc<Notify>,
    limiter: Arc<Semaphore>,
}

impl Runner {
    /// Create a runner over an engine.
    #[must_use]
    pub fn new(engine: Arc<Engine>, config: RunnerConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_tokens));
        Self {
            engine,
            config,
            stopping: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            quiesced: Arc::new(Notify::new()),
            limiter,
        }
    }

    /// This runner's identity.
    #[must_use]
    pub fn runner_id(&self) -> &RunnerId {
        &self.config.runner_id
    }

    /// Number of tokens currently dispatched and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the runner has been asked to stop dispatching.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Repair contexts left claimed by a crashed runner.
    ///
    /// Every context owned by `owner` (or by any runner when `None`) in
    /// state `Selected`/`Running` is forced back to `Suspended` with a
    /// pending `Resume`. Must be called at startup, before dispatching
    /// begins; calling it while workers are in flight would resurrect
    /// contexts that are legitimately claimed.
    pub fn reset_executing_token_state(&self, owner: Option<&RunnerId>) -> Result<usize> {
        if self.in_flight() > 0 {
            tracing::warn!(
                in_flight = self.in_flight(),
                "reset_executing_token_state called while workers are in flight"
            );
        }
        let claimed = self.engine.store().find_claimed(owner);
        let count = claimed.len();
        for mut context in claimed {
            context.lifecycle_state = LifecycleState::Suspended;
            context.lifecycle_request = LifecycleRequest::Resume;
            context.owner = None;
            self.engine.store().update(&context)?;
            tracing::info!(token_id = %context.id, "Reset claimed context for recovery");
        }
        Ok(count)
    }

    /// Claim every executable context and dispatch each to a worker task.
    ///
    /// Contexts that fail to claim (raced by another scheduler instance)
    /// are skipped, not retried in the same pass. Returns the count
    /// dispatched.
    pub fn execute_pending_contexts_in_different_thread(&self) -> Result<usize> {
        if self.is_stopping() {
            return Ok(0);
        }
        let pending = self.engine.store().find_executable();
        let mut dispatched = 0;

        for context in pending {
            if self.is_stopping() {
                break;
            }
            if !self.engine.store().claim(context.id, &self.config.runner_id) {
                tracing::debug!(token_id = %context.id, "Claim raced, skipping");
                continue;
            }
            dispatched += 1;
            self.in_flight.fetch_add(1, Ordering::SeqCst);

            let engine = Arc::clone(&self.engine);
            let limiter = Arc::clone(&self.limiter);
            let in_flight = Arc::clone(&self.in_flight);
            let quiesced = Arc::clone(&self.quiesced);
            let id = context.id;

            tokio::spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .expect("limiter is never closed");
                match engine.execute_token(id).await {
                    Ok(()) => {}
                    Err(e) if e.is_cancellation() => {
                        tracing::info!(token_id = %id, "Token execution cancelled");
                    }
                    Err(e) => {
                        tracing::error!(token_id = %id, error = %e, "Token execution failed");
                    }
                }
                if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    quiesced.notify_waiters();
                }
            });
        }

        if dispatched > 0 {
            tracing::debug!(dispatched, "Dispatched pending contexts");
        }
        Ok(dispatched)
    }

    /// Claim and execute every executable context in the calling task.
    ///
    /// Same selection and claim logic as the threaded variant, but
    /// execution is synchronous and sequential, for deterministic test
    /// execution. Returns whether any context was found.
    pub async fn execute_pending_contexts_in_this_thread(&self) -> Result<bool> {
        let pending = self.engine.store().find_executable();
        let mut found = false;

        for context in pending {
            if !self.engine.store().claim(context.id, &self.config.runner_id) {
                continue;
            }
            found = true;
            match self.engine.execute_token(context.id).await {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => {
                    tracing::info!(token_id = %context.id, "Token execution cancelled");
                }
                Err(e) => {
                    tracing::error!(token_id = %context.id, error = %e, "Token execution failed");
                }
            }
        }
        Ok(found)
    }

    /// The poll loop: dispatch pending contexts, sleeping `sleep_ms` when
    /// idle. Never returns except via [`Runner::wait_for_stop`]. Idle
    /// passes also sweep expired debugger clients.
    pub async fn main_execution_loop(&self, sleep_ms: u64) {
        tracing::info!(runner_id = %self.config.runner_id, sleep_ms, "Main execution loop started");
        loop {
            if self.is_stopping() {
                break;
            }
            let dispatched = match self.execute_pending_contexts_in_different_thread() {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch pass failed");
                    0
                }
            };
            if let Some(debugger) = self.engine.debugger() {
                debugger.expire_idle_clients();
            }
            if dispatched == 0 {
                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            }
        }
        tracing::info!(runner_id = %self.config.runner_id, "Main execution loop exited");
    }

    /// Stop dispatching and await quiescence.
    ///
    /// Sets the stop flag preventing new dispatch, then blocks until the
    /// count of in-flight contexts reaches zero or the timeout elapses
    /// (`-1` = unbounded, `0` = poll-only). Returns whether quiescence was
    /// reached.
    pub async fn wait_for_stop(&self, timeout_ms: i64) -> bool {
        self.stopping.store(true, Ordering::SeqCst);

        if timeout_ms == 0 {
            return self.in_flight() == 0;
        }

        let drain = async {
            loop {
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                let notified = self.quiesced.notified();
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };

        if timeout_ms < 0 {
            drain.await;
            true
        } else {
            tokio::time::timeout(Duration::from_millis(timeout_ms as u64), drain)
                .await
                .is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryTokenStore, MemoryWorkflowTaskStore, TokenStore};
    use opflow_core::model::ModelRegistry;
    use opflow_core::token::TokenContext;

    fn test_runner() -> (Runner, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new());
        let engine = Arc::new(Engine::new(
            Arc::new(ModelRegistry::new()),
            store.clone() as Arc<dyn TokenStore>,
            Arc::new(MemoryWorkflowTaskStore::new()),
        ));
        (Runner::new(engine, RunnerConfig::default()), store)
    }

    #[test]
    fn config_builders() {
        let config = RunnerConfig::default()
            .with_runner_id("node-7")
            .with_max_concurrent_tokens(0)
            .with_poll_interval_ms(50);
        assert_eq!(config.runner_id, RunnerId::new("node-7"));
        assert_eq!(config.max_concurrent_tokens, 1);
        assert_eq!(config.poll_interval_ms, 50);
    }

    #[test]
    fn reset_repairs_claimed_contexts() {
        let (runner, store) = test_runner();

        let mut crashed = TokenContext::new();
        crashed.lifecycle_state = LifecycleState::Running;
        crashed.owner = Some(RunnerId::new("node-1"));
        let id = crashed.id;
        store.create(crashed).unwrap();

        let count = runner.reset_executing_token_state(None).unwrap();
        assert_eq!(count, 1);

        let repaired = store.get(id).unwrap();
        assert_eq!(repaired.lifecycle_state, LifecycleState::Suspended);
        assert_eq!(repaired.lifecycle_request, LifecycleRequest::Resume);
        assert!(repaired.owner.is_none());
    }

    #[test]
    fn reset_respects_owner_filter() {
        let (runner, store) = test_runner();

        let mut theirs = TokenContext::new();
        theirs.lifecycle_state = LifecycleState::Selected;
        theirs.owner = Some(RunnerId::new("node-2"));
        store.create(theirs).unwrap();

        let count = runner
            .reset_executing_token_state(Some(&RunnerId::new("node-1")))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn wait_for_stop_with_nothing_in_flight() {
        let (runner, _) = test_runner();
        assert!(runner.wait_for_stop(0).await);
        assert!(runner.is_stopping());
        assert_eq!(runner.execute_pending_contexts_in_different_thread().unwrap(), 0);
    }
}
