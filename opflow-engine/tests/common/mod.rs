//! Common test utilities for integration tests.

#![allow(dead_code)]

use opflow_core::model::{
    ComplexType, HandlerContext, HandlerFuture, HandlerOutcome, ModelQualifier, ModelRegistry,
    NodeDefinition, NodeHandler, NodeKind, ProcessDefinition, ProcessVisibility, SocketDefinition,
};
use opflow_core::token::{LifecycleRequest, LifecycleState, TokenContext};
use opflow_core::types::{ClientId, TokenId};
use opflow_engine::debugger::Debugger;
use opflow_engine::engine::Engine;
use opflow_engine::facade::ProcessFacade;
use opflow_engine::runner::{Runner, RunnerConfig};
use opflow_engine::store::{MemoryTokenStore, MemoryWorkflowTaskStore, TokenStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Record of handler executions: (token, node name) pairs in order.
pub type Visits = Arc<Mutex<Vec<(TokenId, String)>>>;

/// A handler that records each execution and leaves through the default
/// exit socket.
pub struct RecordingHandler {
    visits: Visits,
}

impl RecordingHandler {
    pub fn new(visits: Visits) -> Self {
        Self { visits }
    }
}

impl NodeHandler for RecordingHandler {
    fn execute<'a>(&'a self, ctx: HandlerContext<'a>) -> HandlerFuture<'a> {
        let visits = Arc::clone(&self.visits);
        Box::pin(async move {
            visits.lock().push((ctx.token.id, ctx.node.name.clone()));
            Ok(HandlerOutcome::default_exit())
        })
    }
}

/// A handler that records, then sleeps before completing.
pub struct SlowHandler {
    visits: Visits,
    sleep_ms: u64,
}

impl SlowHandler {
    pub fn new(visits: Visits, sleep_ms: u64) -> Self {
        Self { visits, sleep_ms }
    }
}

impl NodeHandler for SlowHandler {
    fn execute<'a>(&'a self, ctx: HandlerContext<'a>) -> HandlerFuture<'a> {
        let visits = Arc::clone(&self.visits);
        let sleep_ms = self.sleep_ms;
        Box::pin(async move {
            visits.lock().push((ctx.token.id, ctx.node.name.clone()));
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            Ok(HandlerOutcome::default_exit())
        })
    }
}

/// A handler that always fails.
pub struct FailingHandler;

impl NodeHandler for FailingHandler {
    fn execute<'a>(&'a self, _ctx: HandlerContext<'a>) -> HandlerFuture<'a> {
        Box::pin(async move {
            Err(opflow_core::error::OpflowError::ExpressionEvaluation {
                expression: "order.total".to_string(),
                column: 0,
                cause: "synthetic failure".to_string(),
            })
        })
    }
}

/// Build the linear order process:
/// `Start (initial) -> Approve -> Ship -> End (final)`.
///
/// `Approve` and `Ship` run the "record" handler. `Start.In` declares
/// `amount: Float`, `note: String`, and `customer: Customer`.
pub fn order_process() -> ProcessDefinition {
    ProcessDefinition::new("Shop", "Order")
        .with_node(
            NodeDefinition::new(
                "Start",
                NodeKind::Initial {
                    visibility: ProcessVisibility::Public,
                },
            )
            .with_entry(
                SocketDefinition::new("In")
                    .default_socket()
                    .with_param("amount", "Float")
                    .with_param("note", "String")
                    .with_param("customer", "Customer"),
            )
            .with_exit(
                SocketDefinition::new("Out")
                    .default_socket()
                    .linked_to("Approve", "In"),
            ),
        )
        .with_node(
            NodeDefinition::new("Approve", NodeKind::Activity)
                .with_entry(SocketDefinition::new("In").default_socket())
                .with_exit(
                    SocketDefinition::new("Out")
                        .default_socket()
                        .linked_to("Ship", "In"),
                )
                .with_handler("record"),
        )
        .with_node(
            NodeDefinition::new("Ship", NodeKind::Activity)
                .with_entry(SocketDefinition::new("In").default_socket())
                .with_exit(
                    SocketDefinition::new("Out")
                        .default_socket()
                        .linked_to("End", "In"),
                )
                .with_handler("record"),
        )
        .with_node(
            NodeDefinition::new("End", NodeKind::Final)
                .with_entry(SocketDefinition::new("In").default_socket()),
        )
}

/// Build a process with a subprocess call:
/// `Start -> Call (Fulfil) -> End`, where `Fulfil` is
/// `FStart (private initial) -> Pack -> FEnd (final)`.
pub fn call_processes() -> (ProcessDefinition, ProcessDefinition) {
    let main = ProcessDefinition::new("Shop", "Order")
        .with_node(
            NodeDefinition::new(
                "Start",
                NodeKind::Initial {
                    visibility: ProcessVisibility::Public,
                },
            )
            .with_entry(SocketDefinition::new("In").default_socket())
            .with_exit(
                SocketDefinition::new("Out")
                    .default_socket()
                    .linked_to("Call", "In"),
            ),
        )
        .with_node(
            NodeDefinition::new(
                "Call",
                NodeKind::SubprocessCall {
                    target: "Fulfil".to_string(),
                },
            )
            .with_entry(SocketDefinition::new("In").default_socket())
            .with_exit(
                SocketDefinition::new("Out")
                    .default_socket()
                    .linked_to("End", "In"),
            ),
        )
        .with_node(
            NodeDefinition::new("End", NodeKind::Final)
                .with_entry(SocketDefinition::new("In").default_socket()),
        );

    let sub = ProcessDefinition::new("Shop", "Fulfil")
        .with_node(
            NodeDefinition::new(
                "FStart",
                NodeKind::Initial {
                    visibility: ProcessVisibility::Private,
                },
            )
            .with_entry(SocketDefinition::new("In").default_socket())
            .with_exit(
                SocketDefinition::new("Out")
                    .default_socket()
                    .linked_to("Pack", "In"),
            ),
        )
        .with_node(
            NodeDefinition::new("Pack", NodeKind::Activity)
                .with_entry(SocketDefinition::new("In").default_socket())
                .with_exit(
                    SocketDefinition::new("Out")
                        .default_socket()
                        .linked_to("FEnd", "In"),
                )
                .with_handler("record"),
        )
        .with_node(
            NodeDefinition::new("FEnd", NodeKind::Final)
                .with_entry(SocketDefinition::new("In").default_socket()),
        );

    (main, sub)
}

/// Build a process with a workflow node:
/// `Start -> Review (workflow) -> End`.
pub fn workflow_process() -> ProcessDefinition {
    ProcessDefinition::new("Shop", "Order")
        .with_node(
            NodeDefinition::new(
                "Start",
                NodeKind::Initial {
                    visibility: ProcessVisibility::Public,
                },
            )
            .with_entry(SocketDefinition::new("In").default_socket())
            .with_exit(
                SocketDefinition::new("Out")
                    .default_socket()
                    .linked_to("Review", "In"),
            ),
        )
        .with_node(
            NodeDefinition::new("Review", NodeKind::Workflow)
                .with_entry(SocketDefinition::new("In").default_socket())
                .with_exit(
                    SocketDefinition::new("Out")
                        .default_socket()
                        .linked_to("End", "In"),
                ),
        )
        .with_node(
            NodeDefinition::new("End", NodeKind::Final)
                .with_entry(SocketDefinition::new("In").default_socket()),
        )
}

/// A fully wired test environment.
pub struct TestEnv {
    pub facade: ProcessFacade,
    pub engine: Arc<Engine>,
    pub runner: Arc<Runner>,
    pub store: Arc<MemoryTokenStore>,
    pub tasks: Arc<MemoryWorkflowTaskStore>,
    pub debugger: Arc<Debugger>,
    pub visits: Visits,
}

impl TestEnv {
    /// Wire an environment over the given processes, registering the
    /// "record" handler and the `Customer` complex type.
    pub fn new(processes: Vec<ProcessDefinition>) -> Self {
        Self::with_registry_tweak(processes, |_| {})
    }

    /// Like [`TestEnv::new`] with a hook to adjust the registry (swap
    /// handlers, add types) before wiring.
    pub fn with_registry_tweak(
        processes: Vec<ProcessDefinition>,
        tweak: impl FnOnce(&mut ModelRegistry),
    ) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let visits: Visits = Arc::new(Mutex::new(Vec::new()));

        let mut registry = ModelRegistry::new();
        for process in processes {
            registry.add_process(process);
        }
        registry
            .types_mut()
            .register(ComplexType::new("Customer").with_member("name", "String"));
        registry.register_handler("record", Arc::new(RecordingHandler::new(Arc::clone(&visits))));
        tweak(&mut registry);

        let store = Arc::new(MemoryTokenStore::new());
        let tasks = Arc::new(MemoryWorkflowTaskStore::new());
        let debugger = Arc::new(Debugger::new());
        let engine = Arc::new(
            Engine::new(
                Arc::new(registry),
                store.clone() as Arc<dyn TokenStore>,
                tasks.clone() as Arc<dyn opflow_engine::store::WorkflowTaskStore>,
            )
            .with_debugger(Arc::clone(&debugger)),
        );
        let runner = Arc::new(Runner::new(
            Arc::clone(&engine),
            RunnerConfig::default().with_runner_id("test-runner"),
        ));
        let facade = ProcessFacade::new(Arc::clone(&engine), Arc::clone(&runner));

        Self {
            facade,
            engine,
            runner,
            store,
            tasks,
            debugger,
            visits,
        }
    }

    /// Seed a context directly into the store, positioned and pending.
    pub fn seed_pending_token(&self, position: ModelQualifier) -> TokenId {
        let mut context = TokenContext::new();
        context.set_initial_position(position);
        context.lifecycle_state = LifecycleState::Suspended;
        context.lifecycle_request = LifecycleRequest::Resume;
        let id = context.id;
        self.store.create(context).unwrap();
        id
    }

    /// Seed a debugger-attached pending context.
    pub fn seed_debugged_token(&self, position: ModelQualifier, client: &ClientId) -> TokenId {
        let mut context = TokenContext::new().with_debugger(client.clone());
        context.set_initial_position(position);
        context.lifecycle_state = LifecycleState::Suspended;
        context.lifecycle_request = LifecycleRequest::Resume;
        let id = context.id;
        self.store.create(context).unwrap();
        id
    }

    /// Node names visited by one token, in order.
    pub fn visited_nodes(&self, token: TokenId) -> Vec<String> {
        self.visits
            .lock()
            .iter()
            .filter(|(id, _)| *id == token)
            .map(|(_, node)| node.clone())
            .collect()
    }
}

/// The qualifier of the order process start socket.
pub fn start_position() -> ModelQualifier {
    ModelQualifier::socket("Shop", "Order", "Start", "In")
}

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
