//! Integration tests for the token lifecycle: start, parameter binding,
//! transactions, workflow suspension, and graceful termination.

mod common;

use common::{order_process, start_position, workflow_process, TestEnv};
use opflow_core::token::{LifecycleRequest, LifecycleState, TokenContext};
use opflow_core::value::Value;
use opflow_engine::store::{TaskStatus, TokenStore, WorkflowTaskStore};
use std::collections::HashMap;

#[tokio::test]
async fn linear_process_runs_to_completion() {
    let env = TestEnv::new(vec![order_process()]);

    let id = env.facade.create_token();
    env.facade
        .start_token(id, "/Shop/Order.Start", &HashMap::new())
        .unwrap();
    env.facade.commit_token_context_transaction(id).unwrap();

    let found = env.facade.execute_pending_contexts_in_this_thread().await.unwrap();
    assert!(found);

    let done = env.store.get(id).unwrap();
    assert_eq!(done.lifecycle_state, LifecycleState::Completed);
    assert!(done.owner.is_none());
    assert!(done.current_socket.is_none());
    assert_eq!(env.visited_nodes(id), vec!["Approve", "Ship"]);
}

#[tokio::test]
async fn simple_parameters_are_converted_from_strings() {
    let env = TestEnv::new(vec![order_process()]);

    let id = env.facade.create_token();
    let mut params = HashMap::new();
    params.insert("amount".to_string(), Value::string("99.5"));
    params.insert("note".to_string(), Value::string("rush order"));
    env.facade.start_token(id, "/Shop/Order.Start", &params).unwrap();
    env.facade.commit_token_context_transaction(id).unwrap();

    let stored = env.store.get(id).unwrap();
    assert_eq!(stored.param("Start.In.amount").unwrap().as_f64(), Some(99.5));
    assert_eq!(
        stored.param("Start.In.note").unwrap().as_str(),
        Some("rush order")
    );
}

#[tokio::test]
async fn failed_conversion_leaves_the_store_untouched() {
    let env = TestEnv::new(vec![order_process()]);

    let id = env.facade.create_token();
    let mut params = HashMap::new();
    params.insert("amount".to_string(), Value::string("not a number"));
    let err = env
        .facade
        .start_token(id, "/Shop/Order.Start", &params)
        .unwrap_err();
    assert_eq!(err.code(), "E201");

    env.facade.rollback_token_context_transaction(id).unwrap();
    assert_eq!(env.store.count(), 0);
}

#[tokio::test]
async fn complex_parameters_require_assignable_values() {
    let env = TestEnv::new(vec![order_process()]);

    let id = env.facade.create_token();
    let mut params = HashMap::new();
    params.insert("customer".to_string(), Value::string("not an object"));
    let err = env
        .facade
        .start_token(id, "/Shop/Order.Start", &params)
        .unwrap_err();
    assert_eq!(err.code(), "E202");

    let mut params = HashMap::new();
    params.insert(
        "customer".to_string(),
        Value(serde_json::json!({"_type": "Customer", "name": "ACME"})),
    );
    env.facade.start_token(id, "/Shop/Order.Start", &params).unwrap();
}

#[tokio::test]
async fn start_scope_is_enforced() {
    let env = TestEnv::new(vec![order_process()]);

    let id = env.facade.create_token();
    let err = env
        .facade
        .set_initial_position(id, "/Shop/Order.Approve")
        .unwrap_err();
    assert_eq!(err.code(), "E102");

    let err = env
        .facade
        .set_initial_position(id, "/Shop/Missing.Start")
        .unwrap_err();
    assert_eq!(err.code(), "E101");
}

#[tokio::test]
async fn private_initial_nodes_reject_external_starts() {
    let (main, sub) = common::call_processes();
    let env = TestEnv::new(vec![main, sub]);

    let id = env.facade.create_token();
    let err = env
        .facade
        .set_initial_position(id, "/Shop/Fulfil.FStart")
        .unwrap_err();
    assert_eq!(err.code(), "E102");
}

#[tokio::test]
async fn stop_request_is_honored_before_the_first_step() {
    let env = TestEnv::new(vec![order_process()]);

    let mut context = TokenContext::new();
    context.set_initial_position(start_position());
    context.lifecycle_state = LifecycleState::Suspended;
    context.lifecycle_request = LifecycleRequest::Stop;
    let id = context.id;
    env.store.create(context).unwrap();

    env.facade.execute_pending_contexts_in_this_thread().await.unwrap();

    let stopped = env.store.get(id).unwrap();
    assert_eq!(stopped.lifecycle_state, LifecycleState::Completed);
    assert!(env.visited_nodes(id).is_empty());
}

#[tokio::test]
async fn workflow_node_suspends_and_resumes() {
    let env = TestEnv::new(vec![workflow_process()]);

    let id = env.seed_pending_token(start_position());
    env.facade.execute_pending_contexts_in_this_thread().await.unwrap();

    let suspended = env.store.get(id).unwrap();
    assert_eq!(suspended.lifecycle_state, LifecycleState::Suspended);
    assert_eq!(suspended.lifecycle_request, LifecycleRequest::None);
    assert!(suspended.owner.is_none());

    let tasks = env.tasks.find_by_token(id);
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.status, TaskStatus::Open);
    assert_eq!(task.position.node, "Review");

    // A suspended workflow token is not executable until resumed.
    let found = env.facade.execute_pending_contexts_in_this_thread().await.unwrap();
    assert!(!found);

    env.facade.resume_workflow(task.id, "Out", Some("alice")).unwrap();
    let accepted = env.tasks.get(task.id).unwrap();
    assert_eq!(accepted.assignee.as_deref(), Some("alice"));
    assert!(accepted.accepted_at.is_some());
    assert_eq!(accepted.status, TaskStatus::Assigned);

    env.facade.execute_pending_contexts_in_this_thread().await.unwrap();

    let done = env.store.get(id).unwrap();
    assert_eq!(done.lifecycle_state, LifecycleState::Completed);
    assert_eq!(env.tasks.get(task.id).unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn end_token_deletes_idle_contexts_and_children() {
    let env = TestEnv::new(vec![order_process()]);

    let mut parent = TokenContext::new();
    parent.set_initial_position(start_position());
    parent.lifecycle_state = LifecycleState::Suspended;
    let parent_id = parent.id;
    env.store.create(parent).unwrap();

    let mut child = TokenContext::new();
    child.parent = Some(parent_id);
    child.lifecycle_state = LifecycleState::Suspended;
    let child_id = child.id;
    env.store.create(child).unwrap();

    env.facade.end_token(parent_id).unwrap();

    assert!(env.store.get(parent_id).is_err());
    assert!(env.store.get(child_id).is_err());
}

#[tokio::test]
async fn failing_handler_parks_the_context() {
    let env = TestEnv::with_registry_tweak(vec![order_process()], |registry| {
        registry.register_handler("record", std::sync::Arc::new(common::FailingHandler));
    });

    let id = env.seed_pending_token(start_position());
    env.facade.execute_pending_contexts_in_this_thread().await.unwrap();

    // The worker error parked the context instead of leaving it claimed.
    let parked = env.store.get(id).unwrap();
    assert_eq!(parked.lifecycle_state, LifecycleState::Suspended);
    assert_eq!(parked.lifecycle_request, LifecycleRequest::None);
    assert!(parked.owner.is_none());
}
