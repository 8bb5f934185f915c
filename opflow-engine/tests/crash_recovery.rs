//! Integration tests for startup crash repair.

mod common;

use common::{order_process, TestEnv};
use opflow_core::model::ModelQualifier;
use opflow_core::token::{LifecycleRequest, LifecycleState, TokenContext};
use opflow_core::types::RunnerId;
use opflow_engine::store::TokenStore;

fn crashed_context(owner: &str, node: &str) -> TokenContext {
    let mut context = TokenContext::new();
    context.set_initial_position(ModelQualifier::socket("Shop", "Order", node, "In"));
    context.lifecycle_state = LifecycleState::Running;
    context.owner = Some(RunnerId::new(owner));
    context
}

#[tokio::test]
async fn reset_restores_suspended_resume() {
    let env = TestEnv::new(vec![order_process()]);

    let context = crashed_context("node-1", "Approve");
    let id = context.id;
    env.store.create(context).unwrap();

    let repaired = env.facade.reset_executing_token_state(None).unwrap();
    assert_eq!(repaired, 1);

    let context = env.store.get(id).unwrap();
    assert_eq!(context.lifecycle_state, LifecycleState::Suspended);
    assert_eq!(context.lifecycle_request, LifecycleRequest::Resume);
    assert!(context.owner.is_none());
}

#[tokio::test]
async fn repaired_context_resumes_from_its_committed_socket() {
    let env = TestEnv::new(vec![order_process()]);

    // Crashed mid-process: the last committed position is Approve's entry.
    let context = crashed_context("node-1", "Approve");
    let id = context.id;
    env.store.create(context).unwrap();

    env.facade.reset_executing_token_state(None).unwrap();
    env.facade.execute_pending_contexts_in_this_thread().await.unwrap();

    assert_eq!(
        env.store.get(id).unwrap().lifecycle_state,
        LifecycleState::Completed
    );
    // Execution replayed from Approve; Start was never revisited.
    assert_eq!(env.visited_nodes(id), vec!["Approve", "Ship"]);
}

#[tokio::test]
async fn reset_scopes_to_the_given_runner() {
    let env = TestEnv::new(vec![order_process()]);

    let mine = crashed_context("node-1", "Approve");
    let mine_id = mine.id;
    env.store.create(mine).unwrap();

    let theirs = crashed_context("node-2", "Ship");
    let theirs_id = theirs.id;
    env.store.create(theirs).unwrap();

    let repaired = env
        .facade
        .reset_executing_token_state(Some(&RunnerId::new("node-1")))
        .unwrap();
    assert_eq!(repaired, 1);

    assert_eq!(
        env.store.get(mine_id).unwrap().lifecycle_state,
        LifecycleState::Suspended
    );
    assert_eq!(
        env.store.get(theirs_id).unwrap().lifecycle_state,
        LifecycleState::Running
    );
}

#[tokio::test]
async fn selected_contexts_are_repaired_too() {
    let env = TestEnv::new(vec![order_process()]);

    let mut context = crashed_context("node-1", "Ship");
    context.lifecycle_state = LifecycleState::Selected;
    let id = context.id;
    env.store.create(context).unwrap();

    env.facade.reset_executing_token_state(None).unwrap();
    let repaired = env.store.get(id).unwrap();
    assert_eq!(repaired.lifecycle_state, LifecycleState::Suspended);
    assert_eq!(repaired.lifecycle_request, LifecycleRequest::Resume);
}
