//! Flow scoping and parent seeding integration tests.
//!
//! These tests verify that child flows built inside an entered parent
//! start from the parent's completed work, and that scopes nest cleanly.

use std::collections::HashSet;
use std::sync::Arc;

use flowgraph::core::task::TaskId;
use flowgraph::events::{Event, Role};
use flowgraph::flow::{EventFilter, Flow, FlowContext};
use flowgraph::orchestration::Orchestrator;

use crate::fixtures::{chain, flow_with, ScriptedAgent};

/// Run only the first task of an A -> B -> C chain.
async fn partially_run_parent() -> (Arc<Flow>, [TaskId; 3]) {
    let parent = flow_with(Arc::new(ScriptedAgent::completing("parent")));
    let ids = chain(&parent);
    parent
        .add_events(vec![Event::message(Role::User, "kick off")])
        .unwrap();
    Orchestrator::new(Arc::clone(&parent)).run(Some(1)).await.unwrap();
    (parent, ids)
}

/// Test: Parent seeding
/// Given a parent with A complete and B, C pending
/// When a child is built inside the parent's scope
/// Then the child holds exactly A, and its events match the parent's
#[tokio::test]
async fn test_child_copies_completed_tasks_and_events() {
    let (parent, [a, b, c]) = partially_run_parent().await;
    let parent_events: Vec<Event> = parent
        .get_events(EventFilter::new())
        .unwrap()
        .into_iter()
        .map(|stored| stored.event)
        .collect();

    let mut ctx = FlowContext::new();
    let scope = ctx.enter(&parent);
    let child = Flow::builder().name("child").build(&scope).unwrap();

    let child_ids: HashSet<TaskId> = child.tasks().iter().map(|t| t.id).collect();
    assert_eq!(child_ids, HashSet::from([a]));
    assert!(child.task(&b).is_none());
    assert!(child.task(&c).is_none());
    assert!(child.task(&a).unwrap().is_complete());

    let child_events: Vec<Event> = child
        .get_events(EventFilter::new())
        .unwrap()
        .into_iter()
        .map(|stored| stored.event)
        .collect();
    assert_eq!(child_events, parent_events);

    // Appends to the child extend its view without touching the parent
    child
        .add_events(vec![Event::message(Role::Agent, "child note")])
        .unwrap();
    let after = child.get_events(EventFilter::new()).unwrap();
    assert_eq!(after.len(), parent_events.len() + 1);
    assert_eq!(
        parent.get_events(EventFilter::new()).unwrap().len(),
        parent_events.len()
    );
}

/// Test: Seeded tasks satisfy new dependents in the child
#[tokio::test]
async fn test_child_tasks_can_depend_on_seeded_work() {
    let (parent, [a, _, _]) = partially_run_parent().await;

    let mut ctx = FlowContext::new();
    let scope = ctx.enter(&parent);
    let agent = Arc::new(ScriptedAgent::completing("child"));
    let child = Flow::builder()
        .agent(Arc::clone(&agent) as Arc<dyn flowgraph::agent::Agent>)
        .config(crate::fixtures::test_config())
        .build(&scope)
        .unwrap();

    let follow_up = flowgraph::core::task::Task::new("follow up").depends_on(a);
    let follow_id = child.add_task(follow_up).unwrap();
    let report = child.run(None).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(agent.calls(&a), 0);
    assert_eq!(agent.calls(&follow_id), 1);
}

/// Test: copy_parent(false) starts empty
#[tokio::test]
async fn test_copy_parent_disabled() {
    let (parent, _) = partially_run_parent().await;

    let mut ctx = FlowContext::new();
    let scope = ctx.enter(&parent);
    let child = Flow::builder().copy_parent(false).build(&scope).unwrap();

    assert!(child.tasks().is_empty());
    assert!(child.get_events(EventFilter::new()).unwrap().is_empty());
}

/// Test: Nested scopes seed from the innermost flow
/// Given outer -> middle entered in one context
/// When a flow is built
/// Then it seeds from middle, and exiting restores outer
#[test]
fn test_nested_scopes_seed_from_innermost() {
    let outer = Flow::builder().name("outer").build_detached();
    outer
        .add_events(vec![Event::message(Role::User, "outer only")])
        .unwrap();
    let mut ctx = FlowContext::new();

    let mut outer_scope = ctx.enter(&outer);
    let middle = Flow::builder()
        .name("middle")
        .copy_parent(false)
        .build(&outer_scope)
        .unwrap();
    {
        let middle_scope = outer_scope.enter(&middle);
        let inner = Flow::builder().build(&middle_scope).unwrap();
        assert!(inner.get_events(EventFilter::new()).unwrap().is_empty());
        assert_eq!(middle_scope.current().unwrap().name(), Some("middle"));
    }
    assert_eq!(outer_scope.current().unwrap().name(), Some("outer"));

    let sibling = Flow::builder().build(&outer_scope).unwrap();
    assert_eq!(sibling.get_events(EventFilter::new()).unwrap().len(), 1);
}

/// Test: Child flows share the parent's history store by default
#[test]
fn test_child_defaults_to_parent_history() {
    let parent = Flow::builder().build_detached();
    let mut ctx = FlowContext::new();
    let scope = ctx.enter(&parent);
    let child = Flow::builder().copy_parent(false).build(&scope).unwrap();

    assert!(Arc::ptr_eq(parent.history(), child.history()));
    assert_ne!(parent.thread_id(), child.thread_id());
}
