//! Orchestrator integration tests.
//!
//! These tests run whole flows with scripted agents and check the run
//! report, task states, and the events left behind.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use flowgraph::agent::{AgentTurn, DispatchError, TurnOutcome};
use flowgraph::core::task::{Task, TaskStatus};
use flowgraph::events::{Event, EventKind, Role};
use flowgraph::flow::{EventFilter, Flow};
use flowgraph::orchestration::{Orchestrator, OrchestratorConfig, RetryPolicy, RunStatus};

use crate::fixtures::{chain, fan_out, flow_with, test_config, ScriptedAgent};

/// Test: Fan-out runs to completion in dependency order
/// Given A with dependents B and C
/// When the flow runs without a budget
/// Then A is dispatched first and the run completes
#[tokio::test]
async fn test_fan_out_completes() {
    let agent = Arc::new(ScriptedAgent::completing("worker"));
    let flow = flow_with(Arc::clone(&agent));
    let ids = fan_out(&flow);

    let report = flow.run(None).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.steps, 3);
    assert_eq!(agent.order(), vec![ids.a, ids.b, ids.c]);
    assert_eq!(flow.task(&ids.b).unwrap().result, Some(json!("b")));
}

/// Test: Failure in a chain deadlocks the remainder
/// Given A -> B -> C where B fails
/// When the flow runs
/// Then C stays non-terminal and the report says deadlocked
#[tokio::test]
async fn test_chain_failure_reports_deadlock() {
    let agent = Arc::new(ScriptedAgent::failing_on("worker", "b"));
    let flow = flow_with(Arc::clone(&agent));
    let [a, b, c] = chain(&flow);

    let report = flow.run(None).await.unwrap();

    assert_eq!(report.status, RunStatus::Deadlocked);
    assert!(!report.is_complete());
    assert_eq!(report.completed, vec![a]);
    assert_eq!(report.failed, vec![b]);
    assert_eq!(report.blocked, vec![c]);
    assert_eq!(flow.task(&c).unwrap().status, TaskStatus::Pending);
    assert_eq!(agent.calls(&c), 0);

    let notes = flow
        .get_events(EventFilter::new().of_type("orchestrator_message"))
        .unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].task_ids, vec![b]);
}

/// Test: A step budget of one resumes across calls
/// Given two independent ready tasks
/// When run(steps=1) is called twice
/// Then each call dispatches exactly one task
#[tokio::test]
async fn test_single_step_runs_resume() {
    let agent = Arc::new(ScriptedAgent::completing("worker"));
    let flow = flow_with(Arc::clone(&agent));
    let x = Task::new("x");
    let y = Task::new("y");
    let (id_x, id_y) = (x.id, y.id);
    flow.add_task(x).unwrap();
    flow.add_task(y).unwrap();

    let first = flow.run(Some(1)).await.unwrap();
    assert_eq!(first.steps, 1);
    assert_eq!(first.status, RunStatus::BudgetExhausted);
    assert_eq!(agent.order(), vec![id_x]);

    let second = flow.run(Some(1)).await.unwrap();
    assert_eq!(second.steps, 1);
    assert!(second.is_complete());
    assert_eq!(agent.order(), vec![id_x, id_y]);
}

/// Test: Ready tasks within one step run concurrently
/// Given three independent tasks and max_parallel = 3
/// When the flow runs
/// Then all three are in flight together and one step is used
#[tokio::test(start_paused = true)]
async fn test_parallel_dispatch_overlaps() {
    let agent = Arc::new(ScriptedAgent::completing("worker").with_delay(Duration::from_millis(100)));
    let flow = Flow::builder()
        .agent(Arc::clone(&agent) as Arc<dyn flowgraph::agent::Agent>)
        .config(OrchestratorConfig {
            max_parallel: 3,
            ..test_config()
        })
        .build_detached();
    for name in ["x", "y", "z"] {
        flow.add_task(Task::new(name)).unwrap();
    }

    let report = flow.run(None).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.steps, 1);
    assert_eq!(agent.max_in_flight(), 3);
}

/// Test: max_parallel bounds concurrency
#[tokio::test(start_paused = true)]
async fn test_parallel_dispatch_is_bounded() {
    let agent = Arc::new(ScriptedAgent::completing("worker").with_delay(Duration::from_millis(10)));
    let flow = Flow::builder()
        .agent(Arc::clone(&agent) as Arc<dyn flowgraph::agent::Agent>)
        .config(OrchestratorConfig {
            max_parallel: 2,
            ..test_config()
        })
        .build_detached();
    for i in 0..5 {
        flow.add_task(Task::new(&format!("t{}", i))).unwrap();
    }

    let report = flow.run(None).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.steps, 3);
    assert_eq!(agent.max_in_flight(), 2);
}

/// Test: Concurrent runs on one flow never dispatch a task twice
/// Given a chain A -> B -> C and a slow agent
/// When two runs of the same flow are awaited together
/// Then each task is dispatched exactly once and both runs see completion
#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_share_one_driver() {
    let agent = Arc::new(ScriptedAgent::completing("worker").with_delay(Duration::from_millis(50)));
    let flow = flow_with(Arc::clone(&agent));
    let ids = chain(&flow);

    let (first, second) = tokio::join!(flow.run(None), flow.run(Some(1)));
    let (first, second) = (first.unwrap(), second.unwrap());

    for id in &ids {
        assert_eq!(agent.calls(id), 1);
    }
    assert_eq!(agent.order(), ids.to_vec());
    assert!(first.is_complete());
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.steps, 0);
}

/// Test: Cancellation stops the run at the next step boundary
/// Given A -> B and an agent that cancels the run while working on A
/// When the flow runs
/// Then A completes, B is never dispatched, and the run reports cancelled
#[tokio::test]
async fn test_cancellation_between_steps() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let agent = Arc::new(ScriptedAgent::new("worker", move |task, _| {
        trigger.cancel();
        Ok(AgentTurn::completed(json!(task.objective)))
    }));
    let flow = flow_with(Arc::clone(&agent));
    let a = Task::new("a");
    let b = Task::new("b").depends_on(a.id);
    let (id_a, id_b) = (a.id, b.id);
    flow.add_task(a).unwrap();
    flow.add_task(b).unwrap();

    let report = Orchestrator::new(Arc::clone(&flow))
        .with_cancellation(token)
        .run(None)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.steps, 1);
    assert_eq!(report.completed, vec![id_a]);
    assert_eq!(agent.calls(&id_b), 0);
}

/// Test: Transient failures are retried, permanent ones fail the task
#[tokio::test]
async fn test_retry_policy_applies_to_transient_errors() {
    let agent = Arc::new(ScriptedAgent::new("worker", |task, call| match task.objective.as_str() {
        "flaky" if call < 2 => Err(DispatchError::transient("try again")),
        "broken" => Err(DispatchError::fatal("no")),
        _ => Ok(AgentTurn::completed(json!(call))),
    }));
    let flow = Flow::builder()
        .agent(Arc::clone(&agent) as Arc<dyn flowgraph::agent::Agent>)
        .config(OrchestratorConfig {
            retry: RetryPolicy {
                max_retries: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
            },
            ..test_config()
        })
        .build_detached();
    let flaky = Task::new("flaky");
    let broken = Task::new("broken");
    let (id_flaky, id_broken) = (flaky.id, broken.id);
    flow.add_task(flaky).unwrap();
    flow.add_task(broken).unwrap();

    let report = flow.run(None).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.completed, vec![id_flaky]);
    assert_eq!(report.failed, vec![id_broken]);
    assert_eq!(agent.calls(&id_flaky), 3);
    assert_eq!(agent.calls(&id_broken), 1);
}

/// Test: Skipped tasks count as finished and unblock nothing
/// Given A -> B where A is skipped
/// Then B stays blocked since only completed dependencies satisfy it
#[tokio::test]
async fn test_skipped_dependency_blocks_dependents() {
    let agent = Arc::new(ScriptedAgent::new("worker", |task, _| {
        if task.objective == "a" {
            Ok(AgentTurn::new(TurnOutcome::Skipped("not needed".to_string())))
        } else {
            Ok(AgentTurn::completed(json!(null)))
        }
    }));
    let flow = flow_with(agent);
    let a = Task::new("a");
    let b = Task::new("b").depends_on(a.id);
    let (id_a, id_b) = (a.id, b.id);
    flow.add_task(a).unwrap();
    flow.add_task(b).unwrap();

    let report = flow.run(None).await.unwrap();

    assert_eq!(report.skipped, vec![id_a]);
    assert_eq!(report.blocked, vec![id_b]);
    assert_eq!(report.status, RunStatus::Deadlocked);
}

/// Test: Tasks added between runs are picked up
#[tokio::test]
async fn test_tasks_added_between_runs() {
    let agent = Arc::new(ScriptedAgent::completing("worker"));
    let flow = flow_with(Arc::clone(&agent));
    let first = Task::new("first");
    let first_id = first.id;
    flow.add_task(first).unwrap();
    assert!(flow.run(None).await.unwrap().is_complete());

    let second = Task::new("second").depends_on(first_id);
    let second_id = flow.add_task(second).unwrap();
    let report = flow.run(None).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.steps, 1);
    assert_eq!(agent.calls(&first_id), 1);
    assert_eq!(agent.calls(&second_id), 1);
}

/// Test: The event log records every transition with its agent events
#[tokio::test]
async fn test_event_log_records_transitions() {
    let agent = Arc::new(ScriptedAgent::new("worker", |task, _| {
        Ok(AgentTurn::completed(json!(1))
            .with_event(Event::message(Role::Agent, format!("did {}", task.objective))))
    }));
    let flow = flow_with(agent);
    let ids = fan_out(&flow);

    flow.run(None).await.unwrap();

    let changes: Vec<(String, String)> = flow
        .get_events(EventFilter::new().of_type("task_status_changed"))
        .unwrap()
        .into_iter()
        .filter_map(|e| match &e.kind {
            EventKind::TaskStatusChanged { from, to, .. } => Some((from.clone(), to.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(changes.len(), 6);
    assert!(changes
        .iter()
        .all(|(from, to)| (from == "pending" && to == "running") || (from == "running" && to == "completed")));

    let for_b = flow
        .get_events(EventFilter::new().task(&flow.task(&ids.b).unwrap()))
        .unwrap();
    assert_eq!(for_b.len(), 3);
}

/// Test: The blocking entry point works outside a runtime
#[test]
fn test_run_blocking() {
    let flow = flow_with(Arc::new(ScriptedAgent::completing("worker")));
    fan_out(&flow);
    let report = flow.run_blocking(None).unwrap();
    assert!(report.is_complete());
}
