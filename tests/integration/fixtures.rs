//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted agents with call counting and concurrency tracking
//! - Predefined task graphs

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use flowgraph::agent::{Agent, AgentId, AgentTurn, DispatchError};
use flowgraph::core::task::{Task, TaskId};
use flowgraph::flow::Flow;
use flowgraph::orchestration::{AgentContext, OrchestratorConfig, RetryPolicy};

pub type TurnResult = Result<AgentTurn, DispatchError>;

type Script = Box<dyn Fn(&Task, u32) -> TurnResult + Send + Sync>;

/// Agent whose turns are produced by a script of (task, call number).
pub struct ScriptedAgent {
    id: AgentId,
    name: String,
    script: Script,
    delay: Option<Duration>,
    calls: Mutex<HashMap<TaskId, u32>>,
    order: Mutex<Vec<TaskId>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(name: &str, script: impl Fn(&Task, u32) -> TurnResult + Send + Sync + 'static) -> Self {
        Self {
            id: AgentId::new(),
            name: name.to_string(),
            script: Box::new(script),
            delay: None,
            calls: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Completes every task with its objective as the result.
    pub fn completing(name: &str) -> Self {
        Self::new(name, |task, _| Ok(AgentTurn::completed(json!(task.objective))))
    }

    /// Fails the task with the given objective, completes the rest.
    pub fn failing_on(name: &str, objective: &'static str) -> Self {
        Self::new(name, move |task, _| {
            if task.objective == objective {
                Ok(AgentTurn::failed(format!("{} failed", objective)))
            } else {
                Ok(AgentTurn::completed(json!(task.objective)))
            }
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, id: &TaskId) -> u32 {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    /// Task ids in the order their dispatches started.
    pub fn order(&self) -> Vec<TaskId> {
        self.order.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Agent for ScriptedAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, task: &'a Task, _context: &'a AgentContext) -> BoxFuture<'a, TurnResult> {
        Box::pin(async move {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(task.id).or_insert(0);
                *count += 1;
                *count - 1
            };
            self.order.lock().unwrap().push(task.id);

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            (self.script)(task, call)
        })
    }
}

/// Config without spans or retries, so tests run fast and quietly.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        trace_spans: false,
        retry: RetryPolicy::none(),
        ..OrchestratorConfig::default()
    }
}

pub fn flow_with(agent: Arc<ScriptedAgent>) -> Arc<Flow> {
    Flow::builder()
        .name("integration")
        .agent(agent)
        .config(test_config())
        .build_detached()
}

/// A with two dependents B and C.
pub struct FanOut {
    pub a: TaskId,
    pub b: TaskId,
    pub c: TaskId,
}

pub fn fan_out(flow: &Flow) -> FanOut {
    let a = Task::new("a");
    let b = Task::new("b").depends_on(a.id);
    let c = Task::new("c").depends_on(a.id);
    let ids = FanOut {
        a: a.id,
        b: b.id,
        c: c.id,
    };
    flow.add_task(a).unwrap();
    flow.add_task(b).unwrap();
    flow.add_task(c).unwrap();
    ids
}

/// A -> B -> C.
pub fn chain(flow: &Flow) -> [TaskId; 3] {
    let a = Task::new("a");
    let b = Task::new("b").depends_on(a.id);
    let c = Task::new("c").depends_on(b.id);
    let ids = [a.id, b.id, c.id];
    flow.add_task(a).unwrap();
    flow.add_task(b).unwrap();
    flow.add_task(c).unwrap();
    ids
}
