//! Step loop that drives a flow's task graph to completion.
//!
//! Each iteration selects ready work from the graph, dispatches it to the
//! tasks' agents, and writes the outcomes back through the flow. The loop
//! is the only writer of task status.

use crate::agent::{Agent, AgentTurn, DispatchError, TurnOutcome};
use crate::config::Config;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::flow::session::Transition;
use crate::flow::Flow;
use crate::orchestration::context::AgentContext;
use crate::orchestration::retry::RetryPolicy;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Tuning for the step loop, normally derived from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Ready tasks dispatched per step.
    pub max_parallel: usize,
    /// Budget used when `run` is called without one.
    pub default_steps: Option<usize>,
    /// Recent events included in each agent context.
    pub event_limit: usize,
    pub trace_spans: bool,
    pub dispatch_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_parallel: config.max_parallel.max(1),
            default_steps: config.default_steps,
            event_limit: config.event_limit,
            trace_spans: config.trace_spans,
            dispatch_timeout: config.dispatch_timeout_ms.map(Duration::from_millis),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task completed or was skipped.
    Completed,
    /// Every task finished, but at least one failed.
    Failed,
    /// Unfinished tasks remain that can never become ready.
    Deadlocked,
    /// The step budget ran out with work still available.
    BudgetExhausted,
    Cancelled,
}

/// Summary of one call to [`Orchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Steps consumed by this run.
    pub steps: usize,
    pub status: RunStatus,
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
    /// Unstarted tasks that can never run because an upstream task failed
    /// or was skipped.
    pub blocked: Vec<TaskId>,
}

impl RunReport {
    /// True when the graph reached full completion.
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// A task that has been started and is about to be handed to its agent.
struct Dispatch {
    task: Task,
    agent: Arc<dyn Agent>,
    context: AgentContext,
}

/// Drives one flow's tasks through their agents.
pub struct Orchestrator {
    flow: Arc<Flow>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(flow: Arc<Flow>) -> Self {
        Self {
            flow,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run at the next step boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    fn config(&self) -> &OrchestratorConfig {
        self.flow.config()
    }

    /// Run for at most `steps` iterations, or the configured default.
    ///
    /// Cancellation and the budget are checked between steps; dispatches
    /// already in flight always finish. Runs can be resumed by calling
    /// `run` again.
    pub async fn run(&self, steps: Option<usize>) -> Result<RunReport> {
        let span = if self.config().trace_spans {
            self.flow.span()
        } else {
            tracing::Span::none()
        };
        self.run_steps(steps.or(self.config().default_steps))
            .instrument(span)
            .await
    }

    /// Blocking form of [`Orchestrator::run`] on a private current-thread
    /// runtime. Must not be called from inside a tokio runtime.
    pub fn run_blocking(&self, steps: Option<usize>) -> Result<RunReport> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        runtime.block_on(self.run(steps))
    }

    async fn run_steps(&self, budget: Option<usize>) -> Result<RunReport> {
        let _run = self.flow.lock_runs().await;
        let mut taken = 0;
        info!(budget = ?budget, "Starting run");

        loop {
            if self.cancel.is_cancelled() {
                info!(steps = taken, "Run cancelled");
                return Ok(self.report(taken, RunStatus::Cancelled));
            }

            let selected = self.select();
            if selected.is_empty() {
                let status = self.terminal_status();
                info!(steps = taken, status = ?status, "Run finished");
                return Ok(self.report(taken, status));
            }

            if budget.is_some_and(|budget| taken >= budget) {
                info!(steps = taken, "Step budget exhausted");
                return Ok(self.report(taken, RunStatus::BudgetExhausted));
            }

            self.step(taken, selected).await?;
            taken += 1;
        }
    }

    /// Running tasks first, then newly ready ones, capped at `max_parallel`.
    fn select(&self) -> Vec<Task> {
        let limit = self.config().max_parallel.max(1);
        self.flow.with_graph(|dag| {
            dag.running_tasks()
                .into_iter()
                .chain(dag.ready_tasks())
                .take(limit)
                .cloned()
                .collect()
        })
    }

    fn terminal_status(&self) -> RunStatus {
        self.flow.with_graph(|dag| {
            if dag.all_complete() {
                RunStatus::Completed
            } else if dag.blocked_tasks().is_empty() {
                RunStatus::Failed
            } else {
                RunStatus::Deadlocked
            }
        })
    }

    /// Prepare, dispatch and apply one batch. Every outcome is written back
    /// before the first write error is returned.
    async fn step(&self, step: usize, selected: Vec<Task>) -> Result<()> {
        debug!(step, tasks = selected.len(), "Dispatching step");

        let mut first_error = None;
        let mut dispatches = Vec::with_capacity(selected.len());
        for task in selected {
            match self.prepare(task) {
                Ok(Some(dispatch)) => dispatches.push(dispatch),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let results = join_all(dispatches.iter().map(|d| self.dispatch(d))).await;

        for (dispatch, result) in dispatches.iter().zip(results) {
            if let Err(e) = self.apply(dispatch, result) {
                warn!(task_id = %dispatch.task.id.short(), error = %e, "Failed to record outcome");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolve the agent, mark the task running, and build its context.
    ///
    /// Returns `None` when the task failed before it could be dispatched.
    fn prepare(&self, task: Task) -> Result<Option<Dispatch>> {
        let agent = match self.flow.resolve_agent(&task) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(task_id = %task.id.short(), error = %e, "No agent for task");
                self.flow
                    .transition(&task.id, Transition::Fail(e.to_string()), None, Vec::new())?;
                return Ok(None);
            }
        };

        match self
            .flow
            .transition(&task.id, Transition::Start, Some(agent.id()), Vec::new())
        {
            Ok(_) => {}
            Err(Error::InvalidTransition { from, .. }) => {
                debug!(task_id = %task.id.short(), status = from, "Task no longer startable");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        let task = self.flow.task(&task.id).ok_or(Error::TaskNotFound(task.id))?;

        let context =
            match AgentContext::build(&self.flow, &task, agent.as_ref(), self.config().event_limit) {
                Ok(context) => context,
                Err(e) => {
                    warn!(task_id = %task.id.short(), error = %e, "Failed to build agent context");
                    self.flow.transition(
                        &task.id,
                        Transition::Fail(e.to_string()),
                        Some(agent.id()),
                        Vec::new(),
                    )?;
                    return Ok(None);
                }
            };

        info!(task_id = %task.id.short(), agent = agent.name(), objective = %task.objective, "Dispatching task");
        Ok(Some(Dispatch {
            task,
            agent,
            context,
        }))
    }

    async fn dispatch(&self, dispatch: &Dispatch) -> std::result::Result<AgentTurn, DispatchError> {
        let timeout = self.config().dispatch_timeout;
        self.config()
            .retry
            .run(move |_| async move {
                let turn = dispatch.agent.run(&dispatch.task, &dispatch.context);
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, turn)
                        .await
                        .unwrap_or_else(|_| Err(DispatchError::transient(Error::Timeout(limit).to_string()))),
                    None => turn.await,
                }
            })
            .await
    }

    fn apply(
        &self,
        dispatch: &Dispatch,
        result: std::result::Result<AgentTurn, DispatchError>,
    ) -> Result<TaskStatus> {
        let task_id = dispatch.task.id;
        let (transition, events) = match result {
            Ok(turn) => {
                let transition = match turn.outcome {
                    TurnOutcome::Completed(value) => Transition::Complete(value),
                    TurnOutcome::Failed(error) => Transition::Fail(error),
                    TurnOutcome::Skipped(reason) => Transition::Skip(reason),
                    TurnOutcome::Continue => Transition::Continue,
                };
                (transition, turn.events)
            }
            Err(e) => {
                let error = Error::Dispatch {
                    task: task_id,
                    message: e.message,
                };
                warn!(task_id = %task_id.short(), error = %error, "Dispatch failed");
                (Transition::Fail(error.to_string()), Vec::new())
            }
        };

        let status = self
            .flow
            .transition(&task_id, transition, Some(dispatch.agent.id()), events)?;
        info!(task_id = %task_id.short(), status = %status, "Task updated");
        Ok(status)
    }

    fn report(&self, steps: usize, status: RunStatus) -> RunReport {
        self.flow.with_graph(|dag| {
            let order = dag.topological_order();
            RunReport {
                steps,
                status,
                completed: ids_where(&order, |s| *s == TaskStatus::Completed),
                failed: ids_where(&order, |s| matches!(s, TaskStatus::Failed { .. })),
                skipped: ids_where(&order, |s| matches!(s, TaskStatus::Skipped { .. })),
                blocked: dag.blocked_tasks().iter().map(|task| task.id).collect(),
            }
        })
    }
}

fn ids_where(tasks: &[&Task], pred: impl Fn(&TaskStatus) -> bool) -> Vec<TaskId> {
    tasks
        .iter()
        .filter(|task| pred(&task.status))
        .map(|task| task.id)
        .collect()
}
