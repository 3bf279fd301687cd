//! Agents: the opaque workers tasks are dispatched to.
//!
//! An agent receives a task plus its rendered [`AgentContext`], may emit
//! events, and reports how its turn ended. Reasoning and model calls live
//! behind this trait.

use crate::core::task::Task;
use crate::events::{Event, Role};
use crate::orchestration::AgentContext;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tool made available to every agent in a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// How an agent's turn on a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The task is done, with its result payload.
    Completed(Value),
    /// The task cannot be done.
    Failed(String),
    /// The task does not need doing.
    Skipped(String),
    /// More turns are needed; the task stays running.
    Continue,
}

/// Everything an agent produced in one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTurn {
    pub events: Vec<Event>,
    pub outcome: TurnOutcome,
}

impl AgentTurn {
    pub fn new(outcome: TurnOutcome) -> Self {
        Self {
            events: Vec::new(),
            outcome,
        }
    }

    pub fn completed(result: Value) -> Self {
        Self::new(TurnOutcome::Completed(result))
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::new(TurnOutcome::Failed(error.into()))
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }
}

/// An agent invocation that raised instead of reporting an outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DispatchError {
    pub message: String,
    /// Transient failures (rate limits, tool hiccups) are retried.
    pub retryable: bool,
}

impl DispatchError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// A worker that tasks are dispatched to.
pub trait Agent: Send + Sync {
    fn id(&self) -> AgentId;

    fn name(&self) -> &str;

    /// Standing instructions rendered into the agent's prompt.
    fn instructions(&self) -> Option<&str> {
        None
    }

    /// Take one turn on `task`.
    fn run<'a>(
        &'a self,
        task: &'a Task,
        context: &'a AgentContext,
    ) -> BoxFuture<'a, std::result::Result<AgentTurn, DispatchError>>;
}

/// Agent that completes every task without doing any work.
///
/// The result records what the agent was asked, which makes it useful for
/// checking a plan's ordering and prompts before wiring in a real agent.
pub struct DryRunAgent {
    id: AgentId,
    name: String,
}

impl DryRunAgent {
    pub fn new(name: &str) -> Self {
        Self {
            id: AgentId::new(),
            name: name.to_string(),
        }
    }
}

impl Default for DryRunAgent {
    fn default() -> Self {
        Self::new("dry-run")
    }
}

impl Agent for DryRunAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(
        &'a self,
        task: &'a Task,
        context: &'a AgentContext,
    ) -> BoxFuture<'a, std::result::Result<AgentTurn, DispatchError>> {
        Box::pin(async move {
            let upstream: Vec<String> = context
                .upstream
                .iter()
                .map(|t| t.objective.clone())
                .collect();
            let summary = format!("dry run of '{}'", task.objective);
            Ok(AgentTurn::completed(json!({
                "objective": task.objective,
                "upstream": upstream,
                "prompt_chars": context.prompt.chars().count(),
            }))
            .with_event(Event::message(Role::Agent, summary)))
        })
    }
}
