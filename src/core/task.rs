//! Task data model for the flow graph.
//!
//! Tasks are the units of work assigned to agents. Each task tracks its
//! status, its upstream dependencies, the agent it is assigned to and the
//! result or error it finished with.

use crate::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Unique identifier for a task within a flow.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// `Completed`, `Failed` and `Skipped` are terminal. Only `Completed`
/// satisfies a dependency of a downstream task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created, some dependency not yet complete.
    #[default]
    Pending,
    /// All dependencies complete, not yet dispatched.
    Ready,
    /// Dispatched to an agent, no terminal result yet.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Task was skipped by its agent.
    Skipped {
        /// Reason the task was skipped.
        reason: String,
    },
}

impl TaskStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::Skipped { .. }
        )
    }

    /// Short, payload-free label used in events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed { .. } => "failed",
            TaskStatus::Skipped { .. } => "skipped",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// A single task in the flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Short statement of what the task should achieve.
    pub objective: String,
    /// Detailed instructions for the agent.
    #[serde(default)]
    pub instructions: String,
    /// Current execution status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Tasks that must complete before this one can start.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Agent assigned to this task, if not the flow default.
    #[serde(default)]
    pub agent: Option<AgentId>,
    /// Result payload once completed.
    #[serde(default)]
    pub result: Option<Value>,
    /// Task-level inputs made visible to the agent.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was first dispatched.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with the given objective.
    pub fn new(objective: &str) -> Self {
        Self {
            id: TaskId::new(),
            objective: objective.to_string(),
            instructions: String::new(),
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
            agent: None,
            result: None,
            context: Map::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the instructions for the task.
    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = instructions.to_string();
        self
    }

    /// Declare a dependency on another task.
    pub fn depends_on(mut self, id: TaskId) -> Self {
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Assign an agent to this task.
    pub fn with_agent(mut self, agent: AgentId) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Add a task-level context entry.
    pub fn with_context(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    /// Mark the task as ready for execution.
    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    /// Start the task execution.
    ///
    /// Records the start time only on the first dispatch.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Mark the task as successfully completed with a result.
    pub fn complete(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as skipped.
    pub fn skip(&mut self, reason: &str) {
        self.status = TaskStatus::Skipped {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Check if the task completed successfully.
    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task can be started (Pending or Ready).
    pub fn can_start(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Ready)
    }
}
