//! Event records appended to a flow's thread.
//!
//! Events represent immutable facts that happened while a flow executed.
//! Callers build an [`Event`]; once appended, the history wraps it in a
//! [`StoredEvent`] carrying its monotonic id and thread.

use crate::agent::AgentId;
use crate::core::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Partition key for the event log, one per flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Generate a fresh thread id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Monotonic event identifier, usable as a pagination cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A message from a user, agent or the system.
    Message { role: Role, content: String },
    /// An agent invoked a tool.
    ToolCall { tool: String, arguments: Value },
    /// A tool returned.
    ToolResult {
        tool: String,
        result: Value,
        #[serde(default)]
        is_error: bool,
    },
    /// A task moved between lifecycle states.
    TaskStatusChanged {
        task_id: TaskId,
        from: String,
        to: String,
        #[serde(default)]
        detail: Option<String>,
    },
    /// A note from the orchestrator itself (dispatch failures, retries).
    OrchestratorMessage { content: String },
}

impl EventKind {
    /// Stable type name, matched by the `types` query filter.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::Message { .. } => "message",
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::ToolResult { .. } => "tool_result",
            EventKind::TaskStatusChanged { .. } => "task_status_changed",
            EventKind::OrchestratorMessage { .. } => "orchestrator_message",
        }
    }
}

/// An event as submitted for appending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(default)]
    pub agent_ids: Vec<AgentId>,
    #[serde(default)]
    pub task_ids: Vec<TaskId>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            agent_ids: Vec::new(),
            task_ids: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a message event.
    pub fn message(role: Role, content: impl Into<String>) -> Self {
        Self::new(EventKind::Message {
            role,
            content: content.into(),
        })
    }

    /// Create a tool call event.
    pub fn tool_call(tool: impl Into<String>, arguments: Value) -> Self {
        Self::new(EventKind::ToolCall {
            tool: tool.into(),
            arguments,
        })
    }

    /// Create a tool result event.
    pub fn tool_result(tool: impl Into<String>, result: Value, is_error: bool) -> Self {
        Self::new(EventKind::ToolResult {
            tool: tool.into(),
            result,
            is_error,
        })
    }

    /// Create an orchestrator note.
    pub fn orchestrator(content: impl Into<String>) -> Self {
        Self::new(EventKind::OrchestratorMessage {
            content: content.into(),
        })
    }

    /// Tag the event with an agent.
    pub fn with_agent(mut self, agent: AgentId) -> Self {
        if !self.agent_ids.contains(&agent) {
            self.agent_ids.push(agent);
        }
        self
    }

    /// Tag the event with a task.
    pub fn with_task(mut self, task: TaskId) -> Self {
        if !self.task_ids.contains(&task) {
            self.task_ids.push(task);
        }
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// An event after it was appended to a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: EventId,
    pub thread_id: ThreadId,
    #[serde(flatten)]
    pub event: Event,
}

impl std::ops::Deref for StoredEvent {
    type Target = Event;

    fn deref(&self) -> &Event {
        &self.event
    }
}
