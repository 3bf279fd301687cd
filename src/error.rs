use thiserror::Error;

use crate::agent::AgentId;
use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task {task} depending on {dependency} would create a cycle")]
    Cycle { task: TaskId, dependency: TaskId },

    #[error("Task {task} depends on unknown task {dependency}")]
    DanglingDependency { task: TaskId, dependency: TaskId },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("No agent available for task {task}")]
    NoAgent { task: TaskId },

    #[error("Agent not registered: {id}")]
    AgentNotFound { id: AgentId },

    #[error("Dispatch of task {task} failed: {message}")]
    Dispatch { task: TaskId, message: String },

    #[error("Task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: TaskId,
        from: &'static str,
        to: &'static str,
    },

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("History error: {0}")]
    History(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
