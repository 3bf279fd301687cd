//! Orchestration layer for flowgraph.
//!
//! This module drives a flow's task graph: the [`Orchestrator`] step loop,
//! the [`AgentContext`] each dispatch receives, and the retry policy for
//! transient dispatch failures.

mod context;
mod orchestrator;
mod retry;

pub use context::AgentContext;
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunReport, RunStatus};
pub use retry::RetryPolicy;
