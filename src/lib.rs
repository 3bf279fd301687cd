//! flowgraph: dependency-ordered task execution for agent flows.
//!
//! A [`flow::Flow`] owns an event thread and a task graph. The
//! [`orchestration::Orchestrator`] walks that graph in bounded steps,
//! dispatching ready tasks to agents and recording what happened.

pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod flow;
pub mod log;
pub mod orchestration;
pub mod plan;
pub mod prompt;

pub use error::{Error, Result};
