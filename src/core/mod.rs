//! Core domain models for flowgraph.
//!
//! This module contains the task type and the dependency graph that
//! orders tasks within a flow.

pub mod dag;
pub mod task;

pub use dag::TaskDAG;
pub use task::{Task, TaskId, TaskStatus};
