//! Integration test suite for flowgraph.
//!
//! These tests drive flows end to end through the public API: building
//! graphs, scoping and seeding flows, and running the orchestrator with
//! scripted agents.
//!
//! # Test Categories
//!
//! - `graph_properties`: Ordering and closure guarantees of the task graph
//! - `event_log`: History queries and pagination
//! - `flow_scoping`: Flow contexts and parent seeding
//! - `flow_execution`: Orchestrator runs, failures, budgets, cancellation

mod fixtures;

mod flow_execution;
mod flow_scoping;
