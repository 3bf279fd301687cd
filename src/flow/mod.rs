//! Flows: sessions that own a thread of events and a task graph.
//!
//! A [`Flow`] is built inside a [`FlowContext`]; if another flow is active
//! in that context, the new flow starts from a copy of its events and
//! completed tasks.

pub mod context;
pub mod session;

pub use context::{FlowContext, FlowScope};
pub use session::{EventFilter, Flow, FlowBuilder};
