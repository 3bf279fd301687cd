//! Execution context handed to an agent for one dispatch.

use crate::agent::{Agent, ToolSpec};
use crate::core::task::Task;
use crate::error::Result;
use crate::events::{StoredEvent, ThreadId};
use crate::flow::Flow;
use crate::prompt::{render_all, AgentTemplate, FlowTemplate, InstructionsTemplate, TaskTemplate};
use serde_json::{Map, Value};

/// What an agent sees when it takes a turn on a task.
///
/// Built from one consistent read of the flow's graph; the closures do not
/// change while the agent runs even if other tasks finish meanwhile.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub thread_id: ThreadId,
    pub flow_name: Option<String>,
    /// The task being worked on.
    pub task: Task,
    /// Tasks the active task transitively depends on.
    pub upstream: Vec<Task>,
    /// Tasks that transitively depend on the active task.
    pub downstream: Vec<Task>,
    /// Recent events on the flow's thread, oldest first.
    pub events: Vec<StoredEvent>,
    pub tools: Vec<ToolSpec>,
    /// The flow's key/value context bag.
    pub context: Map<String, Value>,
    pub agent_name: String,
    /// Fully rendered prompt.
    pub prompt: String,
}

impl AgentContext {
    /// Gather the context for `task` and render its prompt.
    pub fn build(flow: &Flow, task: &Task, agent: &dyn Agent, event_limit: usize) -> Result<Self> {
        let (upstream, downstream) = flow.closures(&[task.id]);
        let events = flow.recent_events(event_limit)?;

        let mut context = Self {
            thread_id: flow.thread_id().clone(),
            flow_name: flow.name().map(str::to_string),
            task: task.clone(),
            upstream,
            downstream,
            events,
            tools: flow.tools().to_vec(),
            context: flow.context().clone(),
            agent_name: agent.name().to_string(),
            prompt: String::new(),
        };

        let prompt = render_all(&[
            &AgentTemplate::new(agent, &context),
            &InstructionsTemplate::new(flow.instructions()),
            &FlowTemplate::new(flow, &context),
            &TaskTemplate::new(task, &context),
        ])?;
        context.prompt = prompt;
        Ok(context)
    }

    #[cfg(test)]
    pub(crate) fn for_test(task: Task) -> Self {
        Self {
            thread_id: ThreadId::new(),
            flow_name: None,
            task,
            upstream: Vec::new(),
            downstream: Vec::new(),
            events: Vec::new(),
            tools: Vec::new(),
            context: Map::new(),
            agent_name: "test".to_string(),
            prompt: String::new(),
        }
    }
}
