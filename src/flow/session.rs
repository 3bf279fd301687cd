//! Flow: a bounded session owning one event thread and one task graph.

use crate::agent::{Agent, AgentId, ToolSpec};
use crate::core::dag::TaskDAG;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::events::{Event, EventId, EventKind, EventQuery, History, InMemoryHistory, StoredEvent, ThreadId};
use crate::flow::context::FlowContext;
use crate::orchestration::{AgentContext, Orchestrator, OrchestratorConfig, RunReport};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Filters for [`Flow::get_events`], scoped to the flow's thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub agents: Vec<AgentId>,
    pub tasks: Vec<TaskId>,
    pub before_id: Option<EventId>,
    pub after_id: Option<EventId>,
    pub limit: Option<usize>,
    pub types: Vec<String>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, agent: &dyn Agent) -> Self {
        self.agents.push(agent.id());
        self
    }

    pub fn task(mut self, task: &Task) -> Self {
        self.tasks.push(task.id);
        self
    }

    pub fn before(mut self, id: EventId) -> Self {
        self.before_id = Some(id);
        self
    }

    pub fn after(mut self, id: EventId) -> Self {
        self.after_id = Some(id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn of_type(mut self, type_name: &str) -> Self {
        self.types.push(type_name.to_string());
        self
    }

    fn into_query(self, thread_id: &ThreadId) -> EventQuery {
        EventQuery {
            thread_id: thread_id.clone(),
            agent_ids: self.agents,
            task_ids: self.tasks,
            before_id: self.before_id,
            after_id: self.after_id,
            limit: self.limit,
            types: self.types,
        }
    }
}

/// A state change applied by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Transition {
    Start,
    Complete(Value),
    Fail(String),
    Skip(String),
    /// Non-terminal turn: record events, keep the task running.
    Continue,
}

/// A bounded session scoping one thread of event history and one task graph.
///
/// Flows are shared as `Arc<Flow>`. Reads of the graph take a read lock for
/// the duration of one call. Writes (task insertion, status transitions,
/// event appends) go through a per-flow critical section, so a reader never
/// sees a transition without the events recorded with it. At most one
/// orchestrator run drives a flow at a time; concurrent `run` calls queue.
pub struct Flow {
    thread_id: ThreadId,
    name: Option<String>,
    description: Option<String>,
    history: Arc<dyn History>,
    agent: Option<Arc<dyn Agent>>,
    agents: HashMap<AgentId, Arc<dyn Agent>>,
    tools: Vec<ToolSpec>,
    prompt: Option<String>,
    instructions: Vec<String>,
    context: Map<String, Value>,
    config: OrchestratorConfig,
    graph: RwLock<TaskDAG>,
    writes: Mutex<()>,
    runs: tokio::sync::Mutex<()>,
}

impl Flow {
    /// Start building a flow.
    pub fn builder() -> FlowBuilder {
        FlowBuilder::default()
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn instructions(&self) -> &[String] {
        &self.instructions
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<dyn History> {
        &self.history
    }

    /// The agent used for tasks that don't name one.
    pub fn default_agent(&self) -> Option<&Arc<dyn Agent>> {
        self.agent.as_ref()
    }

    /// Look up an agent registered with the flow, including the default.
    pub fn agent(&self, id: &AgentId) -> Option<&Arc<dyn Agent>> {
        self.agents
            .get(id)
            .or_else(|| self.agent.as_ref().filter(|a| a.id() == *id))
    }

    /// The agent a task runs with: its own, else the flow default.
    pub fn resolve_agent(&self, task: &Task) -> Result<Arc<dyn Agent>> {
        match task.agent {
            Some(id) => self
                .agent(&id)
                .cloned()
                .ok_or(Error::AgentNotFound { id }),
            None => self
                .agent
                .clone()
                .ok_or(Error::NoAgent { task: task.id }),
        }
    }

    /// A tracing span named for this flow.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "flow",
            thread_id = %self.thread_id,
            name = self.name.as_deref().unwrap_or("")
        )
    }

    fn read_graph(&self) -> RwLockReadGuard<'_, TaskDAG> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_graph(&self) -> RwLockWriteGuard<'_, TaskDAG> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive right to drive this flow's tasks, held for a whole run.
    pub(crate) async fn lock_runs(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.runs.lock().await
    }

    /// Run `f` against a consistent view of the graph.
    pub fn with_graph<R>(&self, f: impl FnOnce(&TaskDAG) -> R) -> R {
        f(&self.read_graph())
    }

    // ========== Tasks ==========

    /// Register a task in the flow's graph.
    ///
    /// # Errors
    /// Fails with `Error::DanglingDependency` or `Error::Cycle` and leaves
    /// the graph unchanged.
    pub fn add_task(&self, task: Task) -> Result<TaskId> {
        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let id = task.id;
        self.write_graph().add_task(task)?;
        tracing::debug!(thread_id = %self.thread_id, task_id = %id.short(), "Task added");
        Ok(id)
    }

    /// Declare that `to` depends on `from`.
    pub fn add_dependency(&self, from: &TaskId, to: &TaskId) -> Result<()> {
        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_graph().add_dependency(from, to)
    }

    /// All tasks in topological order.
    pub fn tasks(&self) -> Vec<Task> {
        self.read_graph()
            .topological_order()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.read_graph().get_task(id).cloned()
    }

    pub fn upstream_tasks(&self, ids: &[TaskId]) -> Vec<Task> {
        self.read_graph()
            .upstream_tasks(ids)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn downstream_tasks(&self, ids: &[TaskId]) -> Vec<Task> {
        self.read_graph()
            .downstream_tasks(ids)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Upstream and downstream closures taken from the same graph state.
    pub fn closures(&self, ids: &[TaskId]) -> (Vec<Task>, Vec<Task>) {
        let graph = self.read_graph();
        let upstream = graph.upstream_tasks(ids).into_iter().cloned().collect();
        let downstream = graph.downstream_tasks(ids).into_iter().cloned().collect();
        (upstream, downstream)
    }

    // ========== Events ==========

    /// Query this flow's thread.
    pub fn get_events(&self, filter: EventFilter) -> Result<Vec<StoredEvent>> {
        self.history.query(&filter.into_query(&self.thread_id))
    }

    /// The most recent `limit` events on this thread.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        self.get_events(EventFilter::new().limit(limit))
    }

    /// Append events to this flow's thread in submission order.
    pub fn add_events(&self, events: Vec<Event>) -> Result<Vec<EventId>> {
        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::trace!(thread_id = %self.thread_id, count = events.len(), "Appending events");
        self.history.append(&self.thread_id, events)
    }

    // ========== Orchestration ==========

    /// Apply a state change and its events as one write.
    ///
    /// The events are appended before the new status is stored, so a failed
    /// append leaves the task exactly as it was.
    pub(crate) fn transition(
        &self,
        task_id: &TaskId,
        transition: Transition,
        agent: Option<AgentId>,
        mut events: Vec<Event>,
    ) -> Result<TaskStatus> {
        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut task = self
            .read_graph()
            .get_task(task_id)
            .cloned()
            .ok_or(Error::TaskNotFound(*task_id))?;

        let from = task.status.clone();
        let mut detail = None;
        match &transition {
            Transition::Start => {
                // Running tasks are resumed after a `Continue` turn.
                if !task.can_start() && from != TaskStatus::Running {
                    return Err(Error::InvalidTransition {
                        task: *task_id,
                        from: from.label(),
                        to: TaskStatus::Running.label(),
                    });
                }
                task.start();
            }
            Transition::Complete(result) => task.complete(result.clone()),
            Transition::Fail(error) => {
                task.fail(error);
                detail = Some(error.clone());
                events.push(Event::orchestrator(format!(
                    "Task {} failed: {}",
                    task_id.short(),
                    error
                )));
            }
            Transition::Skip(reason) => {
                task.skip(reason);
                detail = Some(reason.clone());
            }
            Transition::Continue => {}
        }
        let to = task.status.clone();

        if from != to {
            events.push(Event::new(EventKind::TaskStatusChanged {
                task_id: *task_id,
                from: from.label().to_string(),
                to: to.label().to_string(),
                detail,
            }));
        }

        let events: Vec<Event> = events
            .into_iter()
            .map(|event| {
                let event = event.with_task(*task_id);
                match agent {
                    Some(agent) => event.with_agent(agent),
                    None => event,
                }
            })
            .collect();

        if !events.is_empty() {
            self.history.append(&self.thread_id, events)?;
        }

        if let Some(stored) = self.write_graph().get_task_mut(task_id) {
            *stored = task;
        }
        Ok(to)
    }

    /// Render the flow-level prompt for an agent.
    ///
    /// The flow's prompt is a Jinja template with `flow`, `task`, `context`,
    /// `upstream_tasks` and `downstream_tasks` in scope; context keys are
    /// also available at the top level.
    pub fn get_prompt(&self, context: &AgentContext) -> Result<String> {
        use crate::prompt::{environment, FlowTemplate, Template};
        FlowTemplate::new(self, context).render(&environment()?)
    }

    /// Run the flow's tasks for at most `steps` orchestrator steps.
    pub async fn run(self: &Arc<Self>, steps: Option<usize>) -> Result<RunReport> {
        Orchestrator::new(Arc::clone(self)).run(steps).await
    }

    /// Blocking form of [`Flow::run`].
    pub fn run_blocking(self: &Arc<Self>, steps: Option<usize>) -> Result<RunReport> {
        Orchestrator::new(Arc::clone(self)).run_blocking(steps)
    }

    /// Copy the parent's visible events and completed tasks into this flow.
    ///
    /// Copied tasks keep their id and result. Their dependency lists are
    /// dropped since the upstream tasks may not be copied.
    fn seed_from(&self, parent: &Flow) -> Result<()> {
        let events: Vec<Event> = parent
            .get_events(EventFilter::new())?
            .into_iter()
            .map(|stored| stored.event)
            .collect();
        let event_count = events.len();
        if !events.is_empty() {
            self.add_events(events)?;
        }

        let mut task_count = 0;
        for mut task in parent.tasks().into_iter().filter(Task::is_complete) {
            task.depends_on.clear();
            self.add_task(task)?;
            task_count += 1;
        }

        tracing::debug!(
            parent = %parent.thread_id,
            child = %self.thread_id,
            events = event_count,
            tasks = task_count,
            "Seeded flow from parent"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("thread_id", &self.thread_id)
            .field("name", &self.name)
            .field("graph", &*self.read_graph())
            .finish()
    }
}

/// Builder for [`Flow`].
pub struct FlowBuilder {
    name: Option<String>,
    description: Option<String>,
    history: Option<Arc<dyn History>>,
    agent: Option<Arc<dyn Agent>>,
    agents: Vec<Arc<dyn Agent>>,
    tools: Vec<ToolSpec>,
    prompt: Option<String>,
    instructions: Vec<String>,
    context: Map<String, Value>,
    config: OrchestratorConfig,
    copy_parent: bool,
}

impl Default for FlowBuilder {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            history: None,
            agent: None,
            agents: Vec::new(),
            tools: Vec::new(),
            prompt: None,
            instructions: Vec::new(),
            context: Map::new(),
            config: OrchestratorConfig::default(),
            copy_parent: true,
        }
    }
}

impl FlowBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Event log to use. Defaults to the parent's history when one is
    /// active, else a fresh in-memory history.
    pub fn history(mut self, history: Arc<dyn History>) -> Self {
        self.history = Some(history);
        self
    }

    /// Default agent for tasks that don't name one.
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Register an additional agent that tasks can name.
    pub fn register_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    /// Flow prompt, rendered as a Jinja template for each dispatch.
    pub fn prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }

    pub fn instruction(mut self, instruction: &str) -> Self {
        self.instructions.push(instruction.to_string());
        self
    }

    pub fn context(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether to seed from the active parent flow (default `true`).
    pub fn copy_parent(mut self, copy_parent: bool) -> Self {
        self.copy_parent = copy_parent;
        self
    }

    /// Build the flow, seeding it from `ctx`'s active flow if enabled.
    pub fn build(self, ctx: &FlowContext) -> Result<Arc<Flow>> {
        let parent = if self.copy_parent {
            ctx.current().cloned()
        } else {
            None
        };
        let parent_history = ctx.current().map(|p| Arc::clone(p.history()));

        let flow = self.into_flow(parent_history);
        if let Some(parent) = parent {
            flow.seed_from(&parent)?;
        }
        Ok(Arc::new(flow))
    }

    /// Build a flow with no parent.
    pub fn build_detached(self) -> Arc<Flow> {
        Arc::new(self.into_flow(None))
    }

    fn into_flow(self, parent_history: Option<Arc<dyn History>>) -> Flow {
        let history = self
            .history
            .or(parent_history)
            .unwrap_or_else(|| Arc::new(InMemoryHistory::new()));
        let agents = self.agents.into_iter().map(|a| (a.id(), a)).collect();

        Flow {
            thread_id: ThreadId::new(),
            name: self.name,
            description: self.description,
            history,
            agent: self.agent,
            agents,
            tools: self.tools,
            prompt: self.prompt,
            instructions: self.instructions,
            context: self.context,
            config: self.config,
            graph: RwLock::new(TaskDAG::new()),
            writes: Mutex::new(()),
            runs: tokio::sync::Mutex::new(()),
        }
    }
}
