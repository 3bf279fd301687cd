//! Prompt rendering for agent dispatches.
//!
//! Each entity that contributes to an agent's prompt implements
//! [`Template`]. Section layouts are Jinja templates rendered with
//! `minijinja`; the flow's own prompt is rendered through the same
//! environment with the flow, active task, closures and context in scope.
//! Rendering is a pure function of the entity and the [`AgentContext`];
//! nothing here touches graph state.

use crate::agent::{Agent, ToolSpec};
use crate::core::task::Task;
use crate::error::Result;
use crate::flow::Flow;
use crate::orchestration::AgentContext;
use minijinja::{context, AutoEscape, Environment};
use serde::Serialize;
use serde_json::{Map, Value};

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md.jinja");
const FLOW_TEMPLATE: &str = include_str!("prompts/flow.md.jinja");
const INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/instructions.md.jinja");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md.jinja");

/// Environment with every section template registered.
pub fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.add_template("agent", AGENT_TEMPLATE)?;
    env.add_template("flow", FLOW_TEMPLATE)?;
    env.add_template("instructions", INSTRUCTIONS_TEMPLATE)?;
    env.add_template("task", TASK_TEMPLATE)?;
    Ok(env)
}

/// Something that renders a section of an agent's prompt.
pub trait Template {
    /// Whether the section has anything to say.
    fn should_render(&self) -> bool {
        true
    }

    fn render(&self, env: &Environment<'_>) -> Result<String>;
}

/// Render every applicable template, separated by blank lines.
pub fn render_all(templates: &[&dyn Template]) -> Result<String> {
    let env = environment()?;
    let mut sections = Vec::with_capacity(templates.len());
    for template in templates.iter().filter(|t| t.should_render()) {
        let text = template.render(&env)?;
        let text = text.trim();
        if !text.is_empty() {
            sections.push(text.to_string());
        }
    }
    Ok(sections.join("\n\n"))
}

#[derive(Serialize)]
struct TaskView<'a> {
    id: String,
    short_id: String,
    objective: &'a str,
    instructions: &'a str,
    status: &'static str,
    result: Option<&'a Value>,
    context: &'a Map<String, Value>,
}

impl<'a> From<&'a Task> for TaskView<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            id: task.id.to_string(),
            short_id: task.id.short(),
            objective: &task.objective,
            instructions: &task.instructions,
            status: task.status.label(),
            result: task.result.as_ref(),
            context: &task.context,
        }
    }
}

#[derive(Serialize)]
struct FlowView<'a> {
    name: Option<&'a str>,
    description: Option<&'a str>,
    thread_id: String,
    instructions: &'a [String],
}

impl<'a> From<&'a Flow> for FlowView<'a> {
    fn from(flow: &'a Flow) -> Self {
        Self {
            name: flow.name(),
            description: flow.description(),
            thread_id: flow.thread_id().to_string(),
            instructions: flow.instructions(),
        }
    }
}

fn task_views(tasks: &[Task]) -> Vec<TaskView<'_>> {
    tasks.iter().map(TaskView::from).collect()
}

/// Variables visible to the flow template and the flow's own prompt.
/// Context keys come first so the named fields win on collision.
#[derive(Serialize)]
struct FlowScope<'a> {
    #[serde(flatten)]
    vars: &'a Map<String, Value>,
    flow: FlowView<'a>,
    task: TaskView<'a>,
    context: &'a Map<String, Value>,
    upstream_tasks: Vec<TaskView<'a>>,
    downstream_tasks: Vec<TaskView<'a>>,
    prompt: Option<String>,
}

/// The flow's description, prompt, and the active task's neighborhood.
pub struct FlowTemplate<'a> {
    flow: &'a Flow,
    context: &'a AgentContext,
}

impl<'a> FlowTemplate<'a> {
    pub fn new(flow: &'a Flow, context: &'a AgentContext) -> Self {
        Self { flow, context }
    }
}

impl Template for FlowTemplate<'_> {
    fn render(&self, env: &Environment<'_>) -> Result<String> {
        // Closures come from the context so every section sees the same graph.
        let mut scope = FlowScope {
            vars: &self.context.context,
            flow: FlowView::from(self.flow),
            task: TaskView::from(&self.context.task),
            context: &self.context.context,
            upstream_tasks: task_views(&self.context.upstream),
            downstream_tasks: task_views(&self.context.downstream),
            prompt: None,
        };

        if let Some(prompt) = self.flow.prompt() {
            scope.prompt = Some(env.render_str(prompt, &scope)?);
        }

        let rendered = env.get_template("flow")?.render(&scope)?;
        Ok(rendered)
    }
}

/// The task being worked on.
pub struct TaskTemplate<'a> {
    task: &'a Task,
    context: &'a AgentContext,
}

impl<'a> TaskTemplate<'a> {
    pub fn new(task: &'a Task, context: &'a AgentContext) -> Self {
        Self { task, context }
    }
}

impl Template for TaskTemplate<'_> {
    fn render(&self, env: &Environment<'_>) -> Result<String> {
        let rendered = env.get_template("task")?.render(context! {
            task => TaskView::from(self.task),
            context => &self.context.context,
        })?;
        Ok(rendered)
    }
}

#[derive(Serialize)]
struct AgentView<'a> {
    name: &'a str,
    instructions: Option<&'a str>,
}

/// Who the agent is and what it can use.
pub struct AgentTemplate<'a> {
    agent: &'a dyn Agent,
    context: &'a AgentContext,
}

impl<'a> AgentTemplate<'a> {
    pub fn new(agent: &'a dyn Agent, context: &'a AgentContext) -> Self {
        Self { agent, context }
    }
}

impl Template for AgentTemplate<'_> {
    fn render(&self, env: &Environment<'_>) -> Result<String> {
        let tools: &[ToolSpec] = &self.context.tools;
        let rendered = env.get_template("agent")?.render(context! {
            agent => AgentView {
                name: self.agent.name(),
                instructions: self.agent.instructions(),
            },
            tools => tools,
        })?;
        Ok(rendered)
    }
}

/// Standing instructions attached to the flow.
pub struct InstructionsTemplate<'a> {
    instructions: &'a [String],
}

impl<'a> InstructionsTemplate<'a> {
    pub fn new(instructions: &'a [String]) -> Self {
        Self { instructions }
    }
}

impl Template for InstructionsTemplate<'_> {
    fn should_render(&self) -> bool {
        !self.instructions.is_empty()
    }

    fn render(&self, env: &Environment<'_>) -> Result<String> {
        let rendered = env.get_template("instructions")?.render(context! {
            instructions => self.instructions,
        })?;
        Ok(rendered)
    }
}
