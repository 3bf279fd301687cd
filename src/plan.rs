//! TOML plan files for the command line.
//!
//! A plan names its tasks and refers to dependencies by name:
//!
//! ```toml
//! name = "release"
//! prompt = "Prepare {{ version }}"
//! instructions = ["Keep the changelog short"]
//!
//! [context]
//! version = "1.2.0"
//!
//! [[tasks]]
//! name = "build"
//!
//! [[tasks]]
//! name = "publish"
//! objective = "Publish the build"
//! depends_on = ["build"]
//! ```

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::flow::{Flow, FlowBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct PlanTask {
    pub name: String,
    /// Defaults to the task name.
    pub objective: Option<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub name: Option<String>,
    pub description: Option<String>,
    pub prompt: Option<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        content.parse()
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for task in &self.tasks {
            if !names.insert(task.name.as_str()) {
                return Err(Error::Validation(format!("duplicate task name '{}'", task.name)));
            }
        }
        for task in &self.tasks {
            if let Some(missing) = task.depends_on.iter().find(|d| !names.contains(d.as_str())) {
                return Err(Error::Validation(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.name, missing
                )));
            }
        }
        Ok(())
    }

    /// Apply the plan's flow settings to `builder`, build the flow, and add
    /// the tasks. Returns the flow and each task's name and id in the order
    /// they were added.
    pub fn into_flow(self, mut builder: FlowBuilder) -> Result<(Arc<Flow>, Vec<(String, TaskId)>)> {
        if let Some(name) = &self.name {
            builder = builder.name(name);
        }
        if let Some(description) = &self.description {
            builder = builder.description(description);
        }
        if let Some(prompt) = &self.prompt {
            builder = builder.prompt(prompt);
        }
        for instruction in &self.instructions {
            builder = builder.instruction(instruction);
        }
        for (key, value) in self.context {
            builder = builder.context(&key, value);
        }

        let flow = builder.build_detached();
        let added = add_tasks(&flow, self.tasks)?;
        Ok((flow, added))
    }
}

impl std::str::FromStr for Plan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let plan: Plan = toml::from_str(s)?;
        plan.validate()?;
        Ok(plan)
    }
}

/// Add tasks once all of their dependencies are in the graph, so plans may
/// list tasks in any order.
fn add_tasks(flow: &Flow, tasks: Vec<PlanTask>) -> Result<Vec<(String, TaskId)>> {
    let mut ids: HashMap<String, TaskId> = HashMap::new();
    let mut added = Vec::with_capacity(tasks.len());
    let mut remaining = tasks;

    while !remaining.is_empty() {
        let (ready, waiting): (Vec<PlanTask>, Vec<PlanTask>) = remaining
            .into_iter()
            .partition(|t| t.depends_on.iter().all(|d| ids.contains_key(d)));

        if ready.is_empty() {
            let names: Vec<&str> = waiting.iter().map(|t| t.name.as_str()).collect();
            return Err(Error::Validation(format!(
                "dependency cycle among tasks: {}",
                names.join(", ")
            )));
        }

        for entry in ready {
            let mut task = Task::new(entry.objective.as_deref().unwrap_or(&entry.name))
                .with_instructions(&entry.instructions);
            for dep in &entry.depends_on {
                task = task.depends_on(ids[dep]);
            }
            for (key, value) in entry.context {
                task = task.with_context(&key, value);
            }
            let id = flow.add_task(task)?;
            ids.insert(entry.name.clone(), id);
            added.push((entry.name, id));
        }
        remaining = waiting;
    }
    Ok(added)
}
