use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use flowgraph::agent::DryRunAgent;
use flowgraph::config::Config;
use flowgraph::flow::Flow;
use flowgraph::orchestration::OrchestratorConfig;
use flowgraph::plan::Plan;
use flowgraph::Result;

/// flowgraph - run dependency-ordered task plans through agents
#[derive(Parser, Debug)]
#[command(name = "flowgraph")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    FLOWGRAPH_DEBUG=1   Enable debug logging (alternative to --debug)\n    RUST_LOG            Override the log filter")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.flowgraph/flowgraph.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print a plan's tasks in execution order
    Plan {
        /// Path to the plan file
        file: PathBuf,
    },

    /// Run a plan with the dry-run agent and print the run report as JSON
    Run {
        /// Path to the plan file
        file: PathBuf,

        /// Maximum orchestrator steps (defaults to the configured budget)
        #[arg(long)]
        steps: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    flowgraph::log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Plan { file } => run_plan(&file, &config),
        Command::Run { file, steps } => run_flow(&file, steps, &config),
    }
}

fn build_flow(file: &Path, config: &Config) -> Result<(Arc<Flow>, Vec<(String, flowgraph::core::TaskId)>)> {
    let plan = Plan::load(file)?;
    let builder = Flow::builder()
        .agent(Arc::new(DryRunAgent::default()))
        .config(OrchestratorConfig::from(config));
    plan.into_flow(builder)
}

fn run_plan(file: &Path, config: &Config) -> Result<()> {
    let (flow, added) = build_flow(file, config)?;

    for (index, task) in flow.tasks().iter().enumerate() {
        let name = added
            .iter()
            .find(|(_, id)| *id == task.id)
            .map(|(name, _)| name.as_str())
            .unwrap_or("?");
        let deps: Vec<&str> = task
            .depends_on
            .iter()
            .filter_map(|dep| added.iter().find(|(_, id)| id == dep))
            .map(|(name, _)| name.as_str())
            .collect();

        if deps.is_empty() {
            println!("{:>3}. {} [{}]", index + 1, name, task.id.short());
        } else {
            println!(
                "{:>3}. {} [{}] <- {}",
                index + 1,
                name,
                task.id.short(),
                deps.join(", ")
            );
        }
    }
    Ok(())
}

fn run_flow(file: &Path, steps: Option<usize>, config: &Config) -> Result<()> {
    let (flow, _) = build_flow(file, config)?;
    tracing::info!(thread_id = %flow.thread_id(), tasks = flow.tasks().len(), "Running plan");

    let report = flow.run_blocking(steps)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
