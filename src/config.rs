use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Retry settings for agent dispatches that fail transiently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Ready tasks dispatched per orchestrator step.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Step budget for runs that don't pass one explicitly.
    pub default_steps: Option<usize>,
    /// Number of recent events handed to an agent.
    #[serde(default = "default_event_limit")]
    pub event_limit: usize,
    /// Open a tracing span whenever a flow is entered.
    #[serde(default = "default_trace_spans")]
    pub trace_spans: bool,
    /// Per-dispatch timeout; unset means no timeout.
    pub dispatch_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_parallel() -> usize {
    1
}

fn default_event_limit() -> usize {
    50
}

fn default_trace_spans() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            default_steps: None,
            event_limit: default_event_limit(),
            trace_spans: default_trace_spans(),
            dispatch_timeout_ms: None,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    pub fn flowgraph_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".flowgraph"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::flowgraph_dir()?.join("flowgraph.toml"))
    }

    /// Load from `~/.flowgraph/flowgraph.toml`, or defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        tracing::debug!(
            max_parallel = config.max_parallel,
            event_limit = config.event_limit,
            max_retries = config.retry.max_retries,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                tracing::debug!(dir = %dir.display(), "Creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(Error::Validation(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::Validation(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        Ok(())
    }
}
