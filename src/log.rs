//! Structured logging setup.
//!
//! Everything in the crate logs through `tracing` with structured fields.
//! Levels:
//! - ERROR: failures that stop a run
//! - WARN: recoverable conditions (dispatch retries, failed tasks)
//! - INFO: run lifecycle (start, stop, deadlock)
//! - DEBUG: per-step scheduling and flow scope traces
//! - TRACE: event appends and graph reads
//!
//! Debug mode can be enabled with `--debug` or `FLOWGRAPH_DEBUG=1`.
//! `RUST_LOG`, when set, overrides both.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging at the default level.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn env_debug() -> bool {
    std::env::var("FLOWGRAPH_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "flowgraph=debug,warn"
    } else {
        "flowgraph=info,warn"
    }
}
