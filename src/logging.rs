// src/logging.rs
use anyhow::{anyhow, Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogConfig;

pub const ENV_DEBUG_LOG: &str = "ARTWATCH_DEBUG_LOG";
pub const LOG_FILE_NAME: &str = "artwatch.log";

/// Console output is opt-in: `ARTWATCH_DEBUG_LOG=1`.
pub fn debug_console_enabled() -> bool {
    std::env::var(ENV_DEBUG_LOG)
        .ok()
        .is_some_and(|v| v == "1")
}

fn filter_for(level: &str, debug_console: bool) -> EnvFilter {
    let default = if debug_console { "debug" } else { level };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Daily rolling file log plus optional console output.
/// Keep the returned guard alive for the lifetime of the process.
pub fn init_tracing(cfg: &LogConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&cfg.directory)
        .with_context(|| format!("creating log directory {}", cfg.directory.display()))?;

    let debug_console = debug_console_enabled();
    let appender = tracing_appender::rolling::daily(&cfg.directory, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
    let console_layer = debug_console.then(|| fmt::layer().compact());

    tracing_subscriber::registry()
        .with(filter_for(&cfg.level, debug_console))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("installing tracing subscriber: {e}"))?;

    Ok(guard)
}
