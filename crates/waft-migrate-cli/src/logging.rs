use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Maps a `WAFT_LOG_LEVEL` name onto a tracing level; `-v` always means debug.
pub fn level_filter(name: &str, verbose: bool) -> Result<LevelFilter> {
    if verbose {
        return Ok(LevelFilter::DEBUG);
    }
    let level = match name.trim().to_ascii_uppercase().as_str() {
        "NOTSET" | "TRACE" => LevelFilter::TRACE,
        "DEBUG" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "WARNING" | "WARN" => LevelFilter::WARN,
        "ERROR" | "CRITICAL" | "FATAL" => LevelFilter::ERROR,
        other => bail!("unknown log level in WAFT_LOG_LEVEL: {other}"),
    };
    Ok(level)
}

/// Narrates to stdout at `level` (or `RUST_LOG`) and appends everything from
/// debug upwards to the migration log.
pub fn init_logging(log_path: &Path, level: LevelFilter) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file: {}", log_path.display()))?;

    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_filter(stdout_filter),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::DEBUG),
        )
        .try_init()
        .context("failed to install log subscriber")
}
