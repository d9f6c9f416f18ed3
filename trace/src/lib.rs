use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt;

pub use tracing_appender::non_blocking::WorkerGuard;

/// Logs to stderr; stdout carries the plugin result.
pub fn setup_tracing_to_stderr(filter: impl Into<LevelFilter>) -> anyhow::Result<()> {
    fmt()
        .with_writer(std::io::stderr)
        .with_max_level(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

pub fn setup_tracing_to_file(
    directory: impl AsRef<Path>,
    file_name_prefix: impl AsRef<Path>,
    filter: impl Into<LevelFilter>,
) -> anyhow::Result<WorkerGuard> {
    let file_appender = rolling::daily(directory, file_name_prefix);
    let (non_blocking, guard) = non_blocking(file_appender);
    fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_max_level(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(guard)
}
