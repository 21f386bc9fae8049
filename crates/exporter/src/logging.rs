//! Global tracing subscriber setup.

use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Installs the global subscriber.
///
/// Stderr (or the directory named by [`utils::logging::LOG_PATH_ENV_VAR`])
/// always receives logs. With `log_file`, a daily-rotated copy is also written
/// through a non-blocking writer whose guard must be held until exit.
pub(crate) fn init<P: AsRef<Path>>(log_file: Option<P>) -> Result<Option<WorkerGuard>> {
    let env_filter = || {
        filter::EnvFilter::builder()
            .with_default_directive(filter::LevelFilter::INFO.into())
            .from_env_lossy()
    };

    let fmt_layer = utils::logging::get_fmt_layer(std::env::var(utils::logging::LOG_PATH_ENV_VAR).ok())
        .with_filter(env_filter());

    let Some(log_file) = log_file else {
        registry().with(fmt_layer).init();
        return Ok(None);
    };

    let log_file = log_file.as_ref();
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = log_file
        .file_name()
        .and_then(|f| f.to_str())
        .with_context(|| format!("log file {} has no usable file name", log_file.display()))?;

    let appender = utils::logging::rolling_appender(dir, prefix)
        .with_context(|| format!("failed to create rolling log file in {}", dir.display()))?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(env_filter());

    registry().with(fmt_layer).with(file_layer).init();
    Ok(Some(file_guard))
}
