//! provides logging helpers

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable naming a directory for process logs instead of stderr.
pub const LOG_PATH_ENV_VAR: &str = "PDH_EXPORTER_LOG_PATH";

const LOG_FILE_PREFIX: &str = "pdh-exporter.log";

/// Builds the human-readable log layer.
///
/// Logs go to stderr unless `log_path` names a directory, in which case they
/// are written to a daily-rotated file inside it (three files are kept).
pub fn get_fmt_layer<S>(log_path: Option<String>) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let Some(log_path) = log_path.filter(|p| !p.is_empty()) else {
        return layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed();
    };

    match rolling_appender(Path::new(&log_path), LOG_FILE_PREFIX) {
        Ok(appender) => layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_target(true)
            .boxed(),
        Err(err) => {
            eprintln!("failed to create log file appender at {log_path}: {err}; using stderr");
            layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed()
        }
    }
}

/// Daily rolling appender keeping the last three files.
pub fn rolling_appender(
    dir: &Path,
    prefix: &str,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
}
