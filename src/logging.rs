use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Keeps the file writer alive. Dropping it flushes pending lines.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. A subscriber that is already installed is
/// left in place.
pub fn init(config: &LogConfig) -> LogGuard {
    let level = if config.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let (file_writer, guard) = match &config.dir {
        Some(dir) => match file_writer(dir, &config.file_prefix) {
            Ok((writer, guard)) => (Some(writer), Some(guard)),
            Err(e) => {
                eprintln!(
                    "warning: logging to console only, cannot open {}/{}.log: {e}",
                    dir.display(),
                    config.file_prefix
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
    });

    let console_layer = config
        .console
        .then(|| fmt::layer().with_target(false).compact());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    LogGuard { _file: guard }
}

/// Open `<dir>/<prefix>.log` for appending behind a background writer.
pub fn file_writer(dir: &Path, prefix: &str) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}
