use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::infra::{config::LogConfig, error::AppError};

const LOG_FILE_PREFIX: &str = "chatcore.log";

/// Installs the global subscriber. When file logging is on, the returned
/// guard must be held until exit so buffered lines are flushed.
pub fn init(config: &LogConfig, log_dir: &Path) -> Result<Option<WorkerGuard>, AppError> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    if !config.file {
        return tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
            .map(|()| None)
            .map_err(AppError::LoggingInit);
    }

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .map_err(|error| AppError::LoggingInit(Box::new(error)))?;

    Ok(Some(guard))
}
