use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_NAME: &str = "commands.log";
const DEFAULT_FILTER: &str = "ntp_client_tauri=info,warn";

/// Returns `None` when a global subscriber is already installed. The guard
/// flushes the file writer on drop and must be held for the process lifetime.
pub fn init_logging(logs_dir: &Path) -> Result<Option<WorkerGuard>, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file_appender = tracing_appender::rolling::never(logs_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let installed = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(fmt::layer().json().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();

    match installed {
        Ok(()) => {
            tracing::info!(logs_dir = %logs_dir.display(), "logging initialised");
            Ok(Some(guard))
        }
        Err(_) => Ok(None),
    }
}
