//! Logging setup: stderr plus an optional daily-rotated file.

use std::fs;

use settle_core::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const LOG_FILE_PREFIX: &str = "settle.log";
const LOG_ENV_VAR: &str = "SETTLE_LOG";

/// Keeps the file writer flushing; drop it only at process exit.
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

pub fn init(logging: &LoggingConfig) -> TelemetryGuard {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![Box::new(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false),
    )];

    let mut guard = None;
    let mut file_setup_error = None;
    if logging.file {
        let dir = logging.effective_dir();
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX);
                let (writer, worker_guard) = tracing_appender::non_blocking(appender);
                layers.push(Box::new(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                ));
                guard = Some(worker_guard);
            }
            Err(err) => {
                file_setup_error = Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }

    layers.push(Box::new(filter));
    Registry::default().with(layers).init();

    if let Some(error) = file_setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guard: guard }
}
