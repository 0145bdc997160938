//! Logging infrastructure.
//!
//! Structured logging with optional file output:
//! - Console output for CLI use
//! - Optional non-blocking file writer
//! - Configurable via the RUST_LOG environment variable
//!
//! The library itself only emits `tracing` events; installing a
//! subscriber is the binary's decision, typically via [`init_logging`].

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize console logging, defaulting to INFO when RUST_LOG is unset.
pub fn init_logging() -> LoggingGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    LoggingGuard { _file_guard: None }
}

/// Initialize logging to both the console and a log file.
///
/// # Arguments
///
/// * `log_dir` - Directory for log files (created if needed)
/// * `log_file` - Log file name
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_logging_with_file(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: Some(file_guard),
    })
}
