//! Logging for fraudsim
//!
//! Diagnostics go to a daily-rotated file under the XDG state directory
//! (`~/.local/state/fraudsim/fraudsim.log`). The configured level applies to
//! the fraudsim crates; dependencies only log warnings. `RUST_LOG` overrides
//! both.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const LOG_FILE_PREFIX: &str = "fraudsim.log";

/// Initialize logging into the default state directory.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    init_in(&Config::state_dir(), config)
}

/// Initialize logging into `log_dir`.
///
/// Fails if a global subscriber is already installed.
pub fn init_in(log_dir: &Path, config: &LoggingConfig) -> Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(config.max_files.max(1))
        .build(log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {e}")))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // Operator-facing failures (store outages, rejected interventions)
    let console_layer = config.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .compact()
            .with_filter(LevelFilter::WARN)
    });

    tracing_subscriber::registry()
        .with(filter_for(&config.level)?)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install logger: {e}")))?;

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// `RUST_LOG` if set, else `level` for the fraudsim crates and `warn` for
/// everything else.
fn filter_for(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(format!(
        "warn,fraudsim={level},fraudsim_core={level}"
    ))
    .map_err(|e| Error::Config(format!("invalid log level '{level}': {e}")))
}

/// Initialize logging for tests (logs to the test writer)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Keeps the background log writer alive; pending lines are flushed on drop.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Returns the log file path
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
