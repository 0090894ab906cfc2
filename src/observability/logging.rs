//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Route events to stderr or to the `-l` log file
//! - Rotate the log file daily, keeping the last [`LOG_FILES_KEPT`] files
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the command-line verbosity
//! - The file writer is synchronous: no background thread exists when the
//!   process forks to detach, and the open descriptor survives the fork

use std::path::Path;

use thiserror::Error;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rotated log files kept next to the current one.
pub const LOG_FILES_KEPT: usize = 10;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("log file {path} has no file name")]
    BadPath { path: String },

    #[error("failed to open log file: {0}")]
    File(#[from] InitError),

    #[error("failed to install subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Map `-v`/`-q` to a level. Quiet wins over verbose.
pub fn level_from_flags(verbose: bool, quiet: bool) -> LevelFilter {
    match (verbose, quiet) {
        (_, true) => LevelFilter::WARN,
        (true, false) => LevelFilter::DEBUG,
        (false, false) => LevelFilter::INFO,
    }
}

/// Default directives for `level`: our crate and the HTTP tracing layer at
/// `level`, dependencies at warn.
pub fn default_directives(level: LevelFilter) -> String {
    let level = level.to_string().to_lowercase();
    format!("warn,signing_daemon={level},tower_http={level}")
}

/// Install the global subscriber.
pub fn init(level: LevelFilter, logfile: Option<&Path>) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    match logfile {
        Some(path) => {
            let appender = file_appender(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(appender)
                        .with_ansi(false),
                )
                .try_init()?;
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()?;
        }
    }
    Ok(())
}

fn file_appender(path: &Path) -> Result<RollingFileAppender, LoggingError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LoggingError::BadPath {
            path: path.display().to_string(),
        })?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    Ok(RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(LOG_FILES_KEPT)
        .filename_prefix(file_name)
        .build(dir)?)
}
