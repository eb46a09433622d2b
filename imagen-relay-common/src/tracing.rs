//! Tracing initialization for the imagen-relay server.
//!
//! Stdout carries RPC frames, so log output never goes there. Events are
//! written to stderr and, when a log directory is given, appended to a file
//! named after the current UTC date.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Full filter directive; takes precedence over the default
//!   level passed to [`try_init_tracing`]. Examples:
//!   - `RUST_LOG=debug`
//!   - `RUST_LOG=warn,imagen_relay=debug`

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Errors that can occur while installing the subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    /// The log file could not be opened
    #[error("Failed to open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed
    #[error("Tracing subscriber already initialized")]
    AlreadyInitialized,
}

/// Log file name for a given day, e.g. `imagen-relay.2024-05-01.log`.
pub fn log_file_name(date: chrono::NaiveDate) -> String {
    format!("imagen-relay.{}.log", date.format("%Y-%m-%d"))
}

/// Build the filter: `RUST_LOG` when set, otherwise `default_level`.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn open_log_file(log_dir: &Path) -> Result<File, TracingError> {
    let path = log_dir.join(log_file_name(chrono::Utc::now().date_naive()));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| TracingError::LogFile { path, source })
}

/// Try to initialize tracing, returning an error if already initialized.
///
/// # Arguments
///
/// * `default_level` - Level used when `RUST_LOG` is not set (e.g. "info")
/// * `log_dir` - Directory for the daily log file; `None` logs to stderr only
///
/// # Example
///
/// ```
/// use imagen_relay_common::tracing::try_init_tracing;
///
/// // First call succeeds; later calls report AlreadyInitialized
/// let _ = try_init_tracing("info", None);
/// ```
pub fn try_init_tracing(default_level: &str, log_dir: Option<&Path>) -> Result<(), TracingError> {
    let file_layer = match log_dir {
        Some(dir) => {
            let file = open_log_file(dir)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE),
            )
        }
        None => None,
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE);

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| TracingError::AlreadyInitialized)
}
