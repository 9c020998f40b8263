//! Structured logging setup.
//!
//! Events go to stdout through a compact formatter filtered by `RUST_LOG`
//! (default `info`). A non-blocking file layer mirrors them to
//! `logs/docdex.log`, or to `DOCDEX_LOG_FILE` when set; the worker guard is
//! held for the life of the process.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_LOG_PATH: &str = "logs/docdex.log";

/// Install the stdout and file tracing layers.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry().with(filter).with(stdout);

    match open_log_file() {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false).compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Open the log file for appending, creating its directory as needed.
///
/// Returns `None` (stdout-only logging) when the directory or file cannot be
/// prepared; logging setup never aborts the process.
fn open_log_file() -> Option<std::fs::File> {
    let path = std::env::var("DOCDEX_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_PATH));

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}
