//! Logging with console and daily-rotated file output.
//!
//! `log` records from `rtptv-source` are bridged into `tracing`, so both
//! crates end up in the same subscriber. Log files older than the retention
//! period are removed at startup.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Base name of the rotated log files.
pub const LOG_FILE_NAME: &str = "rtptv-proxy.log";

/// Initialize the logging system with both console and file output.
///
/// # Arguments
/// * `log_dir` - Directory where log files will be stored
/// * `retention_days` - Number of days to keep log files
/// * `verbose` - Whether to enable debug-level logging
/// * `level` - Default filter when `RUST_LOG` is unset (overridden by `verbose`)
pub fn init_logging(
    log_dir: &Path,
    retention_days: u64,
    verbose: bool,
    level: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;

    clean_old_logs(log_dir, retention_days)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes on drop; keep it for the lifetime of the process.
    let _ = Box::leak(Box::new(Arc::new(guard)));

    let default_level = if verbose {
        "debug"
    } else {
        level.unwrap_or("info")
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(io::stdout)
                .with_target(true)
                .with_level(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(LocalTimeTimer),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_level(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_timer(LocalTimeTimer),
        );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set default subscriber: {}", e))?;

    // Bridge log:: macros (used by rtptv-source) to tracing
    tracing_log::LogTracer::init()
        .map_err(|e| format!("Failed to initialize LogTracer: {}", e))?;

    Ok(())
}

/// Remove log files older than `retention_days`.
///
/// Only files whose name contains [`LOG_FILE_NAME`] are considered. Returns
/// the number of files removed.
pub fn clean_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.contains(LOG_FILE_NAME));
        if !is_log {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let modified: chrono::DateTime<Local> = modified.into();
        if modified < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
            }
        }
    }

    Ok(removed)
}

/// Custom timer for local time formatting in logs
#[derive(Debug, Clone, Copy)]
struct LocalTimeTimer;

impl fmt::time::FormatTime for LocalTimeTimer {
    fn format_time(&self, w: &mut fmt::format::Writer) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}
