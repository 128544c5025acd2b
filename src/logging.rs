//! Tracing subscriber for the `collector` binary.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter, e.g. `collector::db=trace`
/// to see every migration step.
pub const LOG_ENV: &str = "COLLECTOR_LOG";

const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "collector.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where log records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Journald,
    /// Daily rolling files in this directory.
    Files(PathBuf),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Non-blocking writer for daily files under `dir`; the worker lives as
/// long as the process.
fn file_writer(dir: &Path) -> Result<NonBlocking> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating log directory {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
    let _ = FILE_GUARD.set(guard);
    Ok(writer)
}

/// Install the global subscriber. Linux hosts log to the journal when it is
/// reachable; everything else writes to `log_dir` (or [`default_log_dir`]).
pub fn init(log_dir: Option<PathBuf>) -> Result<LogSink> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(journald) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journald.with_syslog_identifier("collector".to_string()))
                .try_init()
                .context("installing journald subscriber")?;
            return Ok(LogSink::Journald);
        }
    }

    let dir = log_dir.unwrap_or_else(default_log_dir);
    let writer = file_writer(&dir)?;
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .context("installing file subscriber")?;
    tracing::debug!(dir = %dir.display(), "Logging to files");
    Ok(LogSink::Files(dir))
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("collector")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("nested").join("logs");

        file_writer(&logs).unwrap();

        assert!(logs.is_dir());
    }

    #[test]
    fn test_default_log_dir_is_per_application() {
        assert!(default_log_dir().ends_with("collector/logs"));
    }
}
