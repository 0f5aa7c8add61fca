//! Dual output logging (console + rotating file).
//!
//! Console output is human readable; the file layer writes JSON lines by
//! default so long runs can be analysed after the fact.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::queue::BoxError;

const LOG_FILE_PREFIX: &str = "audit_queue";
const DEFAULT_FILTER: &str = "info,audit_queue=info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
    /// `EnvFilter` directive, e.g. "info,audit_queue=debug"; `RUST_LOG` wins when set
    pub level_filter: String,
    pub rotation: LogRotation,
    pub console_timestamps: bool,
    pub file_json_format: bool,
    /// Log files older than this many days are removed by `cleanup_old_logs`
    pub keep_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl LogRotation {
    /// Parse a rotation name; unknown names fall back to daily
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "hourly" => LogRotation::Hourly,
            "never" => LogRotation::Never,
            _ => LogRotation::Daily,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            level_filter: DEFAULT_FILTER.to_string(),
            rotation: LogRotation::Daily,
            console_timestamps: true,
            file_json_format: true,
            keep_days: 30,
        }
    }
}

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install console and rotating-file layers as the global subscriber.
///
/// Files are named `audit_queue.log.<date>` inside `log_dir`. Keep the
/// returned guard alive for as long as logs should be flushed.
pub fn init_dual_logging(config: &LoggingConfig) -> Result<WorkerGuard, BoxError> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = match config.rotation {
        LogRotation::Daily => rolling::daily(&config.log_dir, format!("{}.log", LOG_FILE_PREFIX)),
        LogRotation::Hourly => rolling::hourly(&config.log_dir, format!("{}.log", LOG_FILE_PREFIX)),
        LogRotation::Never => rolling::never(&config.log_dir, format!("{}.log", LOG_FILE_PREFIX)),
    };
    let (file_writer, guard) = non_blocking(file_appender);

    let console_format = if config.console_timestamps {
        "%Y-%m-%d %H:%M:%S%.3f UTC"
    } else {
        ""
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(true)
        .with_timer(ChronoUtc::new(console_format.to_string()))
        .with_filter(env_filter(&config.level_filter));

    let file_layer = if config.file_json_format {
        fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()))
            .with_filter(env_filter(&config.level_filter))
            .boxed()
    } else {
        fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_timer(ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f UTC".to_string()))
            .with_filter(env_filter(&config.level_filter))
            .boxed()
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        log_dir = %config.log_dir,
        rotation = ?config.rotation,
        json_format = config.file_json_format,
        "📁 Dual logging initialized - console + rotating files"
    );
    Ok(guard)
}

/// Console-only logging for tests and small tools
pub fn init_simple_logging() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter(env_filter(DEFAULT_FILTER)).try_init()?;
    tracing::info!("🖥️ Simple console logging initialized");
    Ok(())
}

fn is_log_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
}

/// Log files written by this crate in `log_dir`, sorted by name
pub fn get_current_log_files(log_dir: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(log_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| is_log_file(path))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Remove log files last modified more than `keep_days` ago; returns how many
pub fn cleanup_old_logs(log_dir: impl AsRef<Path>, keep_days: u32) -> Result<usize, std::io::Error> {
    let max_age = Duration::from_secs(u64::from(keep_days) * 24 * 3600);
    let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for path in get_current_log_files(log_dir) {
        let modified = path.metadata().and_then(|meta| meta.modified())?;
        if modified < cutoff {
            std::fs::remove_file(&path)?;
            tracing::debug!("🗑️ Removed old log file: {:?}", path);
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::info!("🧹 Cleaned up {} old log files", removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotation_parsing() {
        assert_eq!(LogRotation::parse("hourly"), LogRotation::Hourly);
        assert_eq!(LogRotation::parse("NEVER"), LogRotation::Never);
        assert_eq!(LogRotation::parse("weekly"), LogRotation::Daily);
    }

    #[test]
    fn test_log_file_discovery() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("audit_queue.log.2026-01-02"), "a").unwrap();
        std::fs::write(dir.path().join("audit_queue.log.2026-01-01"), "b").unwrap();
        std::fs::write(dir.path().join("other.log"), "c").unwrap();

        let files = get_current_log_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("audit_queue.log.2026-01-01"));
    }

    #[test]
    fn test_cleanup_keeps_recent_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("audit_queue.log"), "fresh").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cleanup_old_logs(dir.path(), 1).unwrap(), 0);
        assert_eq!(cleanup_old_logs(dir.path(), 0).unwrap(), 1);
        assert!(get_current_log_files(dir.path()).is_empty());
    }

    #[test]
    fn test_missing_directory_has_no_files() {
        assert!(get_current_log_files("/definitely/not/a/log/dir").is_empty());
    }
}
