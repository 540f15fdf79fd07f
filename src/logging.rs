//! Tracing setup for the trainer binary.
//!
//! Human-readable events go to stderr, so stdout stays free for command
//! output. When `[logging] file_logs` is on, each launch also gets its own
//! timestamped file under the logs directory, and only the newest
//! `max_files` files are kept.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use thiserror::Error;
use time::format_description::{BorrowedFormatItem, FormatItem};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{self, AppDirError};
use crate::config::LoggingSettings;

const LOG_FILE_PREFIX: &str = "coachnet";
const LOG_EXTENSION: &str = "log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Log directory unavailable: {0}")]
    Directory(#[from] AppDirError),
    #[error("Could not {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not format the log file timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("A global tracing subscriber is already installed: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

impl LoggingError {
    fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The file this launch writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LaunchLog {
    dir: PathBuf,
    file_name: String,
}

impl LaunchLog {
    fn create(dir: PathBuf, started: OffsetDateTime) -> Result<Self, LoggingError> {
        fs::create_dir_all(&dir).map_err(LoggingError::io("create", &dir))?;
        let log = Self {
            dir,
            file_name: launch_file_name(started)?,
        };
        let path = log.path();
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(LoggingError::io("create", &path))?;
        Ok(log)
    }

    fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Install the global subscriber described by `settings`.
///
/// `RUST_LOG` takes precedence over `settings.level`. Only the first call
/// installs anything.
pub fn init(settings: &LoggingSettings) -> Result<(), LoggingError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let launch_log = if settings.file_logs {
        let dir = match &settings.directory {
            Some(dir) => dir.clone(),
            None => app_dirs::logs_dir()?,
        };
        let log = LaunchLog::create(dir, now_local_or_utc())?;
        prune_logs(&log.dir, settings.max_files.max(1))?;
        Some(log)
    } else {
        None
    };

    let timer = clock();
    let file_layer = launch_log.as_ref().map(|log| {
        let appender = tracing_appender::rolling::never(&log.dir, &log.file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        fmt::layer()
            .with_ansi(false)
            .with_timer(timer.clone())
            .with_writer(writer)
    });
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_timer(timer)
        .with_writer(std::io::stderr);

    let subscriber = Registry::default()
        .with(env_filter(&settings.level))
        .with(stderr_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = INSTALLED.set(());

    if let Some(log) = launch_log {
        tracing::debug!(path = %log.path().display(), "Writing log file");
    }
    Ok(())
}

/// Delete the oldest `.log` files in `dir` until at most `keep` remain.
fn prune_logs(dir: &Path, keep: usize) -> Result<usize, LoggingError> {
    let mut logs: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)
        .map_err(LoggingError::io("read", dir))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == LOG_EXTENSION))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    let excess = logs.len().saturating_sub(keep);
    if excess == 0 {
        return Ok(0);
    }
    logs.sort_by_key(|(modified, _)| *modified);
    for (_, path) in logs.iter().take(excess) {
        fs::remove_file(path).map_err(LoggingError::io("remove", path))?;
    }
    Ok(excess)
}

fn launch_file_name(started: OffsetDateTime) -> Result<String, LoggingError> {
    const STAMP: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    Ok(format!(
        "{LOG_FILE_PREFIX}_{}.{LOG_EXTENSION}",
        started.format(STAMP)?
    ))
}

fn clock() -> OffsetTime<BorrowedFormatItem<'static>> {
    const CLOCK: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, CLOCK.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{LOG_FILE_PREFIX}={level}")))
        .unwrap_or_else(|_| EnvFilter::new(format!("{LOG_FILE_PREFIX}=info")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn launch_file_is_named_after_start_time() {
        let started = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let dir = tempdir().unwrap();
        let log = LaunchLog::create(dir.path().join("logs"), started).unwrap();
        assert_eq!(log.file_name, "coachnet_2023-11-14_22-13-20.log");
        assert!(log.path().is_file());
    }

    #[test]
    fn prune_keeps_newest_logs_only() {
        let dir = tempdir().unwrap();
        for idx in 0..5 {
            fs::write(dir.path().join(format!("coachnet_{idx}.log")), "").unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(prune_logs(dir.path(), 3).unwrap(), 2);
        assert_eq!(prune_logs(dir.path(), 3).unwrap(), 0);

        assert!(!dir.path().join("coachnet_0.log").exists());
        assert!(!dir.path().join("coachnet_1.log").exists());
        assert!(dir.path().join("coachnet_4.log").exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
