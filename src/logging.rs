use std::io;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogRotation, DEFAULT_LOG_FILTER};

const LOG_FILE_PREFIX: &str = "adaptive-engine.log";

/// Flushes buffered file lines when dropped; hold it until shutdown.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Parses `filter`, falling back to the engine default for bad directives.
pub fn env_filter(filter: &str) -> EnvFilter {
    EnvFilter::try_new(filter).unwrap_or_else(|e| {
        eprintln!("invalid log filter {filter:?} ({e}); using {DEFAULT_LOG_FILTER}");
        EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn file_writer(dir: &Path, every: LogRotation) -> io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(rotation(every), dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber. A file layer is added when `config.dir`
/// is set and can be created; otherwise only stdout is used.
pub fn init(config: &LogConfig) -> Option<FileLogGuard> {
    let file = config.dir.as_deref().and_then(|dir| match file_writer(dir, config.rotation) {
        Ok(writer) => Some(writer),
        Err(e) => {
            eprintln!("file logging disabled for {}: {e}", dir.display());
            None
        }
    });
    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false).with_target(true)),
            Some(FileLogGuard { _guard: guard }),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.filter))
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_filter_uses_the_default() {
        let default = EnvFilter::new(DEFAULT_LOG_FILTER).to_string();
        assert_eq!(env_filter("adaptive_engine=loud").to_string(), default);
        assert_ne!(env_filter("debug").to_string(), default);
    }

    #[test]
    fn file_writer_creates_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("logs");
        let (_writer, _guard) = file_writer(&dir, LogRotation::Never).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn file_writer_fails_under_a_file() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        assert!(file_writer(&blocker.join("logs"), LogRotation::Daily).is_err());
    }
}
