//! Logging setup.
//!
//! Writes to a daily rolling file under the log directory and to stderr.
//! `RUST_LOG` overrides the default level.

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Must be held for the life of the process; dropping it flushes the file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Level used when `RUST_LOG` is not set.
pub fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Installs the global subscriber.
///
/// Log files are named `<prefix>.log.<date>` inside `dir`, which is created
/// if missing.
pub fn init_logging(dir: &Path, prefix: &str, verbose: bool) -> io::Result<LoggingGuard> {
    fs::create_dir_all(dir)?;

    let file_appender = tracing_appender::rolling::daily(dir, format!("{prefix}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(false), "info");
        assert_eq!(default_level(true), "debug");
    }

    #[test]
    fn test_init_creates_log_directory() {
        // The global subscriber can only be installed once per process, so
        // this is the only test that calls init_logging.
        let dir = tempfile::TempDir::new().unwrap();
        let log_dir = dir.path().join("Logs");
        let guard = init_logging(&log_dir, "haptic-relay", false).unwrap();
        tracing::info!("logging initialised");
        drop(guard);
        assert!(log_dir.is_dir());
    }
}
