//! Tracing setup. Logs go to a file so stdout stays clean for command output.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOG_FILE_PREFIX: &str = "befa";
const LOG_FILE_SUFFIX: &str = "log";

/// Where logs ended up.
pub enum LogTarget {
  /// `<data_dir>/befa/befa.log`. Keep the guard alive to flush on exit.
  File(WorkerGuard),
  /// The log file could not be opened; warnings go to stderr instead.
  Stderr,
}

/// Install the global subscriber.
///
/// An unwritable data directory is not fatal: logging falls back to stderr
/// at `warn` so the command still runs.
pub fn init() -> LogTarget {
  match Config::log_dir().and_then(|dir| file_writer(&dir)) {
    Ok((writer, guard)) => {
      let _ = tracing_subscriber::registry()
        .with(filter("befa=info"))
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .try_init();
      LogTarget::File(guard)
    }
    Err(e) => {
      let _ = tracing_subscriber::registry()
        .with(filter("befa=warn"))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
      tracing::warn!("Logging to stderr: {}", e);
      LogTarget::Stderr
    }
  }
}

fn filter(default: &str) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into())
}

/// Non-blocking writer appending to the log file in `dir`, creating it if needed.
fn file_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = RollingFileAppender::builder()
    .rotation(Rotation::NEVER)
    .filename_prefix(LOG_FILE_PREFIX)
    .filename_suffix(LOG_FILE_SUFFIX)
    .build(dir)
    .map_err(|e| eyre!("Failed to open log file in {}: {}", dir.display(), e))?;

  Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_file_writer_creates_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("befa");

    let (_writer, _guard) = file_writer(&logs).unwrap();
    assert!(logs.join("befa.log").exists());
  }

  #[test]
  fn test_unwritable_log_dir_is_an_error_not_a_panic() {
    let file = tempfile::NamedTempFile::new().unwrap();
    // A directory can't be created under a regular file
    let logs = file.path().join("befa");

    assert!(file_writer(&logs).is_err());
  }
}
