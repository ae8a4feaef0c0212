//! Logging setup for the kiln binary

use std::path::Path;

use kiln_core::LogConfig;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILE: &str = "kiln.log";

/// Console logging at info, for commands that don't load a config
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
    .with_target(false)
    .init();
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> LevelFilter {
  match level.to_lowercase().as_str() {
    "off" => LevelFilter::OFF,
    "error" => LevelFilter::ERROR,
    "warn" => LevelFilter::WARN,
    "info" => LevelFilter::INFO,
    "debug" => LevelFilter::DEBUG,
    "trace" => LevelFilter::TRACE,
    _ => LevelFilter::INFO,
  }
}

/// Initialize logging from the `[log]` config section.
///
/// Logs go to the console unless a file is configured, in which case they
/// go to a daily-rolling file only (no ANSI). `RUST_LOG` overrides the
/// configured level.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.level).into())
    .from_env_lossy();

  let Some(file) = &config.file else {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(false)
      .init();
    return None;
  };

  let log_dir = file
    .parent()
    .filter(|dir| !dir.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  let file_name = file
    .file_name()
    .map(|name| name.to_os_string())
    .unwrap_or_else(|| DEFAULT_LOG_FILE.into());

  if std::fs::create_dir_all(log_dir).is_err() {
    // Fall back to console-only logging
    init_cli_logging();
    return None;
  }

  let file_appender = tracing_appender::rolling::daily(log_dir, file_name);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_log_level() {
    assert_eq!(parse_log_level("DEBUG"), LevelFilter::DEBUG);
    assert_eq!(parse_log_level("off"), LevelFilter::OFF);
    assert_eq!(parse_log_level("verbose"), LevelFilter::INFO);
  }
}
