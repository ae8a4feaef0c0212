//! Configuration system for kiln with per-project overrides.
//!
//! Config priority: explicit `--config` path > project (`kiln.toml`) > user
//! (`~/.config/kiln/config.toml`) > defaults.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

/// Name of the project-level config file, looked up in the build root.
pub const PROJECT_CONFIG_FILE: &str = "kiln.toml";

/// Concurrency used when none (or zero) is configured.
pub const DEFAULT_CONCURRENCY: usize = 10;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while loading an explicit config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

// ============================================================================
// Build Configuration
// ============================================================================

/// Source and target locations for a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
  /// Directory containing source files (default: ".")
  pub source_dir: PathBuf,

  /// Directory the site is built into (default: "./public")
  pub target_dir: PathBuf,

  /// Bypass change detection and redo all work (default: false)
  pub force: bool,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      source_dir: PathBuf::from("."),
      target_dir: PathBuf::from("./public"),
      force: false,
    }
  }
}

// ============================================================================
// Pool Configuration
// ============================================================================

/// Job pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
  /// Number of worker threads (default: 10, 0 means default)
  pub concurrency: usize,

  /// Capacity of the submission queue; `submit` blocks when full (default: 500)
  pub queue_capacity: usize,

  /// Seconds before a running job is reported as slow (default: 15)
  /// Jobs are never cancelled, this only logs.
  pub job_soft_timeout_secs: u64,

  /// Seconds before a waiting round dumps worker state (default: 60)
  pub wait_soft_timeout_secs: u64,

  /// Maximum errors or jobs printed after a round (default: 10)
  pub max_messages: usize,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      concurrency: DEFAULT_CONCURRENCY,
      queue_capacity: 500,
      job_soft_timeout_secs: 15,
      wait_soft_timeout_secs: 60,
      max_messages: 10,
    }
  }
}

impl PoolConfig {
  /// Effective worker count
  pub fn concurrency(&self) -> usize {
    if self.concurrency == 0 {
      DEFAULT_CONCURRENCY
    } else {
      self.concurrency
    }
  }

  /// Effective queue capacity (never zero, a rendezvous queue would serialize the feeder)
  pub fn queue_capacity(&self) -> usize {
    self.queue_capacity.max(1)
  }

  pub fn job_soft_timeout(&self) -> Duration {
    Duration::from_secs(self.job_soft_timeout_secs)
  }

  pub fn wait_soft_timeout(&self) -> Duration {
    Duration::from_secs(self.wait_soft_timeout_secs)
  }
}

// ============================================================================
// Watch Configuration
// ============================================================================

/// Filesystem watching and rebuild debouncing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
  /// Keep rebuilding on filesystem changes (default: false)
  pub enabled: bool,

  /// Window in which an identical set of changes does not trigger another
  /// rebuild, in milliseconds (default: 100)
  pub quiesce_ms: u64,

  /// Buffer size of the raw event channel (default: 256)
  pub event_buffer: usize,

  /// Poll interval for the polling notify backend in seconds (default: 2)
  pub poll_interval_secs: u64,

  /// Extra file names that never trigger a rebuild
  pub ignore_names: Vec<String>,
}

impl Default for WatchConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      quiesce_ms: 100,
      event_buffer: 256,
      poll_interval_secs: 2,
      ignore_names: Vec::new(),
    }
  }
}

impl WatchConfig {
  pub fn quiesce(&self) -> Duration {
    Duration::from_millis(self.quiesce_ms)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs)
  }

  pub fn event_buffer(&self) -> usize {
    self.event_buffer.max(1)
  }
}

// ============================================================================
// Cache Configuration
// ============================================================================

/// Expiry settings for the filesystem caches handed to build functions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// How long a directory listing is reused, in seconds (default: 5)
  pub dir_listing_ttl_secs: u64,

  /// How long a marker-file existence check is reused, in seconds (default: 60)
  pub marker_ttl_secs: u64,

  /// Maximum entries per cache (default: 10000)
  pub max_entries: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      dir_listing_ttl_secs: 5,
      marker_ttl_secs: 60,
      max_entries: 10_000,
    }
  }
}

impl CacheConfig {
  pub fn dir_listing_ttl(&self) -> Duration {
    Duration::from_secs(self.dir_listing_ttl_secs)
  }

  pub fn marker_ttl(&self) -> Duration {
    Duration::from_secs(self.marker_ttl_secs)
  }
}

// ============================================================================
// Log Configuration
// ============================================================================

/// Logging settings (applied by the binary, libraries only emit events)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  #[serde(default = "default_log_level")]
  pub level: String,

  /// Write logs to this file (rotated daily) instead of the console
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// kiln configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Source and target directories
  #[serde(default)]
  pub build: BuildConfig,

  /// Job pool settings
  #[serde(default)]
  pub pool: PoolConfig,

  /// Watch mode settings
  #[serde(default)]
  pub watch: WatchConfig,

  /// Filesystem cache settings
  #[serde(default)]
  pub cache: CacheConfig,

  /// Logging settings
  #[serde(default)]
  pub log: LogConfig,
}

impl Config {
  /// Load config from an explicit path
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load config for a project, with fallback to user config
  pub fn load_for_project(project_path: &Path) -> Self {
    // Try project-relative first
    let project_config = Self::project_config_path(project_path);
    if project_config.exists() {
      match Self::load(&project_config) {
        Ok(config) => return config,
        Err(e) => tracing::warn!(error = %e, "Ignoring invalid project config"),
      }
    }

    // Fall back to user config
    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
    {
      match Self::load(&user_config_path) {
        Ok(config) => return config,
        Err(e) => tracing::warn!(error = %e, "Ignoring invalid user config"),
      }
    }

    // Default
    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("KILN_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("kiln").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("kiln").join("config.toml"))
  }

  /// Get the project-relative config path
  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(PROJECT_CONFIG_FILE)
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();

    format!(
      r#"# kiln configuration
# Place in ./kiln.toml (project) or ~/.config/kiln/config.toml (user)

# ============================================================================
# Build
# ============================================================================

[build]
source_dir = "{source_dir}"
target_dir = "{target_dir}"
# Redo all work regardless of modification times
force = false

# ============================================================================
# Job Pool
# ============================================================================

[pool]
# Number of worker threads
concurrency = {concurrency}
# Submissions block once this many jobs are queued
queue_capacity = {queue_capacity}
# Report jobs running longer than this (jobs are never cancelled)
job_soft_timeout_secs = {job_soft_timeout_secs}
# Dump worker state when a round takes longer than this
wait_soft_timeout_secs = {wait_soft_timeout_secs}
# Maximum errors / slow jobs printed after a round
max_messages = {max_messages}

# ============================================================================
# Watch Mode
# ============================================================================

[watch]
enabled = false
# Identical change sets within this window do not trigger another build
quiesce_ms = {quiesce_ms}
event_buffer = {event_buffer}
poll_interval_secs = {poll_interval_secs}
# Additional file names to ignore, e.g. ["Thumbs.db"]
ignore_names = []

# ============================================================================
# Caches
# ============================================================================

[cache]
dir_listing_ttl_secs = {dir_listing_ttl_secs}
marker_ttl_secs = {marker_ttl_secs}
max_entries = {max_entries}

# ============================================================================
# Logging
# ============================================================================

[log]
# off, error, warn, info, debug, trace (RUST_LOG overrides)
level = "{level}"
# file = "kiln.log"
"#,
      source_dir = defaults.build.source_dir.display(),
      target_dir = defaults.build.target_dir.display(),
      concurrency = defaults.pool.concurrency,
      queue_capacity = defaults.pool.queue_capacity,
      job_soft_timeout_secs = defaults.pool.job_soft_timeout_secs,
      wait_soft_timeout_secs = defaults.pool.wait_soft_timeout_secs,
      max_messages = defaults.pool.max_messages,
      quiesce_ms = defaults.watch.quiesce_ms,
      event_buffer = defaults.watch.event_buffer,
      poll_interval_secs = defaults.watch.poll_interval_secs,
      dir_listing_ttl_secs = defaults.cache.dir_listing_ttl_secs,
      marker_ttl_secs = defaults.cache.marker_ttl_secs,
      max_entries = defaults.cache.max_entries,
      level = defaults.log.level,
    )
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.build.source_dir, PathBuf::from("."));
    assert_eq!(config.build.target_dir, PathBuf::from("./public"));
    assert_eq!(config.pool.concurrency(), 10);
    assert_eq!(config.pool.queue_capacity(), 500);
    assert_eq!(config.pool.job_soft_timeout(), Duration::from_secs(15));
    assert_eq!(config.pool.max_messages, 10);
    assert_eq!(config.watch.quiesce(), Duration::from_millis(100));
    assert!(!config.watch.enabled);
    assert_eq!(config.log.level, "info");
  }

  #[test]
  fn test_zero_concurrency_falls_back_to_default() {
    let pool = PoolConfig {
      concurrency: 0,
      queue_capacity: 0,
      ..Default::default()
    };
    assert_eq!(pool.concurrency(), DEFAULT_CONCURRENCY);
    assert_eq!(pool.queue_capacity(), 1);
  }

  #[test]
  fn test_load_project_config() {
    let temp = TempDir::new().unwrap();
    let config_content = r#"
[pool]
concurrency = 4

[watch]
quiesce_ms = 250
ignore_names = ["Thumbs.db"]
"#;
    std::fs::write(temp.path().join(PROJECT_CONFIG_FILE), config_content).unwrap();

    let config = Config::load_for_project(temp.path());
    assert_eq!(config.pool.concurrency(), 4);
    // Unspecified keys keep their defaults
    assert_eq!(config.pool.queue_capacity, 500);
    assert_eq!(config.watch.quiesce(), Duration::from_millis(250));
    assert_eq!(config.watch.ignore_names, vec!["Thumbs.db".to_string()]);
  }

  #[test]
  fn test_load_reports_parse_errors() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.toml");
    std::fs::write(&path, "[pool\nconcurrency = ").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
  }

  #[test]
  fn test_load_reports_missing_file() {
    let temp = TempDir::new().unwrap();
    let err = Config::load(&temp.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }

  #[test]
  fn test_template_roundtrip() {
    let template = Config::generate_template();
    let parsed: Config = toml::from_str(&template).expect("template should parse");
    assert_eq!(parsed, Config::default());
  }
}
