use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use engine::{BuildError, Engine};
use kiln_core::Config;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::site::copy_site;

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Directory containing source files (default: build.source_dir)
  #[arg(short, long)]
  pub source: Option<PathBuf>,
  /// Directory the site is built into (default: build.target_dir)
  #[arg(short, long)]
  pub target: Option<PathBuf>,
  /// Number of concurrent jobs (default: pool.concurrency)
  #[arg(short = 'j', long)]
  pub concurrency: Option<usize>,
  /// Rebuild everything, ignoring modification times
  #[arg(long)]
  pub force: bool,
  /// Keep running and rebuild when sources change
  #[arg(short, long)]
  pub watch: bool,
  /// Config file to use instead of kiln.toml / the user config
  #[arg(short, long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// Log the slowest jobs after each build
  #[arg(long)]
  pub slowest: bool,
}

impl BuildArgs {
  /// Load the config file and apply command line overrides
  pub fn load_config(&self) -> Result<Config> {
    let mut config = match &self.config {
      Some(path) => Config::load(path)?,
      None => {
        let cwd = std::env::current_dir().context("reading current directory")?;
        Config::load_for_project(&cwd)
      }
    };

    if let Some(source) = &self.source {
      config.build.source_dir = source.clone();
    }
    if let Some(target) = &self.target {
      config.build.target_dir = target.clone();
    }
    if let Some(concurrency) = self.concurrency {
      config.pool.concurrency = concurrency;
    }
    config.build.force |= self.force;
    config.watch.enabled |= self.watch;

    Ok(config)
  }
}

pub async fn cmd_build(config: Config, slowest: bool) -> Result<()> {
  let watch = config.watch.enabled;
  info!(
    source = %config.build.source_dir.display(),
    target = %config.build.target_dir.display(),
    concurrency = config.pool.concurrency(),
    watch,
    "Building site"
  );

  let mut engine = Engine::new(config)?.with_log_slowest(slowest);

  if watch {
    engine.build_loop(copy_site, CancellationToken::new()).await?;
    return Ok(());
  }

  if let Err(e) = engine.build(copy_site).await {
    if let BuildError::Failed { errors } = &e {
      error!(errors = errors.len(), "Build failed");
    }
    return Err(e.into());
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use super::*;

  fn args() -> BuildArgs {
    BuildArgs {
      source: None,
      target: None,
      concurrency: None,
      force: false,
      watch: false,
      config: None,
      slowest: false,
    }
  }

  #[test]
  fn test_overrides_apply_on_top_of_config_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("kiln.toml");
    std::fs::write(&path, "[build]\nsource_dir = \"content\"\n\n[pool]\nconcurrency = 3\n").unwrap();

    let config = BuildArgs {
      config: Some(path.clone()),
      ..args()
    }
    .load_config()
    .unwrap();
    assert_eq!(config.build.source_dir, Path::new("content"));
    assert_eq!(config.pool.concurrency, 3);
    assert!(!config.build.force);

    let config = BuildArgs {
      config: Some(path),
      target: Some(PathBuf::from("out")),
      concurrency: Some(7),
      force: true,
      watch: true,
      ..args()
    }
    .load_config()
    .unwrap();
    assert_eq!(config.build.target_dir, Path::new("out"));
    assert_eq!(config.pool.concurrency, 7);
    assert!(config.build.force);
    assert!(config.watch.enabled);
  }

  #[test]
  fn test_missing_config_file_is_an_error() {
    let result = BuildArgs {
      config: Some(PathBuf::from("/definitely/not/here/kiln.toml")),
      ..args()
    }
    .load_config();
    assert!(result.is_err());
  }
}
