//! The bundled build function: mirror the source tree into the target

use std::path::Path;

use anyhow::Context as _;
use engine::{Context, fs};
use kiln_core::config::PROJECT_CONFIG_FILE;
use walkdir::WalkDir;

/// Queue one copy job per non-hidden source file.
///
/// Build output living inside the source directory (the target directory
/// and log files) is skipped, as is the project config file.
pub fn copy_site(ctx: &Context) -> anyhow::Result<()> {
  let source_root = ctx.source_dir().to_path_buf();
  let target_root = ctx.target_dir().to_path_buf();

  let walker = WalkDir::new(&source_root)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| entry.depth() == 0 || !skip(ctx, entry.path()));

  for entry in walker {
    let entry = entry.with_context(|| format!("walking {}", source_root.display()))?;

    if entry.file_type().is_dir() {
      ctx.watch(entry.path());
      continue;
    }
    if !entry.file_type().is_file() || (entry.depth() == 1 && entry.file_name() == PROJECT_CONFIG_FILE) {
      continue;
    }

    let relative = entry.path().strip_prefix(&source_root)?.to_path_buf();
    let source = entry.into_path();
    let target = target_root.join(&relative);
    let job_ctx = ctx.clone();

    ctx.add_job(format!("copy {}", relative.display()), move || {
      fs::copy_file(&job_ctx, &source, &target)
    });
  }

  Ok(())
}

fn skip(ctx: &Context, path: &Path) -> bool {
  fs::is_hidden(path) || ctx.is_build_output(path)
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use engine::Engine;
  use kiln_core::Config;
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use super::*;

  fn write(path: PathBuf, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
  }

  #[tokio::test]
  async fn test_copy_site_mirrors_tree() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root.join("index.html"), "home");
    write(root.join("posts/hello.html"), "hello");
    write(root.join(".git/HEAD"), "ref");
    write(root.join(".env"), "secret");
    write(root.join(PROJECT_CONFIG_FILE), "");
    // A previous build's output inside the source tree
    write(root.join("public/stale.html"), "old");

    let mut config = Config::default();
    config.build.source_dir = root.to_path_buf();
    config.build.target_dir = root.join("public");
    config.pool.concurrency = 2;

    let mut engine = Engine::new(config).unwrap();
    let summary = engine.build(copy_site).await.unwrap();
    assert_eq!((summary.jobs, summary.executed), (2, 2));

    assert_eq!(std::fs::read_to_string(root.join("public/index.html")).unwrap(), "home");
    assert_eq!(std::fs::read_to_string(root.join("public/posts/hello.html")).unwrap(), "hello");
    assert!(!root.join("public/.env").exists());
    assert!(!root.join("public/public").exists());

    let summary = engine.build(copy_site).await.unwrap();
    assert_eq!(summary.executed, 0);
  }

  #[tokio::test]
  async fn test_copy_site_skips_log_files() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root.join("index.html"), "home");
    write(root.join("kiln.log.2026-10-18"), "INFO Built site");

    let mut config = Config::default();
    config.build.source_dir = root.to_path_buf();
    config.build.target_dir = root.join("public");
    config.log.file = Some(root.join("kiln.log"));

    let mut engine = Engine::new(config).unwrap();
    let summary = engine.build(copy_site).await.unwrap();
    assert_eq!(summary.jobs, 1);
    assert!(root.join("public/index.html").exists());
    assert!(!root.join("public/kiln.log.2026-10-18").exists());
  }
}
