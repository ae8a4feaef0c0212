//! Filesystem helpers for build functions and jobs
//!
//! Everything that reads a source goes through [`Context::changed`], so an
//! unchanged source is skipped and its directory gets watched in loop mode.

use std::path::{Component, Path, PathBuf};

use anyhow::Context as _;
use tracing::{debug, warn};

use crate::context::Context;

/// Create `path` and any missing parents
pub fn ensure_dir(_ctx: &Context, path: &Path) -> anyhow::Result<()> {
  std::fs::create_dir_all(path).with_context(|| format!("creating directory {}", path.display()))
}

/// Copy `source` to `target` unless the source is unchanged.
///
/// Returns whether the file was copied.
pub fn copy_file(ctx: &Context, source: &Path, target: &Path) -> anyhow::Result<bool> {
  if !ctx.changed(source) {
    return Ok(false);
  }

  if let Some(parent) = target.parent() {
    ensure_dir(ctx, parent)?;
  }

  std::fs::copy(source, target)
    .with_context(|| format!("copying {} to {}", source.display(), target.display()))?;

  debug!(source = %source.display(), target = %target.display(), "Copied file");
  Ok(true)
}

/// Copy `source` into `dir`, keeping its file name
pub fn copy_file_to_dir(ctx: &Context, source: &Path, dir: &Path) -> anyhow::Result<bool> {
  let name = source
    .file_name()
    .with_context(|| format!("{} has no file name", source.display()))?;
  copy_file(ctx, source, &dir.join(name))
}

/// Read `path` if it changed, `None` otherwise
pub fn read_file(ctx: &Context, path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
  if !ctx.changed(path) {
    return Ok(None);
  }

  let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
  Ok(Some(data))
}

/// Non-hidden entries of `dir` as full paths, sorted.
///
/// The directory is watched in loop mode so new files trigger a rebuild.
pub fn read_dir(ctx: &Context, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
  ctx.watch(dir);
  ctx
    .cache()
    .read_dir(dir)
    .with_context(|| format!("reading directory {}", dir.display()))
}

/// Absolute form of `path` with `.` and `..` components removed.
///
/// Watcher events, cache keys and tracked modification times all use this
/// form so a path spelled `./src/a.md` and `/site/src/a.md` is one entry.
pub fn normalize(path: &Path) -> PathBuf {
  let absolute = std::path::absolute(path).unwrap_or_else(|e| {
    warn!(path = %path.display(), error = %e, "Error normalizing path");
    path.to_path_buf()
  });

  let mut normalized = PathBuf::new();
  for component in absolute.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir if normalized.file_name().is_some() => {
        normalized.pop();
      }
      Component::ParentDir if normalized.has_root() => {}
      other => normalized.push(other),
    }
  }
  normalized
}

/// Dot files and dot directories
pub fn is_hidden(path: &Path) -> bool {
  path
    .file_name()
    .and_then(|name| name.to_str())
    .is_some_and(|name| name.starts_with('.'))
}

/// Whether a marker file recording finished work exists
pub fn marker_exists(ctx: &Context, path: &Path) -> bool {
  ctx.cache().marker_exists(path)
}

#[cfg(test)]
mod tests {
  use filetime::FileTime;
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use super::*;
  use crate::context::tests::test_context;

  #[test]
  fn test_normalize() {
    let cwd = std::env::current_dir().unwrap();
    assert_eq!(normalize(Path::new("/site/./src/../public")), PathBuf::from("/site/public"));
    assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
    assert_eq!(normalize(Path::new("src/./a.md")), cwd.join("src/a.md"));
    assert_eq!(normalize(Path::new(".")), cwd);
  }

  #[test]
  fn test_copy_file_skips_unchanged() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let source = dir.path().join("style.css");
    let target = dir.path().join("public/css/style.css");
    std::fs::write(&source, "body {}").unwrap();

    assert!(copy_file(&ctx, &source, &target).unwrap());
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "body {}");
    assert!(!copy_file(&ctx, &source, &target).unwrap());

    std::fs::write(&source, "body { margin: 0 }").unwrap();
    filetime::set_file_mtime(&source, FileTime::from_unix_time(4_000_000_000, 0)).unwrap();
    assert!(copy_file(&ctx, &source, &target).unwrap());
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "body { margin: 0 }");
  }

  #[test]
  fn test_copy_file_forced() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let source = dir.path().join("a.txt");
    std::fs::write(&source, "a").unwrap();

    assert!(copy_file_to_dir(&ctx, &source, &dir.path().join("out")).unwrap());
    assert!(!copy_file_to_dir(&ctx, &source, &dir.path().join("out")).unwrap());
    assert!(copy_file_to_dir(&ctx.forced_context(), &source, &dir.path().join("out")).unwrap());
    assert!(dir.path().join("out/a.txt").exists());
  }

  #[test]
  fn test_copy_missing_source_is_skipped() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let copied = copy_file(&ctx, &dir.path().join("gone.txt"), &dir.path().join("out.txt")).unwrap();
    assert!(!copied);
  }

  #[test]
  fn test_read_file_only_when_changed() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let path = dir.path().join("post.md");
    std::fs::write(&path, "# post").unwrap();

    assert_eq!(read_file(&ctx, &path).unwrap(), Some(b"# post".to_vec()));
    assert_eq!(read_file(&ctx, &path).unwrap(), None);
  }

  #[test]
  fn test_read_dir_and_hidden() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    std::fs::write(dir.path().join("b.md"), "").unwrap();
    std::fs::write(dir.path().join(".git"), "").unwrap();
    std::fs::create_dir(dir.path().join("a")).unwrap();

    assert_eq!(
      read_dir(&ctx, dir.path()).unwrap(),
      vec![dir.path().join("a"), dir.path().join("b.md")]
    );
    assert!(is_hidden(Path::new("x/.git")));
    assert!(!is_hidden(Path::new("x/git")));
  }

  #[test]
  fn test_ensure_dir_and_marker() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let nested = dir.path().join("public/images/2024");
    ensure_dir(&ctx, &nested).unwrap();
    assert!(nested.is_dir());

    let marker = nested.join("cat.jpg.marker");
    assert!(!marker_exists(&ctx, &marker));
  }
}
