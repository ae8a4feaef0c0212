//! Filesystem lookup caches
//!
//! Directory listings and marker-file existence checks are repeated many
//! times per build by different jobs. Both are cached with a TTL and dropped
//! early for any path the watcher reports as changed.
//!
//! Keys are normalized absolute paths, so a listing read through a
//! relative source directory is dropped by the watcher's absolute path.

use std::{
  ffi::OsString,
  io,
  path::{Path, PathBuf},
  sync::Arc,
};

use kiln_core::CacheConfig;
use moka::sync::Cache;
use tracing::trace;

use crate::fs::{is_hidden, normalize};

/// Cheap to clone; clones share the same entries
#[derive(Clone)]
pub struct FsCache {
  listings: Cache<PathBuf, Arc<Vec<OsString>>>,
  markers: Cache<PathBuf, bool>,
}

impl FsCache {
  pub fn new(config: &CacheConfig) -> Self {
    Self {
      listings: Cache::builder()
        .max_capacity(config.max_entries)
        .time_to_live(config.dir_listing_ttl())
        .build(),
      markers: Cache::builder()
        .max_capacity(config.max_entries)
        .time_to_live(config.marker_ttl())
        .build(),
    }
  }

  /// Non-hidden entries of `dir`, joined onto `dir` as given, sorted
  pub fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
    let key = normalize(dir);
    let names = self
      .listings
      .try_get_with(key.clone(), || list_names(&key).map(Arc::new))
      .map_err(|e| io::Error::new(e.kind(), e.to_string()))?;
    Ok(names.iter().map(|name| dir.join(name)).collect())
  }

  /// Whether a marker file exists
  pub fn marker_exists(&self, path: &Path) -> bool {
    self.markers.get_with(normalize(path), || path.exists())
  }

  /// Record that a marker was just written
  pub fn set_marker(&self, path: &Path) {
    self.markers.insert(normalize(path), true);
  }

  /// Drop cached entries for `path` and its parent directory
  pub fn invalidate(&self, path: &Path) {
    let path = normalize(path);
    trace!(path = %path.display(), "Invalidating cached lookups");
    self.listings.invalidate(&path);
    self.markers.invalidate(&path);
    if let Some(parent) = path.parent() {
      self.listings.invalidate(parent);
    }
  }

  pub fn invalidate_all(&self) {
    self.listings.invalidate_all();
    self.markers.invalidate_all();
  }
}

fn list_names(dir: &Path) -> io::Result<Vec<OsString>> {
  let mut names = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let name = entry?.file_name();
    if !is_hidden(Path::new(&name)) {
      names.push(name);
    }
  }
  names.sort();
  Ok(names)
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use super::*;

  fn cache() -> FsCache {
    FsCache::new(&CacheConfig::default())
  }

  #[test]
  fn test_read_dir_skips_hidden_and_sorts() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("b.md"), "").unwrap();
    std::fs::write(dir.path().join("a.md"), "").unwrap();
    std::fs::write(dir.path().join(".hidden"), "").unwrap();

    let listing = cache().read_dir(dir.path()).unwrap();
    assert_eq!(listing, vec![dir.path().join("a.md"), dir.path().join("b.md")]);
  }

  #[test]
  fn test_invalidate_matches_any_spelling_of_the_dir() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.md"), "").unwrap();
    let dotted = dir.path().join("./src/../src");

    let cache = cache();
    let listing = cache.read_dir(&dotted).unwrap();
    // Entries keep the caller's spelling
    assert_eq!(listing, vec![dotted.join("a.md")]);

    std::fs::write(dir.path().join("src/b.md"), "").unwrap();
    cache.invalidate(&dir.path().join("src/b.md"));
    assert_eq!(cache.read_dir(&dotted).unwrap().len(), 2);
    assert_eq!(cache.read_dir(&dir.path().join("src")).unwrap().len(), 2);
  }

  #[test]
  fn test_listing_is_cached_until_invalidated() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.md"), "").unwrap();

    let cache = cache();
    assert_eq!(cache.read_dir(dir.path()).unwrap().len(), 1);

    std::fs::write(dir.path().join("b.md"), "").unwrap();
    assert_eq!(cache.read_dir(dir.path()).unwrap().len(), 1);

    // A change to a file inside drops its parent's listing
    cache.invalidate(&dir.path().join("b.md"));
    assert_eq!(cache.read_dir(dir.path()).unwrap().len(), 2);
  }

  #[test]
  fn test_listing_expires() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
      dir_listing_ttl_secs: 1,
      ..Default::default()
    };
    let cache = FsCache::new(&config);
    assert!(cache.read_dir(dir.path()).unwrap().is_empty());

    std::fs::write(dir.path().join("a.md"), "").unwrap();
    std::thread::sleep(Duration::from_millis(1100));
    assert_eq!(cache.read_dir(dir.path()).unwrap().len(), 1);
  }

  #[test]
  fn test_read_dir_missing_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = cache().read_dir(&dir.path().join("missing")).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
  }

  #[test]
  fn test_marker_exists() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("photo.jpg.marker");
    let cache = cache();

    assert!(!cache.marker_exists(&marker));
    std::fs::write(&marker, "").unwrap();
    // Still the cached answer
    assert!(!cache.marker_exists(&marker));

    cache.set_marker(&marker);
    assert!(cache.marker_exists(&marker));

    cache.invalidate_all();
    std::fs::remove_file(&marker).unwrap();
    assert!(!cache.marker_exists(&marker));
  }
}
