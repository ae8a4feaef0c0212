//! Event eligibility and duplicate-signal suppression

use std::{
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use crate::event::{ChangeSet, FsEvent, Op};

/// Base names that never trigger a rebuild
const IGNORED_NAMES: &[&str] = &[
  // macOS Finder metadata
  ".DS_Store",
  // Vim writes this to probe whether a directory is writable
  "4913",
];

/// Vim swap file extensions
const SWAP_EXTENSIONS: &[&str] = &["swp", "swo", "swx"];

/// Whether an event should trigger a rebuild.
///
/// Editor and OS noise is ignored along with any base name listed in
/// `extra_ignored`. Only create, remove and write count: a rename is
/// followed by a create for the new name, and attribute changes don't
/// affect build output.
pub fn should_rebuild(event: &FsEvent, extra_ignored: &[String]) -> bool {
  let Some(base) = event.path.file_name().and_then(|name| name.to_str()) else {
    return false;
  };

  if IGNORED_NAMES.contains(&base) || extra_ignored.iter().any(|name| name == base) {
    return false;
  }

  // Backup files
  if base.ends_with('~') {
    return false;
  }

  if let Some((_, ext)) = base.rsplit_once('.')
    && SWAP_EXTENSIONS.contains(&ext)
  {
    return false;
  }

  // Emacs lock and autosave files
  if base.starts_with(".#") || (base.len() > 1 && base.starts_with('#') && base.ends_with('#')) {
    return false;
  }

  matches!(event.op, Op::Create | Op::Remove | Op::Write)
}

/// Whether `path` is build output rather than a source.
///
/// A path matches an ignored entry when it lies inside it (the target
/// directory) or sits next to it with a name starting with its name, which
/// covers log files that get a date suffix when they roll over.
pub fn is_ignored_path(path: &Path, ignored: &[PathBuf]) -> bool {
  ignored.iter().any(|ignored| {
    if path.starts_with(ignored) {
      return true;
    }
    let (Some(name), Some(prefix)) = (
      path.file_name().and_then(|n| n.to_str()),
      ignored.file_name().and_then(|n| n.to_str()),
    ) else {
      return false;
    };
    path.parent() == ignored.parent() && name.starts_with(prefix)
  })
}

/// Whether `changed` repeats the previous signal closely enough to skip it.
///
/// Some backends report a single save as several bursts on the same file.
/// A set identical to the last one signalled within `window` of that
/// signal is treated as one of those bursts.
pub fn within_same_file_quiesce(
  last_signal_at: Instant,
  now: Instant,
  changed: &ChangeSet,
  last_changed: Option<&ChangeSet>,
  window: Duration,
) -> bool {
  let Some(last_changed) = last_changed else {
    return false;
  };

  if now.saturating_duration_since(last_signal_at) > window {
    return false;
  }

  // Cheap check before comparing every path
  if last_changed.len() != changed.len() {
    return false;
  }

  last_changed == changed
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;

  fn set(paths: &[&str]) -> ChangeSet {
    paths.iter().map(PathBuf::from).collect()
  }

  #[test]
  fn test_should_rebuild_by_op() {
    let none: &[String] = &[];
    assert!(should_rebuild(&FsEvent::new("a/path", Op::Create), none));
    assert!(should_rebuild(&FsEvent::new("a/path", Op::Remove), none));
    assert!(should_rebuild(&FsEvent::new("a/path", Op::Write), none));
    assert!(!should_rebuild(&FsEvent::new("a/path", Op::Chmod), none));
    assert!(!should_rebuild(&FsEvent::new("a/path", Op::Rename), none));
  }

  #[test]
  fn test_is_ignored_path() {
    let ignored = vec![PathBuf::from("/site/public"), PathBuf::from("/site/kiln.log")];

    assert!(is_ignored_path(Path::new("/site/public"), &ignored));
    assert!(is_ignored_path(Path::new("/site/public/posts/a.html"), &ignored));
    assert!(is_ignored_path(Path::new("/site/kiln.log"), &ignored));
    assert!(is_ignored_path(Path::new("/site/kiln.log.2026-10-18"), &ignored));

    assert!(!is_ignored_path(Path::new("/site/publication.md"), &ignored));
    assert!(!is_ignored_path(Path::new("/site/posts/kiln.log"), &ignored));
    assert!(!is_ignored_path(Path::new("/site/index.md"), &ignored));
    assert!(!is_ignored_path(Path::new("/site/index.md"), &[]));
  }

  #[test]
  fn test_should_rebuild_ignores_noise() {
    let none: &[String] = &[];
    for path in [
      "a/.DS_Store",
      "a/4913",
      "a/path~",
      "a/.index.md.swp",
      "a/.index.md.swo",
      "a/.index.md.swx",
      "a/.#index.md",
      "a/#index.md#",
    ] {
      assert!(!should_rebuild(&FsEvent::new(path, Op::Create), none), "{path}");
    }

    // Not editor noise
    assert!(should_rebuild(&FsEvent::new("a/#", Op::Write), none));
    assert!(should_rebuild(&FsEvent::new("a/notes.swift", Op::Write), none));
  }

  #[test]
  fn test_should_rebuild_ignores_configured_names() {
    let extra = vec!["Thumbs.db".to_string()];
    assert!(!should_rebuild(&FsEvent::new("img/Thumbs.db", Op::Write), &extra));
    assert!(should_rebuild(&FsEvent::new("img/cat.jpg", Op::Write), &extra));
  }

  #[test]
  fn test_within_same_file_quiesce() {
    let window = Duration::from_millis(100);
    let base = Instant::now();
    let changes = set(&["a/path"]);

    // Nothing signalled before
    assert!(!within_same_file_quiesce(base, base, &changes, None, window));

    // Outside the window
    assert!(!within_same_file_quiesce(
      base,
      base + Duration::from_secs(10),
      &changes,
      Some(&set(&["a/path"])),
      window
    ));

    // Different paths
    assert!(!within_same_file_quiesce(base, base, &changes, Some(&set(&["b/path"])), window));
    assert!(!within_same_file_quiesce(
      base,
      base,
      &changes,
      Some(&set(&["a/path", "b/path"])),
      window
    ));

    // Same paths within the window
    assert!(within_same_file_quiesce(base, base, &changes, Some(&set(&["a/path"])), window));
  }
}
