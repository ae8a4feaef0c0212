//! Modification-time based change detection
//!
//! Jobs ask the tracker whether a source path changed since the last time
//! anyone asked about it, and skip their work when it didn't.
//!
//! # Policy
//!
//! - A path seen for the first time is always reported as changed.
//! - A path that does not exist is reported as unchanged: there is nothing
//!   to build from it.
//! - Any other stat failure (permissions, I/O errors, a platform without
//!   modification times) is logged and reported as changed, so a transient
//!   failure never silently skips work.
//! - Equal timestamps count as unchanged; only a strictly newer time is a
//!   change. The newest observation always becomes the next baseline.

use std::{
  io,
  path::{Path, PathBuf},
  time::SystemTime,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, warn};

/// Thread-safe path -> last observed modification time map.
///
/// Entries are created on first check and never removed.
#[derive(Debug, Default)]
pub struct ChangeTracker {
  mod_times: DashMap<PathBuf, SystemTime>,
}

impl ChangeTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Check whether `path` changed since its previous check and record the
  /// newly observed modification time.
  ///
  /// The compare and the record happen under the same shard lock, so two
  /// jobs checking one path concurrently can't both see a change.
  pub fn check_and_update(&self, path: &Path) -> bool {
    let mod_time = match std::fs::metadata(path).and_then(|m| m.modified()) {
      Ok(t) => t,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "Path does not exist, nothing to rebuild");
        return false;
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Failed to stat path, assuming changed");
        return true;
      }
    };

    match self.mod_times.entry(path.to_path_buf()) {
      Entry::Vacant(entry) => {
        entry.insert(mod_time);
        debug!(path = %path.display(), "First sight of path");
        true
      }
      Entry::Occupied(mut entry) => {
        let last_mod_time = entry.insert(mod_time);
        let changed = last_mod_time < mod_time;
        if changed {
          debug!(path = %path.display(), ?last_mod_time, ?mod_time, "Path changed");
        } else {
          debug!(path = %path.display(), "No changes to path");
        }
        changed
      }
    }
  }

  /// Number of tracked paths
  pub fn len(&self) -> usize {
    self.mod_times.len()
  }

  pub fn is_empty(&self) -> bool {
    self.mod_times.is_empty()
  }
}
