//! Explicit file-dependency collection.
//!
//! Rendering code that pulls in extra files (layouts, partials, includes)
//! records them on a [`Dependencies`] handle that it is given, and the job
//! that owns the output later asks whether any of them changed.

use std::{
  collections::BTreeSet,
  path::{Path, PathBuf},
  sync::Arc,
};

use parking_lot::Mutex;

use crate::change::ChangeTracker;

/// Cheap-to-clone, thread-safe set of dependency paths
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
  paths: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl Dependencies {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a dependency
  pub fn add(&self, path: impl AsRef<Path>) {
    self.paths.lock().insert(path.as_ref().to_path_buf());
  }

  pub fn extend<I, P>(&self, paths: I)
  where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
  {
    let mut guard = self.paths.lock();
    for path in paths {
      guard.insert(path.as_ref().to_path_buf());
    }
  }

  /// Snapshot of recorded paths in sorted order
  pub fn paths(&self) -> Vec<PathBuf> {
    self.paths.lock().iter().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.paths.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.lock().is_empty()
  }

  /// Whether any recorded dependency changed.
  ///
  /// Every path is checked, so all baselines move forward even after the
  /// first change is found.
  pub fn changed(&self, tracker: &ChangeTracker) -> bool {
    self
      .paths()
      .iter()
      .fold(false, |changed, path| tracker.check_and_update(path) || changed)
  }
}
