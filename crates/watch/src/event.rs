use std::{collections::BTreeSet, fmt, path::PathBuf};

/// The set of changed paths carried by one rebuild signal
pub type ChangeSet = BTreeSet<PathBuf>;

/// Filesystem operation reported by an event source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  Create,
  Remove,
  Write,
  Rename,
  /// Permission or other attribute change
  Chmod,
}

impl fmt::Display for Op {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Create => "create",
      Self::Remove => "remove",
      Self::Write => "write",
      Self::Rename => "rename",
      Self::Chmod => "chmod",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
  pub path: PathBuf,
  pub op: Op,
}

impl FsEvent {
  pub fn new(path: impl Into<PathBuf>, op: Op) -> Self {
    Self { path: path.into(), op }
  }
}
