//! Bridge from notify's callback thread to the debouncer's channels

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
};

use kiln_core::WatchConfig;
use notify::{
  Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
  event::{ModifyKind, RenameMode},
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::event::{FsEvent, Op};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch {path}: {source}")]
  Watch {
    path: PathBuf,
    #[source]
    source: notify::Error,
  },

  #[error("Watcher error: {0}")]
  Event(#[source] notify::Error),
}

/// Something that can be told to start watching a path
pub trait PathWatcher: Send + Sync {
  /// Start watching `path`. Watching the same path twice is a no-op.
  fn watch(&self, path: &Path) -> Result<(), WatchError>;
}

/// Receiving ends fed by a [`NotifySource`]
#[derive(Debug)]
pub struct EventStreams {
  pub events: mpsc::Receiver<FsEvent>,
  pub errors: mpsc::Receiver<WatchError>,
}

/// OS-level file watcher.
///
/// Directories are registered non-recursively as build code touches them,
/// so only sources that are actually used are watched.
pub struct NotifySource {
  watcher: Mutex<RecommendedWatcher>,
  watched: Mutex<HashSet<PathBuf>>,
}

impl NotifySource {
  pub fn new(config: &WatchConfig) -> Result<(Self, EventStreams), WatchError> {
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer());
    let (error_tx, error_rx) = mpsc::channel(config.event_buffer());

    let notify_config = Config::default().with_poll_interval(config.poll_interval());

    let watcher = RecommendedWatcher::new(
      move |res: notify::Result<Event>| match res {
        // Runs on notify's thread. blocking_send applies backpressure rather
        // than dropping events; it only fails once the debouncer is gone.
        Ok(event) => {
          for fs_event in translate(event) {
            if event_tx.blocking_send(fs_event).is_err() {
              trace!("Event receiver closed, dropping event");
              return;
            }
          }
        }
        Err(e) => {
          if error_tx.blocking_send(WatchError::Event(e)).is_err() {
            trace!("Error receiver closed, dropping error");
          }
        }
      },
      notify_config,
    )
    .map_err(WatchError::Init)?;

    let source = Self {
      watcher: Mutex::new(watcher),
      watched: Mutex::new(HashSet::new()),
    };
    let streams = EventStreams {
      events: event_rx,
      errors: error_rx,
    };

    Ok((source, streams))
  }

  /// Paths registered so far
  pub fn watched(&self) -> Vec<PathBuf> {
    let mut paths: Vec<_> = self.watched.lock().iter().cloned().collect();
    paths.sort();
    paths
  }
}

impl PathWatcher for NotifySource {
  fn watch(&self, path: &Path) -> Result<(), WatchError> {
    let mut watched = self.watched.lock();
    if watched.contains(path) {
      return Ok(());
    }

    self
      .watcher
      .lock()
      .watch(path, RecursiveMode::NonRecursive)
      .map_err(|source| WatchError::Watch {
        path: path.to_path_buf(),
        source,
      })?;

    debug!(path = %path.display(), "Watching path");
    watched.insert(path.to_path_buf());
    Ok(())
  }
}

/// Map a notify event to zero or more filesystem events
fn translate(event: Event) -> Vec<FsEvent> {
  let op = match event.kind {
    EventKind::Create(_) => Op::Create,
    EventKind::Remove(_) => Op::Remove,
    EventKind::Modify(ModifyKind::Metadata(_)) => Op::Chmod,
    EventKind::Modify(ModifyKind::Name(mode)) => return translate_rename(mode, event.paths),
    EventKind::Modify(_) => Op::Write,
    EventKind::Access(_) | EventKind::Any | EventKind::Other => {
      trace!(kind = ?event.kind, "Ignoring event");
      return Vec::new();
    }
  };

  event.paths.into_iter().map(|path| FsEvent { path, op }).collect()
}

/// The old name is a rename, the new name a create
fn translate_rename(mode: RenameMode, paths: Vec<PathBuf>) -> Vec<FsEvent> {
  match mode {
    RenameMode::From => paths.into_iter().map(|p| FsEvent::new(p, Op::Rename)).collect(),
    RenameMode::To => paths.into_iter().map(|p| FsEvent::new(p, Op::Create)).collect(),
    RenameMode::Both => {
      let mut paths = paths.into_iter();
      let mut events = Vec::with_capacity(2);
      if let Some(from) = paths.next() {
        events.push(FsEvent::new(from, Op::Rename));
      }
      events.extend(paths.map(|to| FsEvent::new(to, Op::Create)));
      events
    }
    // Backends that can't tell the two sides apart
    RenameMode::Any | RenameMode::Other => paths
      .into_iter()
      .map(|path| {
        let op = if path.exists() { Op::Create } else { Op::Rename };
        FsEvent::new(path, op)
      })
      .collect(),
  }
}
