//! Debouncer - turns raw filesystem events into rebuild signals
//!
//! # States
//!
//! ```text
//!            eligible event
//!   Idle ───────────────────▶ Signal ──▶ AwaitAck ──(ack, nothing new)──▶ Idle
//!    ▲                          ▲           │
//!    │  duplicate within        │           │ events keep being drained
//!    └──── quiesce window ──────┤           │ into the next change set
//!                               └───────────┘
//!                          ack with pending changes
//! ```
//!
//! Only one signal is ever outstanding: nothing else is sent until the
//! orchestrator acknowledges the rebuild through [`RebuildHandle::done`].
//!
//! # Lifecycle
//!
//! The task runs until:
//! - The `CancellationToken` is triggered
//! - The event or error channel closes
//! - The orchestrator drops its [`RebuildHandle`]

use std::{
  path::PathBuf,
  time::{Duration, Instant},
};

use kiln_core::WatchConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::{
  WatchError,
  event::{ChangeSet, FsEvent},
  filter::{is_ignored_path, should_rebuild, within_same_file_quiesce},
};

/// The orchestrator's side of the debouncer
#[derive(Debug)]
pub struct RebuildHandle {
  /// One change set per rebuild
  pub changes: mpsc::Receiver<ChangeSet>,
  /// Send once the rebuild for the last change set finished
  pub done: mpsc::Sender<()>,
}

/// What woke the debouncer up
enum Wake {
  Event(FsEvent),
  Ack,
  Stop,
}

pub struct Debouncer {
  events: mpsc::Receiver<FsEvent>,
  errors: mpsc::Receiver<WatchError>,
  changes: mpsc::Sender<ChangeSet>,
  done: mpsc::Receiver<()>,
  ignore_names: Vec<String>,
  ignore_paths: Vec<PathBuf>,
  quiesce: Duration,
  cancel: CancellationToken,
}

impl Debouncer {
  pub fn new(
    config: &WatchConfig,
    events: mpsc::Receiver<FsEvent>,
    errors: mpsc::Receiver<WatchError>,
    cancel: CancellationToken,
  ) -> (Self, RebuildHandle) {
    let (changes_tx, changes_rx) = mpsc::channel(1);
    let (done_tx, done_rx) = mpsc::channel(1);

    let debouncer = Self {
      events,
      errors,
      changes: changes_tx,
      done: done_rx,
      ignore_names: config.ignore_names.clone(),
      ignore_paths: Vec::new(),
      quiesce: config.quiesce(),
      cancel,
    };
    let handle = RebuildHandle {
      changes: changes_rx,
      done: done_tx,
    };

    (debouncer, handle)
  }

  /// Never rebuild for events under these paths (see [`is_ignored_path`])
  pub fn with_ignored_paths(mut self, paths: Vec<PathBuf>) -> Self {
    self.ignore_paths = paths;
    self
  }

  pub fn spawn(self) -> tokio::task::JoinHandle<()> {
    tokio::spawn(self.run())
  }

  pub async fn run(mut self) {
    debug!(quiesce = ?self.quiesce, "Debouncer started");

    let mut pending = ChangeSet::new();
    // The previous signal survives idle periods so a late duplicate burst is
    // still recognised
    let mut last_signal: Option<(Instant, ChangeSet)> = None;

    'run: loop {
      // Idle until something eligible arrives
      while pending.is_empty() {
        match self.next(false).await {
          Wake::Event(event) => self.accept(&mut pending, event),
          Wake::Ack => {}
          Wake::Stop => break 'run,
        }
      }

      // Pick up anything that arrived in the same burst
      while let Ok(event) = self.events.try_recv() {
        self.accept(&mut pending, event);
      }

      let changed = std::mem::take(&mut pending);
      let now = Instant::now();
      let duplicate = last_signal.as_ref().is_some_and(|(at, last)| {
        within_same_file_quiesce(*at, now, &changed, Some(last), self.quiesce)
      });
      if duplicate {
        info!(paths = ?changed, "Identical file(s) changed within quiesce time; not rebuilding");
        continue;
      }

      debug!(paths = ?changed, "Signalling rebuild");
      if self.changes.send(changed.clone()).await.is_err() {
        info!("Rebuild receiver dropped; stopping");
        break;
      }
      last_signal = Some((now, changed));

      // Keep draining events while the rebuild runs
      loop {
        match self.next(true).await {
          Wake::Event(event) => self.accept(&mut pending, event),
          Wake::Ack => break,
          Wake::Stop => break 'run,
        }
      }

      trace!(pending = pending.len(), "Rebuild acknowledged");
    }

    debug!("Debouncer stopped");
  }

  /// Wait for the next event, or an acknowledgment when `awaiting_ack`
  async fn next(&mut self, awaiting_ack: bool) -> Wake {
    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!("Debouncer shutting down (cancelled)");
          return Wake::Stop;
        }

        ack = self.done.recv(), if awaiting_ack => {
          return match ack {
            Some(()) => Wake::Ack,
            None => {
              info!("Rebuild handle dropped; stopping");
              Wake::Stop
            }
          };
        }

        event = self.events.recv() => {
          return match event {
            Some(event) => Wake::Event(event),
            None => {
              info!("Watcher detected closed channel; stopping");
              Wake::Stop
            }
          };
        }

        err = self.errors.recv() => match err {
          Some(err) => error!(error = %err, "Error from watcher"),
          None => {
            info!("Watcher detected closed channel; stopping");
            return Wake::Stop;
          }
        },
      }
    }
  }

  fn accept(&self, pending: &mut ChangeSet, event: FsEvent) {
    if !should_rebuild(&event, &self.ignore_names) || is_ignored_path(&event.path, &self.ignore_paths) {
      trace!(path = %event.path.display(), op = %event.op, "Ignoring event");
      return;
    }

    debug!(path = %event.path.display(), op = %event.op, "Received event from watcher");
    pending.insert(event.path);
  }
}
