//! Filesystem watching for loop-mode builds
//!
//! ```text
//! notify ─▶ NotifySource ─▶ events/errors ─▶ Debouncer ─▶ RebuildHandle.changes ─▶ orchestrator
//!                                                ▲                                      │
//!                                                └────────── RebuildHandle.done ◀───────┘
//! ```
//!
//! The debouncer never depends on notify directly; anything that can fill
//! the event and error channels can drive it.

mod debounce;
mod event;
mod filter;
mod source;

pub use debounce::{Debouncer, RebuildHandle};
pub use event::{ChangeSet, FsEvent, Op};
pub use filter::{is_ignored_path, should_rebuild, within_same_file_quiesce};
pub use source::{EventStreams, NotifySource, PathWatcher, WatchError};
