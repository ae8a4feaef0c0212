//! Build context handed to the build function and its jobs

use std::{
  io,
  path::{Path, PathBuf},
  sync::Arc,
};

use kiln_core::{ChangeTracker, Config, Dependencies};
use parking_lot::Mutex;
use pool::{Job, JobPool};
use tracing::{error, warn};
use watch::{ChangeSet, PathWatcher, is_ignored_path};

use crate::{cache::FsCache, fs::normalize, stats::Stats};

/// Shared state for one build loop iteration.
///
/// Cloning is cheap and clones share everything except the `forced` flag,
/// which only [`Context::forced_context`] changes.
#[derive(Clone)]
pub struct Context {
  config: Arc<Config>,
  pool: Arc<JobPool>,
  tracker: Arc<ChangeTracker>,
  cache: FsCache,
  watcher: Option<Arc<dyn PathWatcher>>,
  stats: Arc<Mutex<Stats>>,
  changes: Arc<ChangeSet>,
  first_run: bool,
  forced: bool,
}

impl Context {
  pub(crate) fn new(
    config: Arc<Config>,
    pool: Arc<JobPool>,
    tracker: Arc<ChangeTracker>,
    cache: FsCache,
    watcher: Option<Arc<dyn PathWatcher>>,
  ) -> Self {
    let forced = config.build.force;
    Self {
      config,
      pool,
      tracker,
      cache,
      watcher,
      stats: Arc::new(Mutex::new(Stats::default())),
      changes: Arc::new(ChangeSet::new()),
      first_run: true,
      forced,
    }
  }

  /// Context for the next loop iteration with fresh stats
  pub(crate) fn next_iteration(&self, first_run: bool, changes: ChangeSet) -> Self {
    Self {
      stats: Arc::new(Mutex::new(Stats::default())),
      changes: Arc::new(changes),
      first_run,
      ..self.clone()
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn source_dir(&self) -> &Path {
    &self.config.build.source_dir
  }

  pub fn target_dir(&self) -> &Path {
    &self.config.build.target_dir
  }

  pub fn pool(&self) -> &JobPool {
    &self.pool
  }

  pub fn tracker(&self) -> &ChangeTracker {
    &self.tracker
  }

  pub fn cache(&self) -> &FsCache {
    &self.cache
  }

  /// Whether this is the first iteration of the build loop
  pub fn first_run(&self) -> bool {
    self.first_run
  }

  /// Paths the watcher reported for this iteration, empty on the first
  pub fn changes(&self) -> &ChangeSet {
    &self.changes
  }

  pub fn stats(&self) -> Stats {
    self.stats.lock().clone()
  }

  // ==========================================================================
  // Jobs
  // ==========================================================================

  /// Queue a job on the current round
  pub fn add_job<F>(&self, name: impl Into<String>, f: F)
  where
    F: FnOnce() -> anyhow::Result<bool> + Send + 'static,
  {
    self.pool.submit(Job::new(name, f));
  }

  pub fn submit(&self, job: Job) {
    self.pool.submit(job);
  }

  /// Wait for the jobs queued so far.
  ///
  /// On success the pool is restarted so the build function can queue
  /// another phase of jobs that depend on the first. On failure the build
  /// function should return so the errors get reported.
  pub fn wait(&self) -> bool {
    let success = self.finish_phase();
    if success {
      self.pool.start_round(self.pool.round());
    }
    success
  }

  /// Drain the open round, if any, into the stats
  pub(crate) fn finish_phase(&self) -> bool {
    if !self.pool.is_open() {
      return self.pool.wait();
    }

    let success = self.pool.wait();
    self.stats.lock().record_phase(&self.pool);
    success
  }

  // ==========================================================================
  // Change detection
  // ==========================================================================

  /// Whether `path` changed since it was last checked.
  ///
  /// Missing paths are unchanged. The path's directory is registered with
  /// the watcher, if there is one. A forced context still records the
  /// modification time but always reports a change.
  pub fn changed(&self, path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();

    let is_dir = match std::fs::metadata(path) {
      Ok(meta) => meta.is_dir(),
      Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Error checking file existence");
        false
      }
    };

    let path = normalize(path);

    let dir = if is_dir { path.as_path() } else { path.parent().unwrap_or(&path) };
    self.watch(dir);

    let changed = self.tracker.check_and_update(&path);
    self.forced || changed
  }

  /// Like [`Context::changed`] for several paths. Every path is checked.
  pub fn changed_any<I, P>(&self, paths: I) -> bool
  where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
  {
    paths.into_iter().fold(false, |any, path| self.changed(path) || any)
  }

  /// [`Context::changed_any`] over the paths recorded on `deps`
  pub fn changed_deps(&self, deps: &Dependencies) -> bool {
    self.changed_any(deps.paths())
  }

  /// Whether change checking is bypassed
  pub fn forced(&self) -> bool {
    self.forced
  }

  /// A copy of this context that treats everything as changed
  pub fn forced_context(&self) -> Self {
    Self {
      forced: true,
      ..self.clone()
    }
  }

  /// Start watching `dir` for changes. Errors are logged.
  pub fn watch(&self, dir: &Path) {
    let Some(watcher) = &self.watcher else {
      return;
    };
    if let Err(e) = watcher.watch(&normalize(dir)) {
      error!(path = %dir.display(), error = %e, "Error watching source");
    }
  }

  pub fn is_watching(&self) -> bool {
    self.watcher.is_some()
  }

  /// Whether `path` is written by the build itself: the target directory
  /// or the log file, including its dated siblings
  pub fn is_build_output(&self, path: &Path) -> bool {
    is_ignored_path(&normalize(path), &output_paths(&self.config))
  }

  /// Resolve `path` relative to the source directory
  pub fn source_path(&self, path: impl AsRef<Path>) -> PathBuf {
    self.source_dir().join(path)
  }

  /// Resolve `path` relative to the target directory
  pub fn target_path(&self, path: impl AsRef<Path>) -> PathBuf {
    self.target_dir().join(path)
  }
}

/// Normalized paths that builds write to and the watcher must not react to
pub(crate) fn output_paths(config: &Config) -> Vec<PathBuf> {
  let mut paths = vec![normalize(&config.build.target_dir)];
  if let Some(file) = &config.log.file {
    paths.push(normalize(file));
  }
  paths
}

#[cfg(test)]
pub(crate) mod tests {
  use filetime::FileTime;
  use tempfile::TempDir;

  use super::*;

  pub(crate) fn test_context(dir: &Path) -> Context {
    let mut config = Config::default();
    config.build.source_dir = dir.join("src");
    config.build.target_dir = dir.join("public");
    config.pool.concurrency = 2;

    let pool = Arc::new(JobPool::new(&config.pool).unwrap());
    let cache = FsCache::new(&config.cache);
    Context::new(Arc::new(config), pool, Arc::new(ChangeTracker::new()), cache, None)
  }

  #[derive(Default)]
  struct RecordingWatcher {
    paths: Mutex<Vec<PathBuf>>,
  }

  impl PathWatcher for RecordingWatcher {
    fn watch(&self, path: &Path) -> Result<(), watch::WatchError> {
      self.paths.lock().push(path.to_path_buf());
      Ok(())
    }
  }

  #[test]
  fn test_iteration_state() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    assert!(ctx.first_run());
    assert!(ctx.changes().is_empty());
    assert!(!ctx.is_watching());

    let changed = ChangeSet::from([dir.path().join("src/a.md")]);
    let next = ctx.next_iteration(false, changed.clone());
    assert!(!next.first_run());
    assert_eq!(next.changes(), &changed);
    assert_eq!(next.source_path("posts/a.md"), dir.path().join("src/posts/a.md"));
    assert_eq!(next.target_path("posts/a.html"), dir.path().join("public/posts/a.html"));
  }

  #[test]
  fn test_changed_watches_normalized_parent() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.md"), "a").unwrap();

    let watcher = Arc::new(RecordingWatcher::default());
    let ctx = Context {
      watcher: Some(watcher.clone()),
      ..test_context(dir.path())
    };
    assert!(ctx.is_watching());

    assert!(ctx.changed(dir.path().join("src/./a.md")));
    assert!(ctx.changed(dir.path().join("src")));
    assert_eq!(
      *watcher.paths.lock(),
      vec![dir.path().join("src"), dir.path().join("src")]
    );
  }

  #[test]
  fn test_build_output_paths() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(dir.path());
    assert!(ctx.is_build_output(&dir.path().join("public/index.html")));
    assert!(!ctx.is_build_output(&dir.path().join("src/index.html")));
    assert!(!ctx.is_build_output(&dir.path().join("kiln.log.2026-10-18")));

    let mut config = (*ctx.config).clone();
    config.log.file = Some(dir.path().join("kiln.log"));
    ctx.config = Arc::new(config);
    assert!(ctx.is_build_output(&dir.path().join("kiln.log.2026-10-18")));
    assert!(ctx.is_build_output(&dir.path().join("./kiln.log")));
  }

  #[test]
  fn test_changed_tracks_mod_times() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let file = dir.path().join("page.md");
    std::fs::write(&file, "hi").unwrap();

    assert!(ctx.changed(&file));
    assert!(!ctx.changed(&file));
    assert!(!ctx.changed(dir.path().join("missing.md")));

    filetime::set_file_mtime(&file, FileTime::from_unix_time(4_000_000_000, 0)).unwrap();
    assert!(ctx.changed(&file));
  }

  #[test]
  fn test_forced_context_always_changed_but_records() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let file = dir.path().join("page.md");
    std::fs::write(&file, "hi").unwrap();

    let forced = ctx.forced_context();
    assert!(forced.forced());
    assert!(!ctx.forced());
    assert!(forced.changed(&file));
    assert!(forced.changed(&file));

    // The forced check recorded the baseline for the shared tracker
    assert!(!ctx.changed(&file));
  }

  #[test]
  fn test_changed_any_checks_every_path() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let a = dir.path().join("a.md");
    let b = dir.path().join("b.md");
    std::fs::write(&a, "a").unwrap();
    std::fs::write(&b, "b").unwrap();

    assert!(ctx.changed_any([&a, &b]));
    assert_eq!(ctx.tracker().len(), 2);
    assert!(!ctx.changed_any([&a, &b]));
  }

  #[test]
  fn test_changed_deps_uses_shared_tracker() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let layout = dir.path().join("layout.html");
    std::fs::write(&layout, "<main/>").unwrap();

    let deps = Dependencies::new();
    deps.add(&layout);
    assert!(ctx.changed_deps(&deps));
    assert!(!ctx.changed_deps(&deps));
    assert!(ctx.forced_context().changed_deps(&deps));

    filetime::set_file_mtime(&layout, FileTime::from_unix_time(4_000_000_000, 0)).unwrap();
    assert!(ctx.changed_deps(&deps));
  }

  #[test]
  fn test_relative_and_absolute_paths_share_an_entry() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let file = dir.path().join("page.md");
    std::fs::write(&file, "hi").unwrap();

    assert!(ctx.changed(&file));
    let dotted = dir.path().join(".").join("page.md");
    assert!(!ctx.changed(&dotted));
  }

  #[test]
  fn test_wait_runs_phases_and_accumulates_stats() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    ctx.pool().start_round(1);

    ctx.add_job("first", || Ok(true));
    ctx.add_job("second", || Ok(false));
    assert!(ctx.wait());
    assert!(ctx.pool().is_open());

    ctx.add_job("third", || Ok(true));
    assert!(ctx.finish_phase());

    let stats = ctx.stats();
    assert_eq!(stats.jobs, 3);
    assert_eq!(stats.executed, 2);
    assert_eq!(stats.executed_jobs.len(), 2);
  }

  #[test]
  fn test_failed_phase_does_not_restart() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    ctx.pool().start_round(1);

    ctx.add_job("broken", || anyhow::bail!("no layout"));
    assert!(!ctx.wait());
    assert!(!ctx.pool().is_open());

    // Draining again doesn't double count
    assert!(!ctx.finish_phase());
    assert_eq!(ctx.stats().jobs, 1);
    assert_eq!(ctx.stats().errored, 1);
  }
}
