//! The build loop
//!
//! Every iteration opens a pool round, runs the build function on a blocking
//! thread, drains the round and reports. In loop mode it then acknowledges
//! the change set it was woken for and sleeps until the debouncer sends the
//! next one.

use std::{
  panic::{self, AssertUnwindSafe},
  sync::Arc,
  time::Duration,
};

use kiln_core::{ChangeTracker, Config};
use pool::{JobError, JobPool, PoolError, RoundError, log_errors_slice, log_slowest_slice};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use watch::{ChangeSet, Debouncer, NotifySource, PathWatcher, RebuildHandle, WatchError};

use crate::{
  cache::FsCache,
  context::{Context, output_paths},
  fs::{ensure_dir, normalize},
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
  #[error("failed to start job pool: {0}")]
  Pool(#[from] PoolError),

  #[error(transparent)]
  Watcher(#[from] WatchError),

  #[error("build task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  #[error("build failed with {} error(s)", errors.len())]
  Failed { errors: Vec<RoundError> },
}

/// Outcome of one build loop iteration
#[derive(Debug, Clone)]
pub struct RoundSummary {
  pub round: u64,
  pub first_run: bool,
  /// Paths that triggered this iteration
  pub changes: ChangeSet,
  pub jobs: usize,
  pub executed: usize,
  pub errors: Vec<RoundError>,
  pub duration: Duration,
}

impl RoundSummary {
  pub fn success(&self) -> bool {
    self.errors.is_empty()
  }
}

pub struct Engine {
  config: Arc<Config>,
  pool: Arc<JobPool>,
  tracker: Arc<ChangeTracker>,
  cache: FsCache,
  watcher: Option<Arc<dyn PathWatcher>>,
  summaries: tokio::sync::watch::Sender<Option<RoundSummary>>,
  round: u64,
  log_slowest: bool,
}

impl Engine {
  pub fn new(config: Config) -> Result<Self, BuildError> {
    let pool = JobPool::new(&config.pool)?;
    let cache = FsCache::new(&config.cache);
    let (summaries, _) = tokio::sync::watch::channel(None);

    Ok(Self {
      config: Arc::new(config),
      pool: Arc::new(pool),
      tracker: Arc::new(ChangeTracker::new()),
      cache,
      watcher: None,
      summaries,
      round: 0,
      log_slowest: false,
    })
  }

  /// Log the slowest jobs after every iteration
  pub fn with_log_slowest(mut self, enabled: bool) -> Self {
    self.log_slowest = enabled;
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Observe finished iterations (e.g. to trigger a browser reload)
  pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Option<RoundSummary>> {
    self.summaries.subscribe()
  }

  /// Build once. Fails if any job or the build function reported an error.
  pub async fn build<F>(&mut self, f: F) -> Result<RoundSummary, BuildError>
  where
    F: Fn(&Context) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    let summary = self.run_iteration(Arc::new(f), true, ChangeSet::new()).await?;
    if summary.success() {
      Ok(summary)
    } else {
      Err(BuildError::Failed { errors: summary.errors })
    }
  }

  /// Build, then rebuild whenever a watched source changes.
  ///
  /// Runs until `cancel` fires, ctrl-c is pressed or the watcher stops.
  pub async fn build_loop<F>(&mut self, f: F, cancel: CancellationToken) -> Result<(), BuildError>
  where
    F: Fn(&Context) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    let (source, streams) = NotifySource::new(&self.config.watch)?;
    source.watch(&normalize(&self.config.build.source_dir))?;
    let source: Arc<dyn PathWatcher> = Arc::new(source);

    let (debouncer, rebuild) = Debouncer::new(&self.config.watch, streams.events, streams.errors, cancel.clone());
    let debouncer = debouncer.with_ignored_paths(output_paths(&self.config)).spawn();

    let result = self.build_loop_with(f, rebuild, Some(source), cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = debouncer.await {
      debug!(error = %e, "Debouncer task ended abnormally");
    }
    result
  }

  /// [`Engine::build_loop`] driven by an existing rebuild handle
  pub async fn build_loop_with<F>(
    &mut self,
    f: F,
    mut rebuild: RebuildHandle,
    watcher: Option<Arc<dyn PathWatcher>>,
    cancel: CancellationToken,
  ) -> Result<(), BuildError>
  where
    F: Fn(&Context) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    self.watcher = watcher;
    let f = Arc::new(f);
    let mut first_run = true;
    let mut changes = ChangeSet::new();

    loop {
      self.run_iteration(f.clone(), first_run, changes).await?;

      if !first_run && rebuild.done.send(()).await.is_err() {
        info!("Watcher stopped; leaving build loop");
        break;
      }
      first_run = false;

      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Build loop cancelled");
          break;
        }

        _ = tokio::signal::ctrl_c() => {
          info!("Interrupted; leaving build loop");
          break;
        }

        next = rebuild.changes.recv() => match next {
          Some(next) => {
            info!(paths = ?next, "Detected change; rebuilding");
            for path in &next {
              self.cache.invalidate(path);
            }
            changes = next;
          }
          None => {
            info!("Watcher stopped; leaving build loop");
            break;
          }
        },
      }
    }

    Ok(())
  }

  async fn run_iteration<F>(&mut self, f: Arc<F>, first_run: bool, changes: ChangeSet) -> Result<RoundSummary, BuildError>
  where
    F: Fn(&Context) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    self.round += 1;
    let round = self.round;
    debug!(round, "Start loop");

    let base = Context::new(
      self.config.clone(),
      self.pool.clone(),
      self.tracker.clone(),
      self.cache.clone(),
      self.watcher.clone(),
    );
    let ctx = base.next_iteration(first_run, changes.clone());

    let (ctx, build_result) = tokio::task::spawn_blocking(move || {
      ctx.pool().start_round(round);
      let result = ensure_dir(&ctx, ctx.target_dir()).and_then(|()| run_build_fn(f.as_ref(), &ctx));
      ctx.finish_phase();
      (ctx, result)
    })
    .await?;

    let mut errors = Vec::new();
    if let Err(e) = build_result {
      errors.push(RoundError::Build(Arc::new(e)));
    }
    errors.extend(self.pool.round_errors());
    log_errors_slice(&errors, self.config.pool.max_messages);

    let stats = ctx.stats();
    let duration = stats.started_at.elapsed();
    info!("Built site in {:?} ({} / {} job(s) did work)", duration, stats.executed, stats.jobs);

    if self.log_slowest {
      let mut executed = stats.executed_jobs.clone();
      log_slowest_slice(&mut executed, self.config.pool.max_messages);
    }

    let summary = RoundSummary {
      round,
      first_run,
      changes,
      jobs: stats.jobs,
      executed: stats.executed,
      errors,
      duration,
    };
    self.summaries.send_replace(Some(summary.clone()));

    Ok(summary)
  }
}

/// Run the build function, turning a panic into an error
fn run_build_fn<F>(f: &F, ctx: &Context) -> anyhow::Result<()>
where
  F: Fn(&Context) -> anyhow::Result<()>,
{
  match panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
    Ok(result) => result,
    Err(payload) => match JobError::from_panic(payload) {
      JobError::Panicked { message } => Err(anyhow::anyhow!("build function panicked: {message}")),
      other => Err(anyhow::Error::new(other)),
    },
  }
}
