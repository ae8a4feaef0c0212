use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use kiln_core::PoolConfig;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::{
  job::{Job, JobError, JobRecord},
  report::{RoundError, log_errors_slice, log_slowest_slice},
  worker::{
    FeedDone, FeedRound, LiveGuard, RoundState, Slots, WorkerInfo, WorkerRound, new_slots, run_feeder, run_watchdog,
    run_worker, snapshot,
  },
};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
  #[error("failed to spawn {name} thread: {source}")]
  Spawn {
    name: String,
    #[source]
    source: std::io::Error,
  },
}

enum Phase {
  /// No round was ever started
  Idle,
  Open {
    round: u64,
    submit: flume::Sender<Job>,
    feed_done: flume::Receiver<FeedDone>,
  },
  /// `wait` is draining the round
  Draining { round: u64 },
  Finished { success: bool },
}

/// Round-based pool of persistent worker threads.
///
/// All methods take `&self` so the pool can be shared behind an `Arc` by the
/// build function and the jobs it spawns.
pub struct JobPool {
  concurrency: usize,
  queue_capacity: usize,
  wait_soft_timeout: Duration,
  max_messages: usize,

  phase: Mutex<Phase>,
  round: Mutex<u64>,
  state: Mutex<Arc<RoundState>>,

  worker_controls: Vec<flume::Sender<WorkerRound>>,
  feeder_control: Option<flume::Sender<FeedRound>>,
  watchdog_stop: Option<flume::Sender<()>>,
  slots: Slots,
  threads: Vec<JoinHandle<()>>,
  live: Arc<AtomicUsize>,
}

impl JobPool {
  /// Spawn the worker, feeder and watchdog threads
  pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
    let concurrency = config.concurrency();
    let slots = new_slots(concurrency);
    let live = Arc::new(AtomicUsize::new(0));
    let mut threads = Vec::with_capacity(concurrency + 2);

    let mut worker_controls = Vec::with_capacity(concurrency);
    for id in 0..concurrency {
      let (tx, rx) = flume::unbounded();
      let slots = slots.clone();
      let guard = LiveGuard::new(&live);
      threads.push(spawn(format!("pool-worker-{id}"), move || run_worker(id, rx, slots, guard))?);
      worker_controls.push(tx);
    }

    let (feeder_tx, feeder_rx) = flume::unbounded();
    let guard = LiveGuard::new(&live);
    threads.push(spawn("pool-feeder".to_string(), move || run_feeder(feeder_rx, guard))?);

    let (stop_tx, stop_rx) = flume::bounded(1);
    let watchdog_slots = slots.clone();
    let job_soft_timeout = config.job_soft_timeout();
    let guard = LiveGuard::new(&live);
    threads.push(spawn("pool-watchdog".to_string(), move || {
      run_watchdog(stop_rx, watchdog_slots, job_soft_timeout, guard)
    })?);

    debug!(concurrency, "Job pool started");

    Ok(Self {
      concurrency,
      queue_capacity: config.queue_capacity(),
      wait_soft_timeout: config.wait_soft_timeout(),
      max_messages: config.max_messages,
      phase: Mutex::new(Phase::Idle),
      round: Mutex::new(0),
      state: Mutex::new(Arc::new(RoundState::default())),
      worker_controls,
      feeder_control: Some(feeder_tx),
      watchdog_stop: Some(stop_tx),
      slots,
      threads,
      live,
    })
  }

  // ==========================================================================
  // Round lifecycle
  // ==========================================================================

  /// Open a new round, resetting all result sets.
  ///
  /// # Panics
  ///
  /// If the previous round has not been waited on.
  pub fn start_round(&self, round: u64) {
    let mut phase = self.phase.lock();
    if let Phase::Open { round: open, .. } | Phase::Draining { round: open } = &*phase {
      let open = *open;
      drop(phase);
      panic!("start_round called while round {open} is open (call wait first)");
    }

    let state = Arc::new(RoundState::default());
    let (submit_tx, submit_rx) = flume::bounded(self.queue_capacity);
    let (internal_tx, internal_rx) = flume::bounded(self.queue_capacity);
    let (done_tx, done_rx) = flume::bounded(1);

    for control in &self.worker_controls {
      let assignment = WorkerRound {
        jobs: internal_rx.clone(),
        state: state.clone(),
      };
      if control.send(assignment).is_err() {
        error!(round, "Worker exited, round runs with fewer workers");
      }
    }

    let feed = FeedRound {
      submitted: submit_rx,
      internal: internal_tx,
      state: state.clone(),
      done: done_tx,
    };
    if let Some(feeder) = &self.feeder_control
      && feeder.send(feed).is_err()
    {
      error!(round, "Feeder exited, submitted jobs will not run");
    }

    *self.state.lock() = state;
    *self.round.lock() = round;
    *phase = Phase::Open {
      round,
      submit: submit_tx,
      feed_done: done_rx,
    };

    debug!(round, "Round started");
  }

  /// Queue a job for the open round, blocking while the queue is full.
  ///
  /// # Panics
  ///
  /// If no round is open.
  pub fn submit(&self, job: Job) {
    let submit = match &*self.phase.lock() {
      Phase::Open { submit, .. } => submit.clone(),
      _ => panic!("submit called without an open round"),
    };

    if let Err(flume::SendError(job)) = submit.send(job) {
      error!(job = job.name(), "Submission queue closed, job dropped");
    }
  }

  /// Close submissions and block until every job of the round finished.
  ///
  /// Returns true when no job errored. Calling it again after the round
  /// finished returns the same result without doing anything.
  ///
  /// # Panics
  ///
  /// If no round was ever started.
  pub fn wait(&self) -> bool {
    let (round, submit, feed_done) = {
      let mut phase = self.phase.lock();
      match std::mem::replace(&mut *phase, Phase::Idle) {
        Phase::Open {
          round,
          submit,
          feed_done,
        } => {
          *phase = Phase::Draining { round };
          (round, submit, feed_done)
        }
        Phase::Finished { success } => {
          *phase = Phase::Finished { success };
          return success;
        }
        Phase::Draining { round } => {
          *phase = Phase::Draining { round };
          drop(phase);
          panic!("wait called concurrently for round {round}");
        }
        Phase::Idle => {
          drop(phase);
          panic!("wait called before any round was started");
        }
      }
    };

    // No more submissions
    drop(submit);

    let internal = match feed_done.recv() {
      Ok(FeedDone { fed, internal }) => {
        debug!(round, fed, "All submitted jobs handed to workers");
        Some(internal)
      }
      Err(_) => {
        error!(round, "Feeder exited before draining the round");
        None
      }
    };

    let state = self.state.lock().clone();
    if self.wait_soft_timeout.is_zero() || !state.wg.wait_timeout(self.wait_soft_timeout) {
      if !self.wait_soft_timeout.is_zero() {
        error!(
          round,
          pending = state.wg.pending(),
          "Round is taking a long time (waited {:?}), still waiting",
          self.wait_soft_timeout
        );
        for info in self.worker_infos() {
          error!("{info}");
        }
      }
      state.wg.wait();
    }

    // Every job completed, let the workers leave this round
    drop(internal);

    let success = state.errored.lock().is_empty();
    *self.phase.lock() = Phase::Finished { success };

    debug!(
      round,
      jobs = state.all.lock().len(),
      executed = state.executed.lock().len(),
      errored = state.errored.lock().len(),
      "Round finished"
    );

    success
  }

  // ==========================================================================
  // Results
  // ==========================================================================

  /// Every job submitted in the current round
  pub fn jobs_all(&self) -> Vec<Arc<JobRecord>> {
    self.state.lock().all.lock().clone()
  }

  /// Jobs that did work
  pub fn jobs_executed(&self) -> Vec<Arc<JobRecord>> {
    self.state.lock().executed.lock().clone()
  }

  pub fn jobs_errored(&self) -> Vec<Arc<JobRecord>> {
    self.state.lock().errored.lock().clone()
  }

  /// The errors of all errored jobs, empty if none
  pub fn job_errors(&self) -> Vec<JobError> {
    self
      .jobs_errored()
      .iter()
      .filter_map(|record| record.error().cloned())
      .collect()
  }

  pub fn round_errors(&self) -> Vec<RoundError> {
    self.jobs_errored().into_iter().map(RoundError::Job).collect()
  }

  /// Log the round's job errors, capped at `max_messages`
  pub fn log_errors(&self) {
    log_errors_slice(&self.round_errors(), self.max_messages);
  }

  /// Log the slowest executed jobs, capped at `max_messages`
  pub fn log_slowest(&self) {
    let mut executed = self.jobs_executed();
    if executed.is_empty() {
      info!("No jobs did work this round");
      return;
    }
    log_slowest_slice(&mut executed, self.max_messages);
  }

  // ==========================================================================
  // Diagnostics
  // ==========================================================================

  /// Identifier passed to the latest `start_round`
  pub fn round(&self) -> u64 {
    *self.round.lock()
  }

  pub fn concurrency(&self) -> usize {
    self.concurrency
  }

  pub fn max_messages(&self) -> usize {
    self.max_messages
  }

  /// Number of pool threads still running
  pub fn live_threads(&self) -> usize {
    self.live.load(Ordering::SeqCst)
  }

  pub fn worker_infos(&self) -> Vec<WorkerInfo> {
    snapshot(&self.slots)
  }

  pub fn is_open(&self) -> bool {
    matches!(*self.phase.lock(), Phase::Open { .. })
  }
}

impl Drop for JobPool {
  fn drop(&mut self) {
    if self.is_open() {
      self.wait();
    }

    self.worker_controls.clear();
    self.feeder_control.take();
    self.watchdog_stop.take();

    for handle in self.threads.drain(..) {
      let name = handle.thread().name().unwrap_or("pool").to_string();
      if handle.join().is_err() {
        error!(thread = %name, "Pool thread panicked");
      }
    }

    debug!("Job pool stopped");
  }
}

fn spawn<F>(name: String, f: F) -> Result<JoinHandle<()>, PoolError>
where
  F: FnOnce() + Send + 'static,
{
  thread::Builder::new()
    .name(name.clone())
    .spawn(f)
    .map_err(|source| PoolError::Spawn { name, source })
}
