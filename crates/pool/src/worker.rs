//! Worker threads, the feeder and the watchdog

use std::{
  fmt,
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::{
  job::{Job, JobError, JobRecord},
  wait_group::WaitGroup,
};

// ============================================================================
// Worker diagnostics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
  /// Idle, waiting for the next job or round
  #[default]
  Waiting,
  Executing,
  /// The current round's queue is closed
  Finished,
  /// The pool shut down
  Stopped,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Waiting => "waiting",
      Self::Executing => "executing",
      Self::Finished => "finished",
      Self::Stopped => "stopped",
    };
    f.write_str(s)
  }
}

/// Snapshot of what a worker is doing. Counters cover the current round.
#[derive(Debug, Clone, Default)]
pub struct WorkerInfo {
  pub id: usize,
  pub state: WorkerState,
  pub job: Option<String>,
  pub started_at: Option<Instant>,
  pub finished: usize,
  pub executed: usize,
  pub errored: usize,
  pub panicked: usize,
  warned: bool,
}

impl WorkerInfo {
  fn new(id: usize) -> Self {
    Self { id, ..Default::default() }
  }

  fn reset_for_round(&mut self) {
    *self = Self::new(self.id);
  }

  /// How long the active job has been running
  pub fn running_for(&self) -> Option<Duration> {
    self.started_at.map(|t| t.elapsed())
  }

  /// Whether the active job ran past the job soft timeout and was reported
  pub fn is_slow(&self) -> bool {
    self.warned
  }
}

impl fmt::Display for WorkerInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "worker {} {} (finished: {}, executed: {}, errored: {}, panicked: {})",
      self.id, self.state, self.finished, self.executed, self.errored, self.panicked
    )?;
    if let (Some(job), Some(elapsed)) = (&self.job, self.running_for()) {
      write!(f, " running {job} for {elapsed:?}")?;
    }
    Ok(())
  }
}

pub(crate) type Slots = Arc<[Mutex<WorkerInfo>]>;

pub(crate) fn new_slots(n: usize) -> Slots {
  (0..n).map(|id| Mutex::new(WorkerInfo::new(id))).collect()
}

pub(crate) fn snapshot(slots: &Slots) -> Vec<WorkerInfo> {
  slots.iter().map(|slot| slot.lock().clone()).collect()
}

// ============================================================================
// Round state
// ============================================================================

/// Results of one round, shared by the feeder, the workers and the pool
#[derive(Debug, Default)]
pub(crate) struct RoundState {
  pub all: Mutex<Vec<Arc<JobRecord>>>,
  pub executed: Mutex<Vec<Arc<JobRecord>>>,
  pub errored: Mutex<Vec<Arc<JobRecord>>>,
  pub wg: WaitGroup,
}

/// Sent to each worker when a round starts
pub(crate) struct WorkerRound {
  pub jobs: flume::Receiver<Job>,
  pub state: Arc<RoundState>,
}

/// Sent to the feeder when a round starts
pub(crate) struct FeedRound {
  pub submitted: flume::Receiver<Job>,
  pub internal: flume::Sender<Job>,
  pub state: Arc<RoundState>,
  pub done: flume::Sender<FeedDone>,
}

/// Handed back by the feeder once the public queue closed
pub(crate) struct FeedDone {
  pub fed: usize,
  /// Kept open until every job completed
  pub internal: flume::Sender<Job>,
}

/// Counts a thread as live until it exits
pub(crate) struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
  pub fn new(live: &Arc<AtomicUsize>) -> Self {
    live.fetch_add(1, Ordering::SeqCst);
    Self(live.clone())
  }
}

impl Drop for LiveGuard {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

// ============================================================================
// Threads
// ============================================================================

pub(crate) fn run_worker(id: usize, control: flume::Receiver<WorkerRound>, slots: Slots, _live: LiveGuard) {
  trace!(worker = id, "Worker started");

  while let Ok(round) = control.recv() {
    slots[id].lock().reset_for_round();

    while let Ok(job) = round.jobs.recv() {
      work_job(id, job, &round.state, &slots);
    }

    slots[id].lock().state = WorkerState::Finished;
  }

  slots[id].lock().state = WorkerState::Stopped;
  trace!(worker = id, "Worker stopped");
}

/// Run a single job and record its outcome.
///
/// Every path through here ends in exactly one `wg.done()`.
fn work_job(id: usize, job: Job, state: &RoundState, slots: &Slots) {
  let (record, work) = job.into_parts();

  {
    let mut slot = slots[id].lock();
    slot.state = WorkerState::Executing;
    slot.job = Some(record.name().to_string());
    slot.started_at = Some(Instant::now());
    slot.warned = false;
  }

  let start = Instant::now();
  let (executed, error, panicked) = match panic::catch_unwind(AssertUnwindSafe(work)) {
    Ok(outcome) => (outcome.executed, outcome.error.map(JobError::failed), false),
    Err(payload) => {
      let err = JobError::from_panic(payload);
      error!(worker = id, job = %record.name(), error = %err, "Job panicked");
      (false, Some(err), true)
    }
  };
  let duration = start.elapsed();

  let errored = error.is_some();
  record.finish(duration, executed, error);

  if executed {
    state.executed.lock().push(record.clone());
  }
  if errored {
    state.errored.lock().push(record.clone());
  }

  {
    let mut slot = slots[id].lock();
    slot.state = WorkerState::Waiting;
    slot.job = None;
    slot.started_at = None;
    slot.finished += 1;
    slot.executed += usize::from(executed);
    slot.errored += usize::from(errored);
    slot.panicked += usize::from(panicked);
  }

  trace!(worker = id, job = %record.name(), ?duration, executed, errored, "Job finished");
  state.wg.done();
}

/// Move jobs from the public queue into the internal queue, one round at a time
pub(crate) fn run_feeder(control: flume::Receiver<FeedRound>, _live: LiveGuard) {
  while let Ok(round) = control.recv() {
    let mut fed = 0;

    while let Ok(job) = round.submitted.recv() {
      round.state.wg.add(1);
      round.state.all.lock().push(job.record());

      if let Err(flume::SendError(job)) = round.internal.send(job) {
        let (record, _) = job.into_parts();
        error!(job = %record.name(), "Worker queue closed, job not run");
        record.finish(
          Duration::ZERO,
          false,
          Some(JobError::failed(anyhow::anyhow!("worker queue closed"))),
        );
        round.state.errored.lock().push(record);
        round.state.wg.done();
      }
      fed += 1;
    }

    debug!(fed, "Feeder drained the round");
    let done = FeedDone {
      fed,
      internal: round.internal,
    };
    if round.done.send(done).is_err() {
      warn!("Round was abandoned before the feeder finished");
    }
  }
}

/// Warn once for every job running longer than `timeout`
pub(crate) fn run_watchdog(stop: flume::Receiver<()>, slots: Slots, timeout: Duration, _live: LiveGuard) {
  let tick = (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));

  loop {
    match stop.recv_timeout(tick) {
      Err(flume::RecvTimeoutError::Timeout) => {}
      Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => break,
    }

    if timeout.is_zero() {
      continue;
    }

    for slot in slots.iter() {
      let mut info = slot.lock();
      if info.state != WorkerState::Executing || info.warned {
        continue;
      }
      if let Some(elapsed) = info.running_for()
        && elapsed > timeout
      {
        info.warned = true;
        warn!(
          worker = info.id,
          job = info.job.as_deref().unwrap_or_default(),
          ?elapsed,
          "Job is taking a long time (still running)"
        );
      }
    }
  }
}
