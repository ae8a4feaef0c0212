use std::{sync::Arc, time::Instant};

use pool::{JobPool, JobRecord};

/// Build statistics.
///
/// Reset at the start of every build loop iteration and accumulated across
/// the phases (`Context::wait` calls) within one.
#[derive(Debug, Clone)]
pub struct Stats {
  /// Jobs submitted
  pub jobs: usize,
  /// Jobs that did work
  pub executed: usize,
  pub errored: usize,
  pub executed_jobs: Vec<Arc<JobRecord>>,
  pub started_at: Instant,
}

impl Default for Stats {
  fn default() -> Self {
    Self {
      jobs: 0,
      executed: 0,
      errored: 0,
      executed_jobs: Vec::new(),
      started_at: Instant::now(),
    }
  }
}

impl Stats {
  pub fn reset(&mut self) {
    *self = Self::default();
  }

  /// Fold in the results of a phase that just finished
  pub(crate) fn record_phase(&mut self, pool: &JobPool) {
    let executed = pool.jobs_executed();
    self.jobs += pool.jobs_all().len();
    self.executed += executed.len();
    self.errored += pool.jobs_errored().len();
    self.executed_jobs.extend(executed);
  }
}
