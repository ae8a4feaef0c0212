use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Counting completion barrier.
///
/// The feeder adds one per job before handing it to a worker and the worker
/// calls `done` once per job on every exit path.
#[derive(Debug, Default)]
pub(crate) struct WaitGroup {
  count: Mutex<usize>,
  zero: Condvar,
}

impl WaitGroup {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&self, n: usize) {
    *self.count.lock() += n;
  }

  pub fn done(&self) {
    let mut count = self.count.lock();
    match count.checked_sub(1) {
      Some(remaining) => {
        *count = remaining;
        if remaining == 0 {
          self.zero.notify_all();
        }
      }
      // A second done for one job would otherwise release wait early
      None => tracing::error!("WaitGroup::done called more times than add"),
    }
  }

  pub fn pending(&self) -> usize {
    *self.count.lock()
  }

  pub fn wait(&self) {
    let mut count = self.count.lock();
    while *count > 0 {
      self.zero.wait(&mut count);
    }
  }

  /// Wait up to `timeout`, returning true if the count reached zero
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    let mut count = self.count.lock();
    let deadline = std::time::Instant::now() + timeout;
    while *count > 0 {
      if self.zero.wait_until(&mut count, deadline).timed_out() {
        return *count == 0;
      }
    }
    true
  }
}
