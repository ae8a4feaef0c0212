//! Logging helpers for round results

use std::{fmt, sync::Arc, time::Duration};

use tracing::{error, info};

use crate::job::JobRecord;

/// An error reported at the end of a round
#[derive(Debug, Clone)]
pub enum RoundError {
  /// A job failed or panicked
  Job(Arc<JobRecord>),
  /// The build function itself returned an error
  Build(Arc<anyhow::Error>),
}

impl fmt::Display for RoundError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Job(record) => match record.error() {
        Some(err) => write!(f, "{}: {err}", record.name()),
        None => write!(f, "{}: unknown error", record.name()),
      },
      Self::Build(err) => write!(f, "{err:#}"),
    }
  }
}

/// Log at most `max` errors, then a single line noting the rest were cut
pub fn log_errors_slice(errors: &[RoundError], max: usize) {
  for (i, err) in errors.iter().enumerate() {
    if i >= max {
      error!("... too many errors (limit reached)");
      break;
    }

    match err {
      RoundError::Job(record) => {
        let message = record.error().map(ToString::to_string).unwrap_or_default();
        error!(
          "Job error: {message} (job: {}, time: {:?})",
          record.name(),
          truncate(record.duration())
        );
      }
      RoundError::Build(err) => error!("Build error: {err:#}"),
    }
  }
}

/// Sort `jobs` slowest first and log the first `max`
pub fn log_slowest_slice(jobs: &mut [Arc<JobRecord>], max: usize) {
  jobs.sort_by_key(|job| std::cmp::Reverse(job.duration()));

  for job in jobs.iter().take(max) {
    info!("Slow job: {} ({:?})", job.name(), truncate(job.duration()));
  }
}

/// Durations are printed to a resolution of 100µs
fn truncate(duration: Duration) -> Duration {
  let micros = duration.as_micros() / 100 * 100;
  Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::job::{Job, JobError};

  fn finished(name: &str, millis: u64, error: Option<&str>) -> Arc<JobRecord> {
    let record = Job::new(name, || Ok(false)).record();
    record.finish(
      Duration::from_millis(millis),
      false,
      error.map(|e| JobError::failed(anyhow::anyhow!(e.to_string()))),
    );
    record
  }

  #[test]
  fn test_truncate() {
    assert_eq!(truncate(Duration::from_nanos(1_234_567)), Duration::from_micros(1_200));
    assert_eq!(truncate(Duration::from_micros(99)), Duration::ZERO);
  }

  #[test]
  fn test_slowest_sorts_descending() {
    let mut jobs = vec![finished("a", 5, None), finished("b", 50, None), finished("c", 20, None)];
    log_slowest_slice(&mut jobs, 2);
    let names: Vec<_> = jobs.iter().map(|j| j.name().to_string()).collect();
    assert_eq!(names, ["b", "c", "a"]);
  }

  #[test]
  fn test_round_error_display() {
    let job = RoundError::Job(finished("render", 1, Some("template missing")));
    assert_eq!(job.to_string(), "render: template missing");

    let build = RoundError::Build(Arc::new(anyhow::anyhow!("no source dir").context("collecting pages")));
    assert_eq!(build.to_string(), "collecting pages: no source dir");

    // Logging past the limit must not panic
    log_errors_slice(&[job, build], 1);
  }
}
