//! Jobs, their recorded outcomes and job errors

use std::{
  any::Any,
  fmt,
  sync::{Arc, OnceLock},
  time::Duration,
};

use tracing::error;

/// Boxed work function run by a worker
pub type JobFn = Box<dyn FnOnce() -> Outcome + Send + 'static>;

// ============================================================================
// Outcome
// ============================================================================

/// What a work function reports back.
///
/// `executed` means the job did real work rather than deciding nothing had
/// changed. A job may do some work and still fail, in which case both fields
/// are set.
#[derive(Debug, Default)]
pub struct Outcome {
  pub executed: bool,
  pub error: Option<anyhow::Error>,
}

impl Outcome {
  /// Nothing needed doing
  pub fn skipped() -> Self {
    Self::default()
  }

  pub fn executed() -> Self {
    Self {
      executed: true,
      error: None,
    }
  }

  pub fn failed(executed: bool, error: impl Into<anyhow::Error>) -> Self {
    Self {
      executed,
      error: Some(error.into()),
    }
  }
}

impl From<anyhow::Result<bool>> for Outcome {
  fn from(result: anyhow::Result<bool>) -> Self {
    match result {
      Ok(executed) => Self { executed, error: None },
      Err(error) => Self {
        executed: false,
        error: Some(error),
      },
    }
  }
}

// ============================================================================
// Errors
// ============================================================================

/// Error recorded against a job
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
  /// The work function returned an error
  #[error("{0:#}")]
  Failed(Arc<anyhow::Error>),

  /// The work function panicked
  #[error("job panicked: {message}")]
  Panicked { message: String },
}

impl JobError {
  pub fn failed(error: anyhow::Error) -> Self {
    Self::Failed(Arc::new(error))
  }

  /// Convert a panic payload into an error.
  ///
  /// Error values are rendered through `Display`, string payloads as-is.
  pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = match payload.downcast::<anyhow::Error>() {
      Ok(err) => format!("{err:#}"),
      Err(payload) => match payload.downcast::<Box<dyn std::error::Error + Send + Sync>>() {
        Ok(err) => err.to_string(),
        Err(payload) => match payload.downcast::<std::io::Error>() {
          Ok(err) => err.to_string(),
          Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_string(),
            Err(payload) => match payload.downcast::<String>() {
              Ok(s) => *s,
              Err(_) => "unknown panic payload".to_string(),
            },
          },
        },
      },
    };

    Self::Panicked { message }
  }

  pub fn is_panic(&self) -> bool {
    matches!(self, Self::Panicked { .. })
  }
}

// ============================================================================
// Job
// ============================================================================

/// A named unit of work waiting to be submitted to a pool
pub struct Job {
  record: Arc<JobRecord>,
  work: JobFn,
}

impl Job {
  /// Create a job from a function returning whether it did work
  pub fn new<F>(name: impl Into<String>, f: F) -> Self
  where
    F: FnOnce() -> anyhow::Result<bool> + Send + 'static,
  {
    Self::with_outcome(name, move || Outcome::from(f()))
  }

  /// Create a job that reports a full [`Outcome`] (partial work plus an error)
  pub fn with_outcome<F>(name: impl Into<String>, f: F) -> Self
  where
    F: FnOnce() -> Outcome + Send + 'static,
  {
    Self {
      record: Arc::new(JobRecord::new(name.into())),
      work: Box::new(f),
    }
  }

  pub fn name(&self) -> &str {
    self.record.name()
  }

  /// Handle that will carry this job's outcome once a worker finished it
  pub fn record(&self) -> Arc<JobRecord> {
    self.record.clone()
  }

  pub(crate) fn into_parts(self) -> (Arc<JobRecord>, JobFn) {
    (self.record, self.work)
  }
}

impl fmt::Debug for Job {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Job").field("name", &self.record.name()).finish_non_exhaustive()
  }
}

// ============================================================================
// JobRecord
// ============================================================================

#[derive(Debug)]
struct Finished {
  duration: Duration,
  executed: bool,
  error: Option<JobError>,
}

/// The outcome of a submitted job.
///
/// Written exactly once by the worker that ran the job, read-only after.
/// Accessors return defaults until then.
#[derive(Debug)]
pub struct JobRecord {
  name: String,
  finished: OnceLock<Finished>,
}

impl JobRecord {
  fn new(name: String) -> Self {
    Self {
      name,
      finished: OnceLock::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_finished(&self) -> bool {
    self.finished.get().is_some()
  }

  /// Time the work function ran for, set regardless of outcome
  pub fn duration(&self) -> Duration {
    self.finished.get().map(|f| f.duration).unwrap_or_default()
  }

  /// Whether the job did work. Always false for a panicked job.
  pub fn executed(&self) -> bool {
    self.finished.get().is_some_and(|f| f.executed)
  }

  pub fn error(&self) -> Option<&JobError> {
    self.finished.get().and_then(|f| f.error.as_ref())
  }

  pub(crate) fn finish(&self, duration: Duration, executed: bool, error: Option<JobError>) {
    let finished = Finished {
      duration,
      executed,
      error,
    };

    if self.finished.set(finished).is_err() {
      error!(job = %self.name, "Job outcome recorded twice, keeping the first");
    }
  }
}
