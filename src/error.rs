use thiserror::Error;

/// Errors a caller can observe from the `parallel_pool`.
///
/// Every terminal outcome other than success is one of these variants, so
/// callers can branch on the kind of failure without inspecting messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  /// The pool has been terminated (or is draining) and refused the submission.
  #[error("Pool is terminated or shutting down, task submission rejected")]
  TaskRejected,

  #[error("Task was cancelled")]
  TaskCancelled,

  /// The computation returned a failure or panicked. The reason is opaque to the pool.
  #[error("Task failed: {0}")]
  TaskFailed(String),

  /// The pool was torn down while the task was pending or in-flight.
  /// This is an expected outcome of `terminate()`, not a bug in the task.
  #[error("Pool was terminated before the task could complete")]
  PoolTerminated,

  #[error("Invalid pool configuration: {0}")]
  InvalidConfig(String),

  #[error("Task result channel error (sender dropped without a value): {0}")]
  ResultChannelError(String),

  #[error("Task result already taken or channel was not available")]
  ResultUnavailable,
}

/// The failure a computation reports back to the pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct TaskFailure {
  reason: String,
}

impl TaskFailure {
  pub fn new(reason: impl Into<String>) -> Self {
    Self { reason: reason.into() }
  }

  pub fn reason(&self) -> &str {
    &self.reason
  }
}

impl From<String> for TaskFailure {
  fn from(reason: String) -> Self {
    Self { reason }
  }
}

impl From<&str> for TaskFailure {
  fn from(reason: &str) -> Self {
    Self::new(reason)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_pool_error_display() {
    assert_eq!(
      PoolError::TaskFailed("bad input".to_string()).to_string(),
      "Task failed: bad input"
    );
    assert_eq!(PoolError::TaskCancelled.to_string(), "Task was cancelled");
  }

  #[test]
  fn test_task_failure_conversions() {
    let from_str: TaskFailure = "parse error".into();
    let from_string: TaskFailure = String::from("parse error").into();
    assert_eq!(from_str, from_string);
    assert_eq!(from_str.reason(), "parse error");
    assert_eq!(from_str.to_string(), "parse error");
  }
}
