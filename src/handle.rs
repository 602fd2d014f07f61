use crate::error::PoolError;
use crate::task::TaskId;

use std::fmt;
use std::sync::Weak;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Routes a cancellation request from a handle back to the pool that owns the task.
pub(crate) trait CancelRoute: Send + Sync {
  fn cancel_task(&self, task_id: TaskId) -> bool;
}

/// A handle to a task submitted to a `PoolManager`.
///
/// Resolves exactly once: with the task's result, or with one of
/// `TaskCancelled`, `TaskFailed`, `PoolTerminated`. The handle holds only a
/// weak reference to its pool, so keeping it around never keeps the pool alive.
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: TaskId,
  pub(crate) task_type: String,
  pub(crate) cancel_signal: Option<CancellationToken>,
  pub(crate) result_receiver: Option<oneshot::Receiver<Result<R, PoolError>>>,
  pub(crate) route: Weak<dyn CancelRoute>,
}

impl<R: Send + 'static> fmt::Debug for TaskHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("task_id", &self.task_id)
      .field("task_type", &self.task_type)
      .field("cancelable", &self.cancel_signal.is_some())
      .field("result_taken", &self.result_receiver.is_none())
      .finish_non_exhaustive()
  }
}

impl<R: Send + 'static> TaskHandle<R> {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> TaskId {
    self.task_id
  }

  pub fn task_type(&self) -> &str {
    &self.task_type
  }

  /// Returns `true` if the task was submitted as cancelable.
  pub fn is_cancelable(&self) -> bool {
    self.cancel_signal.is_some()
  }

  /// Checks if cancellation has been requested for this task.
  pub fn is_cancellation_requested(&self) -> bool {
    self
      .cancel_signal
      .as_ref()
      .map_or(false, |token| token.is_cancelled())
  }

  /// Requests cancellation of this task. Same semantics as `PoolManager::cancel`:
  /// a pending task is removed and resolved immediately, an in-flight cancelable
  /// task gets its signal raised and must stop on its own.
  ///
  /// Returns `false` if the request had no effect (already terminal, already
  /// requested, not cancelable, or the pool is gone).
  pub fn cancel(&self) -> bool {
    tracing::debug!(task_id = %self.task_id, "TaskHandle: Cancellation requested.");
    match self.route.upgrade() {
      Some(route) => route.cancel_task(self.task_id),
      None => false,
    }
  }

  /// Awaits the completion of the task and returns its result of type `R`.
  ///
  /// # Errors
  /// Returns `PoolError::TaskCancelled` if the task was cancelled.
  /// Returns `PoolError::TaskFailed` if the computation failed or panicked.
  /// Returns `PoolError::PoolTerminated` if the pool was torn down first.
  /// Returns `PoolError::ResultChannelError` if the result channel was dropped without a value.
  /// Returns `PoolError::ResultUnavailable` if `await_result` has already been called.
  pub async fn await_result(mut self) -> Result<R, PoolError> {
    match self.result_receiver.take() {
      Some(rx) => match rx.await {
        Ok(task_outcome_result) => task_outcome_result,
        Err(recv_error) => {
          tracing::warn!(task_id = %self.task_id, "Result channel receive error: {}", recv_error);
          Err(PoolError::ResultChannelError(format!(
            "Task (id: {}) result channel unexpectedly closed: {}",
            self.task_id, recv_error
          )))
        }
      },
      None => Err(PoolError::ResultUnavailable),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;
  use std::sync::Arc;

  struct RecordingRoute {
    requested: Mutex<Vec<TaskId>>,
  }

  impl CancelRoute for RecordingRoute {
    fn cancel_task(&self, task_id: TaskId) -> bool {
      self.requested.lock().push(task_id);
      true
    }
  }

  fn handle_with(route: Weak<dyn CancelRoute>) -> (TaskHandle<u32>, oneshot::Sender<Result<u32, PoolError>>) {
    let (tx, rx) = oneshot::channel();
    let handle = TaskHandle {
      task_id: TaskId::next(),
      task_type: "unit".to_string(),
      cancel_signal: Some(CancellationToken::new()),
      result_receiver: Some(rx),
      route,
    };
    (handle, tx)
  }

  #[tokio::test]
  async fn test_await_result_returns_sent_value() {
    let route: Arc<dyn CancelRoute> = Arc::new(RecordingRoute { requested: Mutex::new(Vec::new()) });
    let (handle, tx) = handle_with(Arc::downgrade(&route));
    tx.send(Ok(5)).unwrap();
    assert_eq!(handle.await_result().await, Ok(5));
  }

  #[tokio::test]
  async fn test_dropped_sender_is_channel_error() {
    let route: Arc<dyn CancelRoute> = Arc::new(RecordingRoute { requested: Mutex::new(Vec::new()) });
    let (handle, tx) = handle_with(Arc::downgrade(&route));
    drop(tx);
    assert!(matches!(handle.await_result().await, Err(PoolError::ResultChannelError(_))));
  }

  #[test]
  fn test_cancel_routes_to_pool() {
    let recording = Arc::new(RecordingRoute { requested: Mutex::new(Vec::new()) });
    let route: Arc<dyn CancelRoute> = recording.clone();
    let (handle, _tx) = handle_with(Arc::downgrade(&route));
    assert!(handle.cancel());
    assert_eq!(*recording.requested.lock(), vec![handle.id()]);
  }

  #[test]
  fn test_cancel_after_pool_dropped_is_noop() {
    let route: Arc<dyn CancelRoute> = Arc::new(RecordingRoute { requested: Mutex::new(Vec::new()) });
    let (handle, _tx) = handle_with(Arc::downgrade(&route));
    drop(route);
    assert!(!handle.cancel());
  }
}
