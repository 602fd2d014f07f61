use crate::error::PoolError;
use crate::task::TaskId;
use crate::unit::UnitId;

use std::fmt;
use std::sync::{Arc, Once};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, info_span, trace, Instrument};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletionStatus {
  Success,
  Failed,
  Cancelled,
  PoolTerminated,
}

impl<R> From<&Result<R, PoolError>> for TaskCompletionStatus {
  fn from(result: &Result<R, PoolError>) -> Self {
    match result {
      Ok(_) => TaskCompletionStatus::Success,
      Err(PoolError::TaskCancelled) => TaskCompletionStatus::Cancelled,
      Err(PoolError::PoolTerminated) => TaskCompletionStatus::PoolTerminated,
      Err(_) => TaskCompletionStatus::Failed,
    }
  }
}

#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub task_id: TaskId,
  pub pool_name: Arc<String>,
  pub task_type: String,
  /// The unit that ran the task, `None` if it never left the pending queue.
  pub unit_id: Option<UnitId>,
  pub status: TaskCompletionStatus,
  pub completion_time: SystemTime,
}

// --- Internal Message (crate-public) ---
#[derive(Debug)]
pub(crate) struct InternalCompletionMessage {
  pub(crate) task_id: TaskId,
  pub(crate) task_type: String,
  pub(crate) unit_id: Option<UnitId>,
  pub(crate) status: TaskCompletionStatus,
}

type CompletionHandler = Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>;

struct NotifierInternalState {
  internal_rx_for_init: Option<UnboundedReceiver<InternalCompletionMessage>>,
  tokio_handle: TokioHandle,
}

/// Fans completion events out to registered handlers.
///
/// The worker task is only spawned when the first handler is added. Events
/// raised before that are dropped.
pub(crate) struct CompletionNotifier {
  pool_name: Arc<String>,
  sender: UnboundedSender<InternalCompletionMessage>,
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  init_once: Once,
  internal_state_for_init: Mutex<NotifierInternalState>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionNotifier")
      .field("pool_name", &self.pool_name)
      .field("handler_count", &self.handlers.read().len())
      .field("initialized", &self.init_once.is_completed())
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(tokio_handle: TokioHandle, pool_name: Arc<String>) -> Self {
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    Self {
      pool_name,
      sender,
      handlers: Arc::new(RwLock::new(Vec::new())),
      init_once: Once::new(),
      internal_state_for_init: Mutex::new(NotifierInternalState {
        internal_rx_for_init: Some(receiver),
        tokio_handle,
      }),
    }
  }

  /// Queues a completion event. Never blocks.
  pub(crate) fn notify(&self, message: InternalCompletionMessage) {
    if !self.init_once.is_completed() {
      // No handler yet; nothing will ever read these.
      return;
    }
    if self.sender.send(message).is_err() {
      trace!(pool_name = %*self.pool_name, "Notification worker gone, dropping completion event.");
    }
  }

  fn ensure_worker_initialized(&self) {
    self.init_once.call_once(|| {
      let mut state_guard = self.internal_state_for_init.lock();
      if let Some(rx_to_use) = state_guard.internal_rx_for_init.take() {
        info!(pool_name = %*self.pool_name, "First completion handler added. Initializing notification worker.");

        // Detached: the worker stops once the pool drops its sender.
        state_guard.tokio_handle.spawn(
          Self::run_notification_worker_loop(
            rx_to_use,
            self.handlers.clone(),
            state_guard.tokio_handle.clone(),
            self.pool_name.clone(),
          )
          .instrument(info_span!("notification_worker_loop", pool_name = %*self.pool_name)),
        );
      }
    });
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Arc::new(handler));
    info!(pool_name = %*self.pool_name, "Notifier: Added new completion handler. Total handlers: {}", handlers_guard.len());
    drop(handlers_guard);

    self.ensure_worker_initialized();
  }

  async fn run_notification_worker_loop(
    mut queue_rx: UnboundedReceiver<InternalCompletionMessage>,
    handlers_list_arc: Arc<RwLock<Vec<CompletionHandler>>>,
    tokio_handle_for_spawning_handlers: TokioHandle,
    pool_name: Arc<String>,
  ) {
    info!("Notification worker started. Will process messages until its input queue is closed.");

    while let Some(internal_msg_payload) = queue_rx.recv().await {
      let handlers_guard = handlers_list_arc.read();
      if handlers_guard.is_empty() {
        trace!(task_id = %internal_msg_payload.task_id, "No completion handlers registered, dropping notification.");
        continue;
      }

      let public_info = TaskCompletionInfo {
        task_id: internal_msg_payload.task_id,
        pool_name: pool_name.clone(),
        task_type: internal_msg_payload.task_type,
        unit_id: internal_msg_payload.unit_id,
        status: internal_msg_payload.status,
        completion_time: SystemTime::now(),
      };

      debug!(task_id = %public_info.task_id, "Dispatching notification to {} handlers.", handlers_guard.len());

      for handler_arc in handlers_guard.iter() {
        let current_handler_clone = handler_arc.clone();
        let info_clone_for_handler = public_info.clone();

        tokio_handle_for_spawning_handlers.spawn(async move {
          let task_id = info_clone_for_handler.task_id;
          let pool_name = info_clone_for_handler.pool_name.clone();
          let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            current_handler_clone(info_clone_for_handler);
          }));
          if result.is_err() {
            error!("A completion handler panicked during execution. Pool: {}, Task ID: {}", pool_name, task_id);
          }
        });
      }
    }

    info!("Notification worker stopped (input queue closed and processed).");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_status_from_result() {
    let ok: Result<u8, PoolError> = Ok(1);
    assert_eq!(TaskCompletionStatus::from(&ok), TaskCompletionStatus::Success);
    let cancelled: Result<u8, PoolError> = Err(PoolError::TaskCancelled);
    assert_eq!(TaskCompletionStatus::from(&cancelled), TaskCompletionStatus::Cancelled);
    let terminated: Result<u8, PoolError> = Err(PoolError::PoolTerminated);
    assert_eq!(TaskCompletionStatus::from(&terminated), TaskCompletionStatus::PoolTerminated);
    let failed: Result<u8, PoolError> = Err(PoolError::TaskFailed("boom".to_string()));
    assert_eq!(TaskCompletionStatus::from(&failed), TaskCompletionStatus::Failed);
  }

  #[tokio::test]
  async fn test_handler_receives_notifications_after_registration() {
    let notifier = CompletionNotifier::new(TokioHandle::current(), Arc::new("notifier_unit".to_string()));
    let seen = Arc::new(Mutex::new(Vec::new()));

    // Dropped: no handler registered yet.
    notifier.notify(InternalCompletionMessage {
      task_id: TaskId::next(),
      task_type: "early".to_string(),
      unit_id: None,
      status: TaskCompletionStatus::Success,
    });

    let seen_clone = seen.clone();
    notifier.add_handler(move |info| seen_clone.lock().push(info));

    let task_id = TaskId::next();
    notifier.notify(InternalCompletionMessage {
      task_id,
      task_type: "late".to_string(),
      unit_id: Some(UnitId(3)),
      status: TaskCompletionStatus::Failed,
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].task_id, task_id);
    assert_eq!(seen[0].task_type, "late");
    assert_eq!(seen[0].unit_id, Some(UnitId(3)));
    assert_eq!(*seen[0].pool_name, "notifier_unit");
  }
}
