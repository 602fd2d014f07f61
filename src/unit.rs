use crate::error::TaskFailure;
use crate::task::{TaskContext, TaskExecutor, TaskId};

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use fibre::mpsc::AsyncSender;
use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, trace, warn, Instrument};

/// Stable identifier of an execution unit. Never reused within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(crate) u64);

impl fmt::Display for UnitId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unit-{}", self.0)
  }
}

/// Read-only snapshot of one execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
  pub unit_id: UnitId,
  pub busy: bool,
  pub current_task_id: Option<TaskId>,
  pub completed_count: u64,
  pub error_count: u64,
}

/// What a unit observed when its computation ended.
#[derive(Debug)]
pub(crate) enum UnitOutcome<R> {
  Success(R),
  Failed(TaskFailure),
  Panicked(String),
}

/// The single message a unit emits per dispatched task.
#[derive(Debug)]
pub(crate) struct UnitReport<R> {
  pub(crate) unit_id: UnitId,
  pub(crate) task_id: TaskId,
  pub(crate) outcome: UnitOutcome<R>,
}

pub(crate) struct Dispatch<P> {
  ctx: TaskContext,
  payload: P,
}

/// The manager's view of one execution unit.
///
/// The unit's computation runs on its own tokio task; the manager only keeps
/// the inbox used to hand it work, the join handle used to tear it down, and
/// the bookkeeping below. `current_task` is the busy flag.
pub(crate) struct ExecutionUnit<P> {
  id: UnitId,
  current_task: Option<TaskId>,
  completed_count: u64,
  error_count: u64,
  inbox: mpsc::UnboundedSender<Dispatch<P>>,
  join_handle: JoinHandle<()>,
}

impl<P> fmt::Debug for ExecutionUnit<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutionUnit")
      .field("id", &self.id)
      .field("current_task", &self.current_task)
      .field("completed_count", &self.completed_count)
      .field("error_count", &self.error_count)
      .finish_non_exhaustive()
  }
}

impl<P: Clone + Send + 'static> ExecutionUnit<P> {
  pub(crate) fn spawn<E>(
    id: UnitId,
    executor: Arc<E>,
    reports: AsyncSender<UnitReport<E::Output>>,
    tokio_handle: &TokioHandle,
    pool_name: &str,
  ) -> Self
  where
    E: TaskExecutor<Payload = P>,
  {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let join_handle = tokio_handle.spawn(
      run_unit(id, executor, inbox_rx, reports).instrument(info_span!("execution_unit", %pool_name, unit_id = %id)),
    );

    Self {
      id,
      current_task: None,
      completed_count: 0,
      error_count: 0,
      inbox: inbox_tx,
      join_handle,
    }
  }

  pub(crate) fn id(&self) -> UnitId {
    self.id
  }

  pub(crate) fn is_busy(&self) -> bool {
    self.current_task.is_some()
  }

  pub(crate) fn current_task(&self) -> Option<TaskId> {
    self.current_task
  }

  /// Hands a task to an idle unit.
  ///
  /// Fails only if the unit's task is gone, in which case the payload is
  /// handed back and the unit stays idle.
  pub(crate) fn assign(&mut self, ctx: TaskContext, payload: P) -> Result<(), (TaskContext, P)> {
    debug_assert!(self.current_task.is_none(), "unit {} assigned while busy", self.id);
    let task_id = ctx.task_id();
    match self.inbox.send(Dispatch { ctx, payload }) {
      Ok(()) => {
        self.current_task = Some(task_id);
        Ok(())
      }
      Err(mpsc::error::SendError(dispatch)) => Err((dispatch.ctx, dispatch.payload)),
    }
  }

  /// Marks the unit idle again and accounts for how its task ended.
  pub(crate) fn finish(&mut self, succeeded: bool) {
    self.current_task = None;
    if succeeded {
      self.completed_count += 1;
    } else {
      self.error_count += 1;
    }
  }

  pub(crate) fn status(&self) -> UnitStatus {
    UnitStatus {
      unit_id: self.id,
      busy: self.is_busy(),
      current_task_id: self.current_task,
      completed_count: self.completed_count,
      error_count: self.error_count,
    }
  }

  /// Stops the unit's task without touching its bookkeeping.
  #[cfg(test)]
  pub(crate) fn abort(&self) {
    self.join_handle.abort();
  }

  /// Tears the unit down, interrupting its computation at the next await
  /// point. Returns the task it was holding, if any.
  pub(crate) fn destroy(self) -> Option<TaskId> {
    self.join_handle.abort();
    self.current_task
  }
}

async fn run_unit<E: TaskExecutor>(
  unit_id: UnitId,
  executor: Arc<E>,
  mut inbox: mpsc::UnboundedReceiver<Dispatch<E::Payload>>,
  reports: AsyncSender<UnitReport<E::Output>>,
) {
  debug!("Execution unit started.");

  while let Some(Dispatch { ctx, payload }) = inbox.recv().await {
    let task_id = ctx.task_id();
    trace!(%task_id, task_type = %ctx.task_type(), "Unit received task.");

    let executor_ref = &executor;
    let computation = async move { executor_ref.execute(ctx, payload).await };

    let outcome = match AssertUnwindSafe(computation).catch_unwind().await {
      Ok(Ok(result)) => UnitOutcome::Success(result),
      Ok(Err(failure)) => UnitOutcome::Failed(failure),
      Err(panic_payload) => {
        let message = panic_message(panic_payload.as_ref());
        error!(%task_id, panic = %message, "Task panicked during execution.");
        UnitOutcome::Panicked(message)
      }
    };

    if reports.send(UnitReport { unit_id, task_id, outcome }).await.is_err() {
      warn!(%task_id, "Pool no longer receiving unit reports. Unit stopping.");
      break;
    }
  }

  debug!("Execution unit stopped.");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
