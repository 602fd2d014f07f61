use crate::error::{PoolError, TaskFailure};

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Opaque identifier of a submitted task.
///
/// Identifiers are allocated from a process-wide counter, so they also encode
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
  pub(crate) fn next() -> Self {
    TaskId(NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed))
  }

  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "task-{}", self.0)
  }
}

/// What a computation sees of the task it is running.
///
/// Cancellation is cooperative: the pool only flips the signal, the
/// computation must check it at its own safe points.
#[derive(Debug, Clone)]
pub struct TaskContext {
  task_id: TaskId,
  task_type: String,
  cancel_signal: Option<CancellationToken>,
}

impl TaskContext {
  pub(crate) fn new(task_id: TaskId, task_type: String, cancel_signal: Option<CancellationToken>) -> Self {
    Self {
      task_id,
      task_type,
      cancel_signal,
    }
  }

  pub fn task_id(&self) -> TaskId {
    self.task_id
  }

  pub fn task_type(&self) -> &str {
    &self.task_type
  }

  /// Returns `true` if the task was submitted as cancelable.
  pub fn is_cancelable(&self) -> bool {
    self.cancel_signal.is_some()
  }

  /// Returns `true` once cancellation has been requested. Always `false` for
  /// tasks that were not submitted as cancelable.
  pub fn is_cancelled(&self) -> bool {
    self
      .cancel_signal
      .as_ref()
      .map_or(false, |token| token.is_cancelled())
  }

  /// Resolves when cancellation is requested. Never resolves for tasks that
  /// were not submitted as cancelable.
  pub async fn cancelled(&self) {
    match &self.cancel_signal {
      Some(token) => token.cancelled().await,
      None => futures::future::pending::<()>().await,
    }
  }
}

/// The computation supplier: turns a `(task_type, payload)` pair into exactly
/// one outcome.
///
/// Payloads must be `Clone` because a task displaced by a shrinking `resize`
/// is dispatched again from scratch on another unit.
///
/// Heavy synchronous work should be moved onto `tokio::task::spawn_blocking`
/// inside `execute`, otherwise it occupies a runtime worker thread for its
/// whole duration.
pub trait TaskExecutor: Send + Sync + 'static {
  type Payload: Clone + Send + 'static;
  type Output: Send + 'static;

  fn execute(&self, ctx: TaskContext, payload: Self::Payload) -> BoxFuture<'_, Result<Self::Output, TaskFailure>>;
}

/// Adapts an async closure into a `TaskExecutor`.
pub struct FnExecutor<F, P, R> {
  f: F,
  _marker: PhantomData<fn(P) -> R>,
}

impl<F, P, R> FnExecutor<F, P, R> {
  pub fn new<Fut>(f: F) -> Self
  where
    F: Fn(TaskContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TaskFailure>> + Send + 'static,
  {
    Self { f, _marker: PhantomData }
  }
}

impl<F, Fut, P, R> TaskExecutor for FnExecutor<F, P, R>
where
  F: Fn(TaskContext, P) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<R, TaskFailure>> + Send + 'static,
  P: Clone + Send + 'static,
  R: Send + 'static,
{
  type Payload = P;
  type Output = R;

  fn execute(&self, ctx: TaskContext, payload: P) -> BoxFuture<'_, Result<R, TaskFailure>> {
    (self.f)(ctx, payload).boxed()
  }
}

/// Internal representation of a task owned by the pool while it is pending or in-flight.
pub(crate) struct TaskRecord<P, R> {
  pub(crate) task_id: TaskId,
  pub(crate) task_type: String,
  pub(crate) payload: P,
  pub(crate) cancel_signal: Option<CancellationToken>,
  pub(crate) result_sender: oneshot::Sender<Result<R, PoolError>>,
}

impl<P, R> TaskRecord<P, R> {
  pub(crate) fn cancellation_requested(&self) -> bool {
    self
      .cancel_signal
      .as_ref()
      .map_or(false, |token| token.is_cancelled())
  }

  pub(crate) fn context(&self) -> TaskContext {
    TaskContext::new(self.task_id, self.task_type.clone(), self.cancel_signal.clone())
  }
}

impl<P, R> fmt::Debug for TaskRecord<P, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskRecord")
      .field("task_id", &self.task_id)
      .field("task_type", &self.task_type)
      .field("cancelable", &self.cancel_signal.is_some())
      .finish_non_exhaustive()
  }
}
