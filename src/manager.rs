use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::{CancelRoute, TaskHandle};
use crate::notifier::{CompletionNotifier, InternalCompletionMessage, TaskCompletionInfo, TaskCompletionStatus};
use crate::task::{TaskExecutor, TaskId, TaskRecord};
use crate::task_queue::PendingQueue;
use crate::unit::{ExecutionUnit, UnitId, UnitOutcome, UnitReport, UnitStatus};

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use fibre::mpsc::{self, AsyncReceiver, AsyncSender};
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Defines how `PoolManager::shutdown` treats outstanding work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stops accepting submissions, waits for the pending queue and every
  /// in-flight task to finish, then terminates.
  Graceful,
  /// Terminates immediately. Outstanding handles resolve with `PoolTerminated`.
  Terminate,
}

struct InFlightTask<P, R> {
  unit_id: UnitId,
  record: TaskRecord<P, R>,
}

/// Everything the dispatch path mutates. Only ever touched under `PoolCore::state`.
struct PoolState<E: TaskExecutor> {
  units: Vec<ExecutionUnit<E::Payload>>,
  pending: PendingQueue<E::Payload, E::Output>,
  in_flight: HashMap<TaskId, InFlightTask<E::Payload, E::Output>>,
  next_unit_id: u64,
  accepting: bool,
  terminated: bool,
}

impl<E: TaskExecutor> PoolState<E> {
  fn is_drained(&self) -> bool {
    self.pending.is_empty() && self.in_flight.is_empty()
  }
}

pub(crate) struct PoolCore<E: TaskExecutor> {
  pool_name: Arc<String>,
  config: PoolConfig,
  executor: Arc<E>,
  tokio_handle: TokioHandle,
  report_tx: AsyncSender<UnitReport<E::Output>>,
  state: Mutex<PoolState<E>>,
  notifier: CompletionNotifier,
  drained: Notify,
  shutdown_token: CancellationToken,
}

/// A bounded, resizable pool of execution units.
///
/// Tasks are dispatched in FIFO order to idle units. Every submitted task
/// resolves its handle exactly once. All bookkeeping lives behind a single
/// lock and is only changed by the manager's own methods and by the event
/// loop that consumes unit reports.
pub struct PoolManager<E: TaskExecutor> {
  core: Arc<PoolCore<E>>,
  event_loop_join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<E: TaskExecutor> PoolManager<E> {
  pub fn new(config: PoolConfig, executor: E, tokio_handle: TokioHandle) -> Result<Arc<Self>, PoolError> {
    config.validate()?;

    let pool_name = Arc::new(config.pool_name.clone());
    let initial_size = config.clamp_size(config.initial_size);
    let (report_tx, report_rx) = mpsc::unbounded_async();
    let shutdown_token = CancellationToken::new();

    let core = Arc::new(PoolCore {
      pool_name: pool_name.clone(),
      config,
      executor: Arc::new(executor),
      tokio_handle: tokio_handle.clone(),
      report_tx,
      state: Mutex::new(PoolState {
        units: Vec::with_capacity(initial_size),
        pending: PendingQueue::new(),
        in_flight: HashMap::new(),
        next_unit_id: 0,
        accepting: true,
        terminated: false,
      }),
      notifier: CompletionNotifier::new(tokio_handle.clone(), pool_name.clone()),
      drained: Notify::new(),
      shutdown_token: shutdown_token.clone(),
    });

    {
      let mut state = core.state.lock();
      for _ in 0..initial_size {
        let unit = core.spawn_unit(&mut state);
        state.units.push(unit);
      }
    }

    let event_loop = tokio_handle.spawn(
      PoolCore::run_event_loop(Arc::downgrade(&core), report_rx, shutdown_token)
        .instrument(info_span!("pool_event_loop", pool_name = %*pool_name)),
    );

    info!(pool_name = %*pool_name, size = initial_size, "Pool created.");

    Ok(Arc::new(Self {
      core,
      event_loop_join_handle: Mutex::new(Some(event_loop)),
    }))
  }

  pub fn name(&self) -> &str {
    &self.core.pool_name
  }

  /// Current number of execution units.
  pub fn size(&self) -> usize {
    self.core.state.lock().units.len()
  }

  /// The `(min_size, max_size)` range every resize is clamped into.
  pub fn bounds(&self) -> (usize, usize) {
    (self.core.config.min_size, self.core.config.max_size)
  }

  pub fn is_terminated(&self) -> bool {
    self.core.state.lock().terminated
  }

  /// Submits a task. Never blocks.
  ///
  /// The task is dispatched to an idle unit right away if one exists,
  /// otherwise it waits at the back of the pending queue. A `cancelable` task
  /// carries a cooperative cancellation signal visible to the computation
  /// through its `TaskContext`.
  ///
  /// # Errors
  /// Returns `PoolError::TaskRejected` if the pool is terminated or draining.
  pub fn submit(
    &self,
    task_type: impl Into<String>,
    payload: E::Payload,
    cancelable: bool,
  ) -> Result<TaskHandle<E::Output>, PoolError> {
    let task_type = task_type.into();
    let mut state = self.core.state.lock();
    if state.terminated || !state.accepting {
      warn!(pool_name = %*self.core.pool_name, %task_type, "Submit: Attempted to submit task to a pool that is terminated or shutting down.");
      return Err(PoolError::TaskRejected);
    }

    let task_id = TaskId::next();
    let cancel_signal = cancelable.then(CancellationToken::new);
    let (result_tx, result_rx) = oneshot::channel::<Result<E::Output, PoolError>>();
    let core_weak: Weak<PoolCore<E>> = Arc::downgrade(&self.core);
    let route: Weak<dyn CancelRoute> = core_weak;

    let handle = TaskHandle {
      task_id,
      task_type: task_type.clone(),
      cancel_signal: cancel_signal.clone(),
      result_receiver: Some(result_rx),
      route,
    };

    debug!(pool_name = %*self.core.pool_name, %task_id, %task_type, cancelable, "Submitting task.");

    // Whenever a unit is idle the queue is empty, so appending and draining
    // dispatches immediately when possible and keeps FIFO order otherwise.
    state.pending.push_back(TaskRecord {
      task_id,
      task_type,
      payload,
      cancel_signal,
      result_sender: result_tx,
    });
    self.core.dispatch_pending(&mut state);

    Ok(handle)
  }

  /// Cancels a task by id.
  ///
  /// A pending task is removed and resolved with `TaskCancelled` before this
  /// returns. An in-flight cancelable task only has its signal raised; it
  /// keeps its unit until the computation stops. Returns `false` for unknown,
  /// terminal, non-cancelable in-flight, or already-signalled tasks.
  pub fn cancel(&self, task_id: TaskId) -> bool {
    self.core.cancel_task(task_id)
  }

  /// Resizes the pool to `new_size`, clamped into the configured bounds.
  ///
  /// Growing drains the pending queue into the new units. Shrinking removes
  /// units from the tail; their in-flight tasks go back to the front of the
  /// pending queue and will run again from the start. Returns the applied size.
  pub fn resize(&self, new_size: usize) -> usize {
    self.core.resize(new_size)
  }

  pub fn status(&self) -> Vec<UnitStatus> {
    self.core.state.lock().units.iter().map(|unit| unit.status()).collect()
  }

  /// Returns the current number of tasks in the pending queue.
  pub fn queue_length(&self) -> usize {
    self.core.state.lock().pending.len()
  }

  pub fn active_task_count(&self) -> usize {
    self.core.state.lock().in_flight.len()
  }

  /// Registers a handler invoked once for every task that reaches a terminal state.
  pub fn add_completion_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.core.notifier.add_handler(handler);
  }

  /// Tears the pool down. Irreversible.
  ///
  /// Every unit is aborted, every pending and in-flight handle resolves with
  /// `PoolTerminated`, and later submissions are rejected.
  pub fn terminate(&self) {
    self.core.terminate();
  }

  /// Shuts the pool down according to `mode` and waits for the event loop to stop.
  pub async fn shutdown(&self, mode: ShutdownMode) {
    let pool_name = self.core.pool_name.clone();
    match mode {
      ShutdownMode::Graceful => {
        {
          let mut state = self.core.state.lock();
          if !state.terminated {
            info!(pool_name = %*pool_name, pending = state.pending.len(), in_flight = state.in_flight.len(), "Graceful shutdown: no longer accepting tasks, draining.");
            state.accepting = false;
          }
        }

        loop {
          let notified = self.core.drained.notified();
          tokio::pin!(notified);
          notified.as_mut().enable();

          if self.core.is_drained_or_terminated() {
            break;
          }
          notified.await;
        }
        self.core.terminate();
      }
      ShutdownMode::Terminate => self.core.terminate(),
    }

    let handle_to_await = self.event_loop_join_handle.lock().take();
    if let Some(handle) = handle_to_await {
      match handle.await {
        Ok(()) => info!(pool_name = %*pool_name, "Event loop successfully joined."),
        Err(join_error) => {
          error!(pool_name = %*pool_name, "Error joining event loop during shutdown: {:?}", join_error);
        }
      }
    } else {
      trace!(pool_name = %*pool_name, "Event loop join handle already taken.");
    }
  }
}

impl<E: TaskExecutor> Drop for PoolManager<E> {
  fn drop(&mut self) {
    if !self.core.state.lock().terminated {
      info!(pool_name = %*self.core.pool_name, "PoolManager dropped. Terminating implicitly.");
      self.core.terminate();
    }
  }
}

impl<E: TaskExecutor> PoolCore<E> {
  fn spawn_unit(&self, state: &mut PoolState<E>) -> ExecutionUnit<E::Payload> {
    let unit_id = UnitId(state.next_unit_id);
    state.next_unit_id += 1;
    trace!(pool_name = %*self.pool_name, %unit_id, "Spawning execution unit.");
    ExecutionUnit::spawn(
      unit_id,
      self.executor.clone(),
      self.report_tx.clone(),
      &self.tokio_handle,
      &self.pool_name,
    )
  }

  fn is_drained_or_terminated(&self) -> bool {
    let state = self.state.lock();
    state.terminated || state.is_drained()
  }

  fn signal_if_drained(&self, state: &PoolState<E>) {
    if state.is_drained() {
      self.drained.notify_waiters();
    }
  }

  /// Moves pending tasks onto idle units until one side runs out.
  fn dispatch_pending(&self, state: &mut PoolState<E>) {
    let mut replaced_unit = false;

    loop {
      if state.pending.is_empty() {
        break;
      }
      let Some(unit_index) = state.units.iter().position(|unit| !unit.is_busy()) else {
        break;
      };
      let Some(record) = state.pending.pop_front() else {
        break;
      };

      if record.cancellation_requested() {
        debug!(pool_name = %*self.pool_name, task_id = %record.task_id, "Dequeued task already cancelled.");
        self.resolve(record, None, Err(PoolError::TaskCancelled));
        continue;
      }

      let unit_id = state.units[unit_index].id();
      match state.units[unit_index].assign(record.context(), record.payload.clone()) {
        Ok(()) => {
          debug!(pool_name = %*self.pool_name, task_id = %record.task_id, %unit_id, "Dispatched task to unit.");
          debug_assert!(!state.pending.contains(record.task_id), "{} both pending and in flight", record.task_id);
          state.in_flight.insert(record.task_id, InFlightTask { unit_id, record });
        }
        Err(_) => {
          state.pending.requeue_front(vec![record]);
          if replaced_unit {
            error!(pool_name = %*self.pool_name, %unit_id, "Replacement unit is not accepting work either. Leaving tasks queued.");
            break;
          }
          error!(pool_name = %*self.pool_name, %unit_id, "Execution unit stopped unexpectedly. Replacing it.");
          let replacement = self.spawn_unit(state);
          let dead_unit = std::mem::replace(&mut state.units[unit_index], replacement);
          dead_unit.destroy();
          replaced_unit = true;
        }
      }
    }
  }

  fn resolve(&self, record: TaskRecord<E::Payload, E::Output>, unit_id: Option<UnitId>, result: Result<E::Output, PoolError>) {
    let status = TaskCompletionStatus::from(&result);
    debug!(pool_name = %*self.pool_name, task_id = %record.task_id, ?status, "Resolving task.");

    self.notifier.notify(InternalCompletionMessage {
      task_id: record.task_id,
      task_type: record.task_type,
      unit_id,
      status,
    });

    if record.result_sender.send(result).is_err() {
      warn!(pool_name = %*self.pool_name, task_id = %record.task_id, "Result receiver for task was dropped. Task outcome may have been lost.");
    }
  }

  /// Handles the single report a unit emits for a dispatched task.
  fn on_unit_message(&self, report: UnitReport<E::Output>) {
    let UnitReport { unit_id, task_id, outcome } = report;
    let mut state = self.state.lock();

    let is_current = state
      .in_flight
      .get(&task_id)
      .map_or(false, |in_flight| in_flight.unit_id == unit_id);
    if !is_current {
      warn!(pool_name = %*self.pool_name, %task_id, %unit_id, "Ignoring stale report from unit.");
      return;
    }
    let Some(InFlightTask { record, .. }) = state.in_flight.remove(&task_id) else {
      return;
    };

    let result = match outcome {
      UnitOutcome::Success(value) => Ok(value),
      UnitOutcome::Failed(_) if record.cancellation_requested() => Err(PoolError::TaskCancelled),
      UnitOutcome::Failed(failure) => Err(PoolError::TaskFailed(failure.reason().to_string())),
      UnitOutcome::Panicked(message) => Err(PoolError::TaskFailed(format!("task panicked: {}", message))),
    };

    if let Some(unit) = state.units.iter_mut().find(|unit| unit.id() == unit_id) {
      debug_assert_eq!(unit.current_task(), Some(task_id), "{} reported a task it was not holding", unit_id);
      unit.finish(result.is_ok());
    }

    self.resolve(record, Some(unit_id), result);
    self.dispatch_pending(&mut state);
    self.signal_if_drained(&state);
  }

  fn resize(&self, new_size: usize) -> usize {
    let mut state = self.state.lock();
    if state.terminated {
      warn!(pool_name = %*self.pool_name, new_size, "Resize: pool is terminated, ignoring.");
      return 0;
    }

    let target = self.config.clamp_size(new_size);
    let current = state.units.len();

    if target > current {
      for _ in current..target {
        let unit = self.spawn_unit(&mut state);
        state.units.push(unit);
      }
      info!(pool_name = %*self.pool_name, from = current, to = target, "Pool grown.");
    } else if target < current {
      let removed: Vec<ExecutionUnit<E::Payload>> = state.units.drain(target..).collect();
      let mut displaced = Vec::new();

      for unit in removed {
        let unit_id = unit.id();
        let Some(task_id) = unit.destroy() else {
          continue;
        };
        let Some(InFlightTask { record, .. }) = state.in_flight.remove(&task_id) else {
          continue;
        };
        if record.cancellation_requested() {
          debug!(pool_name = %*self.pool_name, %task_id, %unit_id, "Displaced task was already asked to cancel. Resolving as cancelled.");
          self.resolve(record, Some(unit_id), Err(PoolError::TaskCancelled));
        } else {
          debug!(pool_name = %*self.pool_name, %task_id, %unit_id, "Re-queueing task displaced by shrink.");
          displaced.push(record);
        }
      }

      info!(pool_name = %*self.pool_name, from = current, to = target, requeued = displaced.len(), "Pool shrunk.");
      state.pending.requeue_front(displaced);
    }

    self.dispatch_pending(&mut state);
    self.signal_if_drained(&state);
    target
  }

  fn terminate(&self) {
    let mut state = self.state.lock();
    if state.terminated {
      trace!(pool_name = %*self.pool_name, "Terminate: already terminated.");
      return;
    }
    state.terminated = true;
    state.accepting = false;

    info!(
      pool_name = %*self.pool_name,
      units = state.units.len(),
      pending = state.pending.len(),
      in_flight = state.in_flight.len(),
      "Terminating pool."
    );

    for unit in std::mem::take(&mut state.units) {
      unit.destroy();
    }

    let mut in_flight: Vec<InFlightTask<E::Payload, E::Output>> = state.in_flight.drain().map(|(_, task)| task).collect();
    in_flight.sort_by_key(|task| task.record.task_id);
    for InFlightTask { unit_id, record } in in_flight {
      if let Some(token) = &record.cancel_signal {
        token.cancel();
      }
      self.resolve(record, Some(unit_id), Err(PoolError::PoolTerminated));
    }

    for record in state.pending.drain_all() {
      self.resolve(record, None, Err(PoolError::PoolTerminated));
    }

    self.shutdown_token.cancel();
    self.drained.notify_waiters();
  }

  async fn run_event_loop(
    core: Weak<PoolCore<E>>,
    mut reports_rx: AsyncReceiver<UnitReport<E::Output>>,
    shutdown_token: CancellationToken,
  ) {
    info!("Event loop started.");

    loop {
      tokio::select! {
        biased;

        _ = shutdown_token.cancelled() => {
          info!("Shutdown signal received. Event loop terminating.");
          break;
        }

        recv_result = reports_rx.recv() => {
          match recv_result {
            Ok(report) => match core.upgrade() {
              Some(core) => core.on_unit_message(report),
              None => {
                debug!("Pool dropped. Event loop terminating.");
                break;
              }
            },
            Err(_) => {
              info!("Unit report channel closed. Event loop terminating.");
              break;
            }
          }
        }
      }
    }

    info!("Event loop stopped.");
  }
}

impl<E: TaskExecutor> CancelRoute for PoolCore<E> {
  fn cancel_task(&self, task_id: TaskId) -> bool {
    let mut state = self.state.lock();

    if let Some(record) = state.pending.remove(task_id) {
      if let Some(token) = &record.cancel_signal {
        token.cancel();
      }
      debug!(pool_name = %*self.pool_name, %task_id, "Cancelled pending task.");
      self.resolve(record, None, Err(PoolError::TaskCancelled));
      self.signal_if_drained(&state);
      return true;
    }

    match state.in_flight.get(&task_id) {
      Some(in_flight) => match &in_flight.record.cancel_signal {
        Some(token) if !token.is_cancelled() => {
          debug!(pool_name = %*self.pool_name, %task_id, unit_id = %in_flight.unit_id, "Signalling cancellation to in-flight task.");
          token.cancel();
          true
        }
        Some(_) => {
          trace!(pool_name = %*self.pool_name, %task_id, "Cancellation already requested.");
          false
        }
        None => {
          debug!(pool_name = %*self.pool_name, %task_id, "In-flight task is not cancelable.");
          false
        }
      },
      None => {
        trace!(pool_name = %*self.pool_name, %task_id, "Cancel: unknown or already terminal task.");
        false
      }
    }
  }
}
