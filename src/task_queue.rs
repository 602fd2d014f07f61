use crate::task::{TaskId, TaskRecord};

use std::collections::VecDeque;
use std::fmt;

/// The pool's pending-task queue.
///
/// FIFO for newly submitted work. Tasks displaced from a unit by a shrinking
/// resize re-enter at the front so they keep their place ahead of work that
/// was never dispatched.
pub(crate) struct PendingQueue<P, R> {
  tasks: VecDeque<TaskRecord<P, R>>,
}

impl<P, R> fmt::Debug for PendingQueue<P, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingQueue")
      .field("len", &self.tasks.len())
      .finish_non_exhaustive()
  }
}

impl<P, R> PendingQueue<P, R> {
  pub(crate) fn new() -> Self {
    Self { tasks: VecDeque::new() }
  }

  pub(crate) fn push_back(&mut self, task: TaskRecord<P, R>) {
    self.tasks.push_back(task);
  }

  /// Re-inserts displaced tasks at the front of the queue.
  ///
  /// The batch is ordered by submission sequence before insertion, so the
  /// displaced tasks come back in the order they were originally submitted.
  pub(crate) fn requeue_front(&mut self, mut displaced: Vec<TaskRecord<P, R>>) {
    displaced.sort_by_key(|task| task.task_id);
    for task in displaced.into_iter().rev() {
      self.tasks.push_front(task);
    }
  }

  pub(crate) fn pop_front(&mut self) -> Option<TaskRecord<P, R>> {
    self.tasks.pop_front()
  }

  /// Removes a specific task, keeping the relative order of the rest.
  pub(crate) fn remove(&mut self, task_id: TaskId) -> Option<TaskRecord<P, R>> {
    let position = self.tasks.iter().position(|task| task.task_id == task_id)?;
    self.tasks.remove(position)
  }

  pub(crate) fn contains(&self, task_id: TaskId) -> bool {
    self.tasks.iter().any(|task| task.task_id == task_id)
  }

  /// Takes every queued task, leaving the queue empty.
  pub(crate) fn drain_all(&mut self) -> Vec<TaskRecord<P, R>> {
    self.tasks.drain(..).collect()
  }

  pub(crate) fn len(&self) -> usize {
    self.tasks.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::oneshot;

  // Helper to create a dummy TaskRecord for testing the queue.
  fn dummy_task() -> TaskRecord<(), String> {
    let (tx, _) = oneshot::channel();
    TaskRecord {
      task_id: TaskId::next(),
      task_type: "dummy".to_string(),
      payload: (),
      cancel_signal: None,
      result_sender: tx,
    }
  }

  fn ids(queue: &mut PendingQueue<(), String>) -> Vec<TaskId> {
    queue.drain_all().into_iter().map(|task| task.task_id).collect()
  }

  #[test]
  fn test_queue_is_fifo() {
    let mut queue = PendingQueue::new();
    let (a, b, c) = (dummy_task(), dummy_task(), dummy_task());
    let expected = vec![a.task_id, b.task_id, c.task_id];
    queue.push_back(a);
    queue.push_back(b);
    queue.push_back(c);

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.pop_front().map(|t| t.task_id), Some(expected[0]));
    assert_eq!(ids(&mut queue), expected[1..].to_vec());
    assert!(queue.is_empty());
  }

  #[test]
  fn test_remove_keeps_order_of_remaining() {
    let mut queue = PendingQueue::new();
    let (a, b, c) = (dummy_task(), dummy_task(), dummy_task());
    let (id_a, id_b, id_c) = (a.task_id, b.task_id, c.task_id);
    queue.push_back(a);
    queue.push_back(b);
    queue.push_back(c);

    assert_eq!(queue.remove(id_b).map(|t| t.task_id), Some(id_b));
    assert!(!queue.contains(id_b));
    assert!(queue.remove(id_b).is_none());
    assert_eq!(ids(&mut queue), vec![id_a, id_c]);
  }

  #[test]
  fn test_requeue_front_restores_submission_order() {
    let mut queue = PendingQueue::new();
    let first = dummy_task();
    let second = dummy_task();
    let never_dispatched = dummy_task();
    let (id_first, id_second, id_never) = (first.task_id, second.task_id, never_dispatched.task_id);

    queue.push_back(never_dispatched);
    // Displaced in reverse order, as units are removed from the tail.
    queue.requeue_front(vec![second, first]);

    assert_eq!(ids(&mut queue), vec![id_first, id_second, id_never]);
  }
}
