use parallel_pool::{FnExecutor, PoolConfig, PoolManager, ShutdownMode, TaskContext, TaskFailure, TaskHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

/// Counts the words in a document, checking for cancellation between chunks.
async fn word_count(ctx: TaskContext, document: String) -> Result<usize, TaskFailure> {
  let mut total = 0;
  for chunk in document.split('\n') {
    if ctx.is_cancelled() {
      return Err(TaskFailure::new("cancelled between chunks"));
    }
    total += chunk.split_whitespace().count();
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  Ok(total)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let config = PoolConfig::from_env().with_name("basic_pool").with_initial_size(2);
  let manager = PoolManager::new(config, FnExecutor::new(word_count), Handle::current()).expect("valid pool configuration");

  let documents = [
    "the quick brown fox\njumps over\nthe lazy dog",
    "lorem ipsum dolor sit amet",
    "one\ntwo\nthree\nfour",
    "a b c d e f g",
    "parallel pools bound concurrency",
  ];

  let mut handles: Vec<TaskHandle<usize>> = Vec::new();
  for document in documents {
    match manager.submit("word_count", document.to_string(), true) {
      Ok(handle) => {
        info!("Submitted task {}", handle.id());
        handles.push(handle);
      }
      Err(e) => tracing::error!("Failed to submit document: {:?}", e),
    }
  }

  info!(queue_length = manager.queue_length(), active = manager.active_task_count(), "All tasks submitted.");

  // Grow the pool while work is queued; pending tasks start on the new units.
  manager.resize(4);

  for handle in handles {
    let task_id = handle.id();
    match handle.await_result().await {
      Ok(words) => info!("Result for task {}: {} words", task_id, words),
      Err(e) => info!("Error for task {}: {}", task_id, e),
    }
  }

  for unit in manager.status() {
    info!("{}: completed={} errors={}", unit.unit_id, unit.completed_count, unit.error_count);
  }

  manager.shutdown(ShutdownMode::Graceful).await;
  info!("--- Basic Usage Example End ---");
}
