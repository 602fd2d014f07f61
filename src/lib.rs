//! A bounded, resizable Tokio-based pool of execution units.
//!
//! Work is submitted as a `(task_type, payload)` pair and run by a
//! [`TaskExecutor`] on one of the pool's units. Pending work is dispatched in
//! FIFO order, cancellation is cooperative, and every submission resolves its
//! [`TaskHandle`] exactly once with a typed outcome.

mod config;
mod error;
mod handle;
mod manager;
mod notifier;
mod task;
mod task_queue;
mod unit;

pub use config::{PoolConfig, DEFAULT_MAX_SIZE};
pub use error::{PoolError, TaskFailure};
pub use handle::TaskHandle;
pub use manager::{PoolManager, ShutdownMode};
pub use notifier::{TaskCompletionInfo, TaskCompletionStatus};
pub use task::{FnExecutor, TaskContext, TaskExecutor, TaskId};
pub use unit::{UnitId, UnitStatus};
