//! A fixed-size thread pool that runs blocking computations as tasks, with
//! continuations chained onto prior results, shared blocking access to
//! outcomes, and a shutdown that never leaves a reader hanging.

mod config;
mod error;
mod handle;
mod manager;
mod task;
mod task_queue;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{BoxError, PoolError};
pub use handle::Task;
pub use manager::ThreadPool;
