use std::num::NonZeroUsize;
use std::thread;

const DEFAULT_POOL_NAME: &str = "thread_pool";

/// Configuration for a [`ThreadPool`](crate::ThreadPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Number of long-lived worker threads. Must be positive.
  pub worker_count: usize,
  /// Used in log fields and as the prefix of worker thread names.
  pub pool_name: String,
  /// Stack size for worker threads. `None` keeps the platform default.
  pub thread_stack_size: Option<usize>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      worker_count: thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1),
      pool_name: DEFAULT_POOL_NAME.to_string(),
      thread_stack_size: None,
    }
  }
}

impl PoolConfig {
  pub fn builder() -> PoolConfigBuilder {
    PoolConfigBuilder::default()
  }

  pub(crate) fn worker_thread_name(&self, index: usize) -> String {
    format!("{}-worker-{}", self.pool_name, index)
  }
}

/// Fluent builder for [`PoolConfig`].
#[derive(Debug, Default, Clone)]
pub struct PoolConfigBuilder {
  config: PoolConfig,
}

impl PoolConfigBuilder {
  pub fn worker_count(mut self, worker_count: usize) -> Self {
    self.config.worker_count = worker_count;
    self
  }

  pub fn pool_name(mut self, pool_name: impl Into<String>) -> Self {
    self.config.pool_name = pool_name.into();
    self
  }

  pub fn thread_stack_size(mut self, stack_size: usize) -> Self {
    self.config.thread_stack_size = Some(stack_size);
    self
  }

  /// Returns the configuration. Validation happens when the pool is built.
  pub fn build(self) -> PoolConfig {
    self.config
  }
}
