use crate::config::PoolConfig;
use crate::error::{BoxError, PoolError};
use crate::handle::Task;
use crate::task::{Computation, TaskCore};
use crate::task_queue::{ActionQueue, Dispatcher, QueueConsumer};

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use futures::executor::block_on;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn};

/// A fixed set of worker threads consuming a shared queue of ready actions.
///
/// Computations submitted with [`ThreadPool::submit`] become [`Task`]s. The
/// pool stops accepting work once [`ThreadPool::shutdown`] is called, and any
/// task that never got to run resolves to `PoolError::PoolStopped`.
pub struct ThreadPool {
  pool_name: Arc<String>,
  worker_count: usize,
  dispatcher: Arc<Dispatcher>,
  worker_ids: Vec<ThreadId>,
  worker_join_handles: Mutex<Vec<JoinHandle<()>>>,
  terminated_token: CancellationToken,
}

impl fmt::Debug for ThreadPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ThreadPool")
      .field("pool_name", &self.pool_name)
      .field("worker_count", &self.worker_count)
      .field("queued", &self.queued_action_count())
      .field("shutdown", &self.is_shutdown())
      .finish()
  }
}

impl ThreadPool {
  /// Starts a pool with `worker_count` workers and default settings otherwise.
  ///
  /// # Errors
  /// Returns `PoolError::InvalidArgument` if `worker_count` is zero.
  pub fn new(worker_count: usize) -> Result<Self, PoolError> {
    Self::with_config(PoolConfig {
      worker_count,
      ..PoolConfig::default()
    })
  }

  /// Starts a pool from a full [`PoolConfig`]. Workers are named
  /// `"{pool_name}-worker-{index}"`.
  ///
  /// # Errors
  /// Returns `PoolError::InvalidArgument` if `config.worker_count` is zero.
  /// Returns `PoolError::WorkerSpawn` if the OS refuses to spawn a worker
  /// thread. Workers already started are stopped and joined first.
  pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
    if config.worker_count == 0 {
      return Err(PoolError::InvalidArgument(
        "The number of worker threads should be positive".to_string(),
      ));
    }

    let pool_name = Arc::new(config.pool_name.clone());
    let shutdown_token = CancellationToken::new();
    let (dispatcher, consumer) = ActionQueue::new().split(pool_name.clone(), shutdown_token.clone());

    let mut worker_join_handles = Vec::with_capacity(config.worker_count);
    for worker_index in 0..config.worker_count {
      let mut builder = thread::Builder::new().name(config.worker_thread_name(worker_index));
      if let Some(stack_size) = config.thread_stack_size {
        builder = builder.stack_size(stack_size);
      }

      let worker_pool_name = pool_name.clone();
      let worker_consumer = consumer.clone();
      let worker_shutdown_token = shutdown_token.clone();
      let spawned = builder.spawn(move || {
        Self::run_worker_loop(worker_pool_name, worker_index, worker_consumer, worker_shutdown_token)
      });

      match spawned {
        Ok(handle) => worker_join_handles.push(handle),
        Err(spawn_error) => {
          error!(pool_name = %*pool_name, worker = worker_index, "Failed to spawn worker thread: {}", spawn_error);
          dispatcher.close();
          for handle in worker_join_handles {
            let _ = handle.join();
          }
          return Err(PoolError::WorkerSpawn(spawn_error.to_string()));
        }
      }
    }

    info!(pool_name = %*pool_name, workers = config.worker_count, "Thread pool started.");

    Ok(Self {
      worker_ids: worker_join_handles.iter().map(|handle| handle.thread().id()).collect(),
      pool_name,
      worker_count: config.worker_count,
      dispatcher,
      worker_join_handles: Mutex::new(worker_join_handles),
      terminated_token: CancellationToken::new(),
    })
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// Number of worker threads, fixed at construction.
  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  /// `true` once shutdown has been signaled.
  pub fn is_shutdown(&self) -> bool {
    self.dispatcher.is_stopped()
  }

  /// Returns the current number of actions waiting for a worker.
  pub fn queued_action_count(&self) -> usize {
    self.dispatcher.len()
  }

  /// Submits a computation and returns a handle to its eventual value.
  ///
  /// A panic inside `computation` is captured as `PoolError::TaskPanicked`.
  ///
  /// # Errors
  /// Returns `PoolError::PoolStopped` if the pool has been shut down.
  pub fn submit<T, F>(&self, computation: F) -> Result<Task<T>, PoolError>
  where
    T: Clone + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
  {
    self.submit_computation(Box::new(move || Ok(computation())))
  }

  /// Submits a fallible computation. An `Err` it returns is stored on the task
  /// as `PoolError::ComputationFailed`.
  pub fn try_submit<T, E, F>(&self, computation: F) -> Result<Task<T>, PoolError>
  where
    T: Clone + Send + 'static,
    E: Into<BoxError>,
    F: FnOnce() -> Result<T, E> + Send + 'static,
  {
    self.submit_computation(Box::new(move || computation().map_err(PoolError::computation)))
  }

  fn submit_computation<T>(&self, computation: Computation<T>) -> Result<Task<T>, PoolError>
  where
    T: Clone + Send + 'static,
  {
    if self.dispatcher.is_stopped() {
      warn!(pool_name = %*self.pool_name, "Submit: Attempted to submit task to a pool that is shut down.");
      return Err(PoolError::PoolStopped);
    }

    let core = TaskCore::new(computation, self.dispatcher.clone());
    let task_id = core.id();
    debug!(pool_name = %*self.pool_name, %task_id, "Submitting task to queue.");

    if self.dispatcher.try_enqueue(Arc::clone(&core).into_action()) {
      Ok(Task::new(core))
    } else {
      warn!(pool_name = %*self.pool_name, %task_id, "Submit: Pool shut down before the task could be queued.");
      Err(PoolError::PoolStopped)
    }
  }

  /// Stops the pool and blocks until every worker thread has exited.
  ///
  /// Queued actions that no worker picked up are discarded; readers of their
  /// tasks observe `PoolError::PoolStopped`. Computations already running are
  /// allowed to finish. Calling this again, concurrently or later, waits for
  /// the same termination. Called from inside a computation, it signals the
  /// stop without waiting, since the calling worker cannot join itself.
  pub fn shutdown(&self) {
    if self.dispatcher.close() {
      info!(pool_name = %*self.pool_name, "Initiating pool shutdown. Cancellation signaled and action queue closed.");
    } else {
      info!(pool_name = %*self.pool_name, "Shutdown already in progress or completed.");
    }

    if self.worker_ids.contains(&thread::current().id()) {
      warn!(pool_name = %*self.pool_name, "Shutdown called from a pool worker. Not waiting for workers to exit.");
      return;
    }

    let handles_to_join: Vec<JoinHandle<()>> = std::mem::take(&mut *self.worker_join_handles.lock());
    if handles_to_join.is_empty() {
      trace!(pool_name = %*self.pool_name, "Worker handles already taken. Waiting for termination.");
      block_on(self.terminated_token.cancelled());
      return;
    }

    info!(pool_name = %*self.pool_name, workers = handles_to_join.len(), "Waiting for workers to join.");
    for handle in handles_to_join {
      let worker_name = handle.thread().name().unwrap_or("unnamed").to_string();
      if handle.join().is_err() {
        error!(pool_name = %*self.pool_name, worker = %worker_name, "Worker thread panicked before joining.");
      }
    }
    self.terminated_token.cancel();
    info!(pool_name = %*self.pool_name, "Pool shutdown completed.");
  }

  fn run_worker_loop(
    pool_name: Arc<String>,
    worker_index: usize,
    consumer: QueueConsumer,
    shutdown_token: CancellationToken,
  ) {
    let span = info_span!("thread_pool_worker", pool_name = %*pool_name, worker = worker_index);
    let _entered = span.enter();
    debug!("Worker loop started.");

    loop {
      let Some(action) = consumer.recv() else {
        debug!("Action queue closed. Worker loop terminating.");
        break;
      };
      if shutdown_token.is_cancelled() {
        debug!("Shutdown signal observed after dequeue. Dropping action and terminating.");
        break;
      }
      trace!("Dequeued action. Invoking.");
      action();
    }

    debug!("Worker loop stopped.");
  }
}

impl Drop for ThreadPool {
  fn drop(&mut self) {
    // Signal only; joining here could block on long-running computations.
    if self.dispatcher.close() {
      info!(
        pool_name = %*self.pool_name,
        "ThreadPool dropped. Shutdown signaled and action queue closed. Workers will exit on their own."
      );
    } else {
      trace!(pool_name = %*self.pool_name, "Drop: Shutdown already in progress or completed.");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_zero_workers_rejected() {
    match ThreadPool::new(0) {
      Err(PoolError::InvalidArgument(message)) => assert!(message.contains("positive")),
      other => panic!("expected InvalidArgument, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn test_worker_threads_are_named_after_pool() {
    let config = PoolConfig::builder().worker_count(1).pool_name("named").build();
    let pool = ThreadPool::with_config(config).unwrap();
    let task = pool
      .submit(|| thread::current().name().map(str::to_string))
      .unwrap();
    assert_eq!(task.result().unwrap().as_deref(), Some("named-worker-0"));
    assert_eq!(pool.name(), "named");
    pool.shutdown();
  }

  #[test]
  fn test_drop_signals_shutdown_to_outstanding_tasks() {
    let pool = ThreadPool::new(1).unwrap();
    let started = CancellationToken::new();
    let release = CancellationToken::new();
    let blocker = {
      let started = started.clone();
      let release = release.clone();
      pool
        .submit(move || {
          started.cancel();
          block_on(release.cancelled());
        })
        .unwrap()
    };
    let queued = pool.submit(|| 5).unwrap();
    block_on(started.cancelled());
    drop(pool);
    release.cancel();

    blocker.result().unwrap();
    assert!(queued.result().unwrap_err().is_pool_stopped());
  }
}
