use crate::error::{BoxError, PoolError};
use crate::task::TaskCore;

use std::fmt;
use std::sync::Arc;

/// A handle to a computation submitted to a [`ThreadPool`](crate::ThreadPool).
///
/// Handles are cheap to clone; every clone observes the same outcome. The
/// computation runs at most once no matter how many readers call [`Task::result`].
pub struct Task<T> {
  pub(crate) core: Arc<TaskCore<T>>,
}

impl<T> Clone for Task<T> {
  fn clone(&self) -> Self {
    Self {
      core: Arc::clone(&self.core),
    }
  }
}

impl<T: Clone + Send + 'static> fmt::Debug for Task<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task")
      .field("task_id", &self.core.id())
      .field("completed", &self.core.is_completed())
      .finish()
  }
}

impl<T: Clone + Send + 'static> Task<T> {
  pub(crate) fn new(core: Arc<TaskCore<T>>) -> Self {
    Self { core }
  }

  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.core.id()
  }

  /// `true` once the task has resolved, successfully or not.
  pub fn is_completed(&self) -> bool {
    self.core.is_completed()
  }

  /// Blocks the calling thread until the task resolves and returns its value.
  ///
  /// If the pool is shut down before the task starts running, the task
  /// resolves to `PoolError::PoolStopped`. A task that already started is
  /// allowed to finish and its real outcome is returned.
  ///
  /// Calling this from inside a computation on a pool whose workers are all
  /// busy waiting can deadlock, as with any fixed-size pool.
  ///
  /// # Errors
  /// Returns `PoolError::ComputationFailed` if the computation returned an error.
  /// Returns `PoolError::TaskPanicked` if the computation panicked.
  /// Returns `PoolError::AntecedentFailed` if this is a continuation whose parent failed.
  /// Returns `PoolError::PoolStopped` if shutdown preempted the task.
  ///
  /// # Panics
  /// Waiting parks the thread on `futures::executor::block_on`, which panics
  /// when the calling thread is already running a `futures` executor. Call
  /// [`Task::try_result`] from async code instead. A task that has already
  /// resolved returns without blocking and never panics.
  pub fn result(&self) -> Result<T, PoolError> {
    self.core.result()
  }

  /// Returns the outcome without blocking, or `None` while unresolved.
  pub fn try_result(&self) -> Option<Result<T, PoolError>> {
    self.core.try_result()
  }

  /// Chains `function` onto this task's value. The returned task runs on the
  /// same pool once this one completes; if this task fails, `function` is never
  /// called and the continuation fails with `PoolError::AntecedentFailed`.
  pub fn continue_with<U, F>(&self, function: F) -> Task<U>
  where
    U: Clone + Send + 'static,
    F: FnOnce(T) -> U + Send + 'static,
  {
    Task::new(self.core.continue_with(move |value| Ok(function(value))))
  }

  /// Like [`Task::continue_with`], for a function that can fail.
  pub fn try_continue_with<U, E, F>(&self, function: F) -> Task<U>
  where
    U: Clone + Send + 'static,
    E: Into<BoxError>,
    F: FnOnce(T) -> Result<U, E> + Send + 'static,
  {
    Task::new(self.core.continue_with(move |value| function(value).map_err(PoolError::computation)))
  }
}
