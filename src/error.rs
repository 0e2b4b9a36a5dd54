use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// A boxed error returned by a fallible computation.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur within the `thread_orchestra` pool.
///
/// Failures recorded on a task are shared by every reader of that task, so the
/// type is cheaply cloneable.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  #[error("Thread pool stopped working")]
  PoolStopped,

  #[error("Task computation failed: {0}")]
  ComputationFailed(#[source] Arc<dyn StdError + Send + Sync + 'static>),

  #[error("Task computation panicked: {0}")]
  TaskPanicked(String),

  /// A continuation's parent failed. `cause` is the failure at the bottom of
  /// the chain and `depth` counts the continuation links above it.
  #[error("Antecedent task failed: {cause}")]
  AntecedentFailed {
    depth: usize,
    #[source]
    cause: Arc<PoolError>,
  },

  #[error("Failed to spawn worker thread: {0}")]
  WorkerSpawn(String),
}

impl PoolError {
  pub(crate) fn computation(err: impl Into<BoxError>) -> Self {
    PoolError::ComputationFailed(Arc::from(err.into()))
  }

  /// Wraps a parent task's failure for a continuation built on top of it.
  /// The root cause is shared, not copied, so re-wrapping is constant time.
  pub(crate) fn antecedent(parent: PoolError) -> Self {
    match parent {
      PoolError::AntecedentFailed { depth, cause } => PoolError::AntecedentFailed { depth: depth + 1, cause },
      root => PoolError::AntecedentFailed {
        depth: 1,
        cause: Arc::new(root),
      },
    }
  }

  /// Returns the innermost failure of a continuation chain.
  pub fn root_cause(&self) -> &PoolError {
    match self {
      PoolError::AntecedentFailed { cause, .. } => &**cause,
      other => other,
    }
  }

  /// `true` if this failure, or the cause at the bottom of its continuation
  /// chain, is a pool shutdown.
  pub fn is_pool_stopped(&self) -> bool {
    matches!(self.root_cause(), PoolError::PoolStopped)
  }

  /// Number of continuation links between this failure and its root cause.
  pub fn chain_depth(&self) -> usize {
    match self {
      PoolError::AntecedentFailed { depth, .. } => *depth,
      _ => 0,
    }
  }
}
