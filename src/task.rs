use crate::error::PoolError;
use crate::task_queue::{Action, Dispatcher};

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use futures::executor::block_on;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The deferred computation a task runs at most once.
pub(crate) type Computation<T> = Box<dyn FnOnce() -> Result<T, PoolError> + Send + 'static>;

// Who has claimed the right to resolve the task.
const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const ABANDONED: u8 = 2;

/// Single-assignment cell holding a task's outcome, with a signal raised once
/// the outcome is published.
pub(crate) struct OutcomeCell<T> {
  outcome: Mutex<Option<Result<T, PoolError>>>,
  available: CancellationToken,
}

impl<T: Clone> OutcomeCell<T> {
  fn new() -> Self {
    Self {
      outcome: Mutex::new(None),
      available: CancellationToken::new(),
    }
  }

  /// Stores the outcome unless one was already published.
  fn publish(&self, outcome: Result<T, PoolError>) -> bool {
    let mut slot = self.outcome.lock();
    if slot.is_some() {
      return false;
    }
    *slot = Some(outcome);
    drop(slot);
    self.available.cancel();
    true
  }

  fn is_available(&self) -> bool {
    self.available.is_cancelled()
  }

  fn peek(&self) -> Option<Result<T, PoolError>> {
    if !self.is_available() {
      return None;
    }
    self.outcome.lock().clone()
  }

  /// Blocks until an outcome is published and returns a copy of it.
  fn wait(&self) -> Result<T, PoolError> {
    if !self.is_available() {
      block_on(self.available.cancelled());
    }
    self.peek().unwrap_or(Err(PoolError::PoolStopped))
  }
}

struct TaskState<T> {
  computation: Option<Computation<T>>,
  continuations: VecDeque<Action>,
}

impl<T> Drop for TaskState<T> {
  fn drop(&mut self) {
    if !self.continuations.is_empty() {
      drop_continuations(std::mem::take(&mut self.continuations));
    }
  }
}

thread_local! {
  static DEFERRED_CONTINUATIONS: RefCell<Option<Vec<Action>>> = const { RefCell::new(None) };
}

/// Drops continuations that will never run.
///
/// Each continuation owns its own pending continuations, so dropping a chain
/// naively recurses once per link. A drop nested inside another hands its
/// continuations to the outermost call on this thread, which drops them in a loop.
fn drop_continuations(continuations: VecDeque<Action>) {
  let outermost = DEFERRED_CONTINUATIONS.try_with(|deferred| {
    let mut deferred = deferred.borrow_mut();
    match deferred.as_mut() {
      Some(pending) => {
        pending.extend(continuations);
        None
      }
      None => {
        *deferred = Some(Vec::new());
        Some(continuations)
      }
    }
  });

  let continuations = match outermost {
    Ok(Some(continuations)) => continuations,
    Ok(None) => return,
    // Thread-local storage is being torn down; fall back to a plain drop.
    Err(_) => return,
  };

  drop(continuations);
  loop {
    let next = DEFERRED_CONTINUATIONS.with(|deferred| deferred.borrow_mut().as_mut().and_then(Vec::pop));
    match next {
      Some(action) => drop(action),
      None => break,
    }
  }
  DEFERRED_CONTINUATIONS.with(|deferred| *deferred.borrow_mut() = None);
}

/// Shared state behind a [`Task`](crate::Task) handle.
pub(crate) struct TaskCore<T> {
  task_id: u64,
  phase: AtomicU8,
  state: Mutex<TaskState<T>>,
  outcome: Arc<OutcomeCell<T>>,
  dispatcher: Arc<Dispatcher>,
}

impl<T: Clone + Send + 'static> TaskCore<T> {
  pub(crate) fn new(computation: Computation<T>, dispatcher: Arc<Dispatcher>) -> Arc<Self> {
    Arc::new(Self {
      task_id: NEXT_TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
      phase: AtomicU8::new(PENDING),
      state: Mutex::new(TaskState {
        computation: Some(computation),
        continuations: VecDeque::new(),
      }),
      outcome: Arc::new(OutcomeCell::new()),
      dispatcher,
    })
  }

  pub(crate) fn id(&self) -> u64 {
    self.task_id
  }

  pub(crate) fn is_completed(&self) -> bool {
    self.outcome.is_available()
  }

  /// Wraps this task's execution into a queue action.
  pub(crate) fn into_action(self: Arc<Self>) -> Action {
    Box::new(move || self.execute())
  }

  /// Runs the computation if nobody has claimed the task yet. Invoked by a worker.
  pub(crate) fn execute(&self) {
    if self
      .phase
      .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      trace!(pool_name = %self.dispatcher.pool_name(), task_id = self.task_id, "Task already claimed, skipping execution.");
      return;
    }

    let computation = self.state.lock().computation.take();
    let Some(computation) = computation else {
      return;
    };

    trace!(pool_name = %self.dispatcher.pool_name(), task_id = self.task_id, "Running task computation.");
    let outcome = match panic::catch_unwind(AssertUnwindSafe(computation)) {
      Ok(outcome) => outcome,
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        error!(pool_name = %self.dispatcher.pool_name(), task_id = self.task_id, "Task computation panicked: {}", message);
        Err(PoolError::TaskPanicked(message))
      }
    };
    self.complete(outcome);
  }

  /// Records the outcome and drains the pending continuations into the pool.
  ///
  /// Runs under the same lock as `continue_with`, so a continuation is either
  /// queued here or dispatched directly by its registration.
  fn complete(&self, outcome: Result<T, PoolError>) {
    let mut state = self.state.lock();
    state.computation = None;
    if !self.outcome.publish(outcome) {
      return;
    }
    debug!(
      pool_name = %self.dispatcher.pool_name(),
      task_id = self.task_id,
      continuations = state.continuations.len(),
      "Task completed."
    );

    while let Some(action) = state.continuations.pop_front() {
      if !self.dispatcher.try_enqueue(action) {
        let dropped = state.continuations.len() + 1;
        drop_continuations(std::mem::take(&mut state.continuations));
        warn!(
          pool_name = %self.dispatcher.pool_name(),
          task_id = self.task_id,
          dropped,
          "Pool stopped while dispatching continuations. Remaining continuations dropped."
        );
        break;
      }
    }
  }

  /// Blocks until the task resolves and returns a copy of its outcome.
  pub(crate) fn result(&self) -> Result<T, PoolError> {
    if let Some(outcome) = self.outcome.peek() {
      return outcome;
    }
    self.wait_for_outcome();
    self.outcome.wait()
  }

  pub(crate) fn try_result(&self) -> Option<Result<T, PoolError>> {
    self.outcome.peek()
  }

  /// Races completion against pool shutdown. A task that has not started by
  /// the time shutdown wins is resolved to `PoolStopped`; a started one is
  /// allowed to finish.
  fn wait_for_outcome(&self) {
    let shutdown_token = self.dispatcher.shutdown_token();
    let preempted = block_on(async {
      tokio::select! {
        biased;
        _ = self.outcome.available.cancelled() => false,
        _ = shutdown_token.cancelled() => true,
      }
    });
    if !preempted {
      return;
    }

    if self
      .phase
      .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      debug!(pool_name = %self.dispatcher.pool_name(), task_id = self.task_id, "Pool stopped before task started. Resolving as stopped.");
      self.complete(Err(PoolError::PoolStopped));
    } else {
      trace!(pool_name = %self.dispatcher.pool_name(), task_id = self.task_id, "Pool stopped while task running. Waiting for its outcome.");
    }
  }

  /// Creates a task that applies `function` to this task's value once it is
  /// available. A failure of this task is propagated without calling `function`.
  pub(crate) fn continue_with<U, F>(&self, function: F) -> Arc<TaskCore<U>>
  where
    U: Clone + Send + 'static,
    F: FnOnce(T) -> Result<U, PoolError> + Send + 'static,
  {
    let antecedent = Arc::clone(&self.outcome);
    let continuation = TaskCore::new(
      Box::new(move || {
        let value = antecedent.wait().map_err(PoolError::antecedent)?;
        function(value)
      }),
      Arc::clone(&self.dispatcher),
    );
    let action = Arc::clone(&continuation).into_action();

    let mut state = self.state.lock();
    if self.outcome.is_available() {
      if !self.dispatcher.try_enqueue(action) {
        warn!(
          pool_name = %self.dispatcher.pool_name(),
          task_id = self.task_id,
          continuation_id = continuation.task_id,
          "Pool stopped. Continuation of completed task not dispatched."
        );
      }
    } else {
      trace!(
        pool_name = %self.dispatcher.pool_name(),
        task_id = self.task_id,
        continuation_id = continuation.task_id,
        "Continuation queued until task completes."
      );
      state.continuations.push_back(action);
    }
    drop(state);

    continuation
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
