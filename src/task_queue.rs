use std::fmt;
use std::sync::Arc;

use kanal::{Receiver, Sender};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A unit of ready-to-run work handed to a worker thread.
pub(crate) type Action = Box<dyn FnOnce() + Send + 'static>;

/// The shared, unbounded, multi-producer multi-consumer queue of ready actions.
pub(crate) struct ActionQueue {
  tx: Sender<Action>,
  rx: Receiver<Action>,
}

impl ActionQueue {
  pub(crate) fn new() -> Self {
    let (tx, rx) = kanal::unbounded();
    Self { tx, rx }
  }

  /// Splits the queue into the dispatching side, shared by the pool and every
  /// task, and the consuming side, cloned once per worker.
  pub(crate) fn split(self, pool_name: Arc<String>, shutdown_token: CancellationToken) -> (Arc<Dispatcher>, QueueConsumer) {
    (
      Arc::new(Dispatcher {
        pool_name,
        tx: Mutex::new(Some(self.tx)),
        shutdown_token,
      }),
      QueueConsumer { rx: self.rx },
    )
  }
}

/// The producer side of the action queue.
///
/// The sender sits behind a lock that is also held while the cancellation
/// signal is raised, so an enqueue either lands before the stop or is rejected.
pub(crate) struct Dispatcher {
  pool_name: Arc<String>,
  tx: Mutex<Option<Sender<Action>>>,
  shutdown_token: CancellationToken,
}

impl fmt::Debug for Dispatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dispatcher")
      .field("pool_name", &self.pool_name)
      .field("queued", &self.len())
      .field("stopped", &self.is_stopped())
      .finish()
  }
}

impl Dispatcher {
  pub(crate) fn pool_name(&self) -> &str {
    &self.pool_name
  }

  pub(crate) fn shutdown_token(&self) -> &CancellationToken {
    &self.shutdown_token
  }

  pub(crate) fn is_stopped(&self) -> bool {
    self.shutdown_token.is_cancelled()
  }

  /// Adds an action to the queue. Returns `false` if the pool has been stopped.
  pub(crate) fn try_enqueue(&self, action: Action) -> bool {
    let guard = self.tx.lock();
    if self.shutdown_token.is_cancelled() {
      return false;
    }
    match guard.as_ref() {
      Some(tx) => tx.send(action).is_ok(),
      None => false,
    }
  }

  /// Raises the cancellation signal and closes the queue to new entries.
  /// Actions still waiting in the queue are discarded.
  ///
  /// Returns `true` only for the call that actually stopped the queue.
  pub(crate) fn close(&self) -> bool {
    let mut guard = self.tx.lock();
    let first_close = !self.shutdown_token.is_cancelled();
    self.shutdown_token.cancel();
    if let Some(tx) = guard.take() {
      trace!(pool_name = %*self.pool_name, pending = tx.len(), "Closing action queue.");
      let _ = tx.close();
    }
    first_close
  }

  /// Number of actions waiting for a worker.
  pub(crate) fn len(&self) -> usize {
    self.tx.lock().as_ref().map_or(0, |tx| tx.len())
  }
}

/// The consumer side of the action queue. Each worker owns a clone.
#[derive(Clone)]
pub(crate) struct QueueConsumer {
  rx: Receiver<Action>,
}

impl QueueConsumer {
  /// Blocks until an action is available. Returns `None` once the queue is closed.
  pub(crate) fn recv(&self) -> Option<Action> {
    self.rx.recv().ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;
  use std::time::Duration;

  fn queue() -> (Arc<Dispatcher>, QueueConsumer) {
    ActionQueue::new().split(Arc::new("test_queue".to_string()), CancellationToken::new())
  }

  fn counting_action(counter: &Arc<AtomicUsize>) -> Action {
    let counter = counter.clone();
    Box::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    })
  }

  #[test]
  fn test_enqueue_and_recv() {
    let (dispatcher, consumer) = queue();
    let counter = Arc::new(AtomicUsize::new(0));

    assert!(dispatcher.try_enqueue(counting_action(&counter)));
    assert_eq!(dispatcher.len(), 1);

    let action = consumer.recv().expect("queued action");
    assert_eq!(dispatcher.len(), 0);
    action();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_enqueue_rejected_after_close() {
    let (dispatcher, _consumer) = queue();
    let counter = Arc::new(AtomicUsize::new(0));

    assert!(dispatcher.close());
    assert!(dispatcher.is_stopped());
    assert!(dispatcher.shutdown_token().is_cancelled());
    assert!(!dispatcher.try_enqueue(counting_action(&counter)));
    assert_eq!(dispatcher.len(), 0);

    // Second close observes the already-stopped queue.
    assert!(!dispatcher.close());
  }

  #[test]
  fn test_close_wakes_blocked_consumer() {
    let (dispatcher, consumer) = queue();

    let waiter = thread::spawn(move || consumer.recv().is_none());
    thread::sleep(Duration::from_millis(50));
    dispatcher.close();

    assert!(waiter.join().unwrap(), "blocked consumer should observe the closed queue");
  }

  #[test]
  fn test_concurrent_producers_and_consumers() {
    let (dispatcher, consumer) = queue();
    let counter = Arc::new(AtomicUsize::new(0));
    let per_producer = 50;

    let producers: Vec<_> = (0..4)
      .map(|_| {
        let dispatcher = dispatcher.clone();
        let counter = counter.clone();
        thread::spawn(move || {
          for _ in 0..per_producer {
            assert!(dispatcher.try_enqueue(counting_action(&counter)));
          }
        })
      })
      .collect();
    for producer in producers {
      producer.join().unwrap();
    }

    let consumers: Vec<_> = (0..2)
      .map(|_| {
        let consumer = consumer.clone();
        thread::spawn(move || {
          while let Some(action) = consumer.recv() {
            action();
          }
        })
      })
      .collect();

    let total = 4 * per_producer;
    for _ in 0..500 {
      if counter.load(Ordering::SeqCst) == total {
        break;
      }
      thread::sleep(Duration::from_millis(10));
    }
    dispatcher.close();
    for c in consumers {
      c.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), total);
  }
}
