use std::thread;
use std::time::Duration;

use thread_orchestra::{PoolConfig, Task, ThreadPool};
use tracing::info;

fn work_task_fn(id: usize, duration_ms: u64) -> String {
  info!("Task {} starting (will run for {}ms)", id, duration_ms);
  thread::sleep(Duration::from_millis(duration_ms));
  let result = format!("Task {} finished after {}ms", id, duration_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Graceful Shutdown Example ---");

  let config = PoolConfig::builder()
    .worker_count(2)
    .pool_name("graceful_shutdown_pool")
    .build();
  let pool = ThreadPool::with_config(config).expect("valid pool config");

  let mut tasks: Vec<Task<String>> = Vec::new();

  // Submit 5 tasks, each takes 1 second.
  // With 2 workers, tasks 0 and 1 start and tasks 2, 3, 4 stay queued.
  for i in 0..5 {
    match pool.submit(move || work_task_fn(i, 1000)) {
      Ok(task) => {
        info!("Submitted task {} (task id {})", i, task.id());
        tasks.push(task);
      }
      Err(e) => tracing::error!("Failed to submit task {}: {:?}", i, e),
    }
  }

  thread::sleep(Duration::from_millis(100));
  info!("All 5 tasks submitted. Queued actions: {}", pool.queued_action_count());

  info!("Initiating shutdown. Running tasks finish, queued tasks resolve as stopped.");
  pool.shutdown();
  info!("Shutdown complete.");

  for (i, task) in tasks.iter().enumerate() {
    match task.result() {
      Ok(output) => info!("Task {}: completed with {:?}", i, output),
      Err(e) if e.is_pool_stopped() => info!("Task {}: never started ({})", i, e),
      Err(e) => info!("Task {}: failed with {}", i, e),
    }
  }

  match pool.submit(|| "late".to_string()) {
    Ok(_) => info!("Unexpected: late submission accepted"),
    Err(e) => info!("Late submission rejected as expected: {}", e),
  }
  info!("--- Graceful Shutdown Example End ---");
}
