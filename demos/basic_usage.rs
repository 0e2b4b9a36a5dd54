use std::thread;
use std::time::Duration;

use thread_orchestra::{Task, ThreadPool};
use tracing::info;

fn my_task_fn(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let pool = ThreadPool::new(2).expect("pool with two workers");

  let mut tasks: Vec<Task<usize>> = Vec::new();
  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 200 + (i as u64 % 3 * 100);
    match pool.submit(move || my_task_fn(i, sleep_duration)) {
      Ok(task) => {
        info!("Submitted task {} with id {}", i, task.id());
        tasks.push(task.continue_with(|message| message.len()));
      }
      Err(e) => tracing::error!("Failed to submit task {}: {:?}", i, e),
    }
  }

  info!("All tasks submitted. Reading chained results...");

  for task in &tasks {
    match task.result() {
      Ok(length) => info!("Task {} produced a message of {} bytes", task.id(), length),
      Err(e) => info!("Error for task {}: {}", task.id(), e),
    }
  }

  let squared = pool
    .submit(|| 4 + 66)
    .expect("pool is running")
    .continue_with(|a| a * a)
    .continue_with(|b| b.to_string());
  info!("Chained computation produced {:?}", squared.result());

  info!("All task results processed. Shutting down pool.");
  pool.shutdown();
  info!("Pool shutdown complete.");
  info!("--- Basic Usage Example End ---");
}
