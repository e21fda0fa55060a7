//! Worker thread pool for running scheduled mailboxes.
//!
//! Workers pull boxed tasks from a shared channel. A panic escaping a task is
//! caught, logged and counted; the worker keeps going.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, trace};
use std::any::Any;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use troupe_core::error::DispatchError;

/// Error when submitting a task to the thread pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThreadPoolError {
    /// The thread pool is shutting down
    #[error("thread pool is shutting down")]
    ShuttingDown,

    /// The task queue is full
    #[error("thread pool queue is full")]
    QueueFull,

    /// A worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

impl From<ThreadPoolError> for DispatchError {
    fn from(error: ThreadPoolError) -> Self {
        match error {
            ThreadPoolError::QueueFull => DispatchError::QueueFull,
            ThreadPoolError::ShuttingDown | ThreadPoolError::Spawn(_) => {
                DispatchError::ShuttingDown
            }
        }
    }
}

/// Statistics about the thread pool
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThreadPoolStats {
    /// Number of tasks queued
    pub tasks_queued: usize,

    /// Number of tasks completed
    pub tasks_completed: usize,

    /// Number of tasks that panicked
    pub tasks_panicked: usize,

    /// Total task execution time (microseconds)
    pub total_execution_time_us: u64,

    /// Queue wait time (microseconds)
    pub total_queue_time_us: u64,

    /// Maximum task execution time (microseconds)
    pub max_execution_time_us: u64,
}

/// Configuration for the thread pool
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Maximum size of the task queue; `None` means unbounded
    pub queue_size: Option<usize>,

    /// Number of worker threads
    pub max_threads: usize,

    /// Name prefix for worker threads
    pub thread_name_prefix: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            queue_size: None,
            max_threads: num_cpus::get(),
            thread_name_prefix: "troupe-dispatcher".to_string(),
        }
    }
}

/// Task with metadata for tracking
pub(crate) struct Task {
    func: Box<dyn FnOnce() + Send + 'static>,
    enqueued_at: Instant,
}

impl Task {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Box::new(f),
            enqueued_at: Instant::now(),
        }
    }

    /// Run the task, catching a panic. Returns false if it panicked.
    pub(crate) fn run(self, counters: &PoolCounters, worker: &str) -> bool {
        let queue_time = self.enqueued_at.elapsed();
        counters
            .total_queue_time_us
            .fetch_add(queue_time.as_micros() as u64, Ordering::Relaxed);

        trace!(
            "{}: executing task (queue time: {:.2}ms)",
            worker,
            queue_time.as_micros() as f64 / 1000.0
        );

        let exec_start = Instant::now();
        let func = self.func;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(func));
        let exec_time_us = exec_start.elapsed().as_micros() as u64;

        counters
            .total_execution_time_us
            .fetch_add(exec_time_us, Ordering::Relaxed);
        counters
            .max_execution_time_us
            .fetch_max(exec_time_us, Ordering::Relaxed);

        match result {
            Ok(()) => {
                counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(payload) => {
                error!("{}: task panicked: {}", worker, panic_message(&*payload));
                counters.tasks_panicked.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<unknown panic>".to_string()
    }
}

/// Counters shared between the pool handle and its workers
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    tasks_queued: AtomicUsize,
    tasks_completed: AtomicUsize,
    tasks_panicked: AtomicUsize,
    total_execution_time_us: AtomicU64,
    total_queue_time_us: AtomicU64,
    max_execution_time_us: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn record_queued(&self) {
        self.tasks_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ThreadPoolStats {
        ThreadPoolStats {
            tasks_queued: self.tasks_queued.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            total_execution_time_us: self.total_execution_time_us.load(Ordering::Relaxed),
            total_queue_time_us: self.total_queue_time_us.load(Ordering::Relaxed),
            max_execution_time_us: self.max_execution_time_us.load(Ordering::Relaxed),
        }
    }
}

/// A fixed-size pool of named worker threads
pub struct ThreadPool {
    /// Channel for sending tasks to worker threads
    task_sender: Sender<Task>,

    /// Worker threads
    workers: Vec<JoinHandle<()>>,

    /// Flag indicating if the pool is shutting down
    is_shutting_down: Arc<AtomicBool>,

    /// Statistics counters
    counters: Arc<PoolCounters>,
}

impl ThreadPool {
    /// Create a new thread pool with `threads` workers and an unbounded queue
    pub fn new(threads: usize) -> Result<Self, ThreadPoolError> {
        let config = ThreadPoolConfig {
            max_threads: threads,
            ..Default::default()
        };
        Self::with_config(config)
    }

    /// Create a new thread pool with the specified configuration
    pub fn with_config(config: ThreadPoolConfig) -> Result<Self, ThreadPoolError> {
        let (task_sender, task_receiver) = match config.queue_size {
            Some(size) => bounded(size),
            None => unbounded(),
        };
        let is_shutting_down = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(PoolCounters::default());

        info!(
            "Creating thread pool with {} workers and queue size {}",
            config.max_threads,
            config
                .queue_size
                .map_or_else(|| "unbounded".to_string(), |s| s.to_string())
        );

        let mut pool = Self {
            task_sender,
            workers: Vec::with_capacity(config.max_threads),
            is_shutting_down,
            counters,
        };

        for id in 0..config.max_threads {
            let thread_name = format!("{}-{}", config.thread_name_prefix, id);
            let receiver = task_receiver.clone();
            let shutdown_flag = Arc::clone(&pool.is_shutting_down);
            let counters = Arc::clone(&pool.counters);

            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || Self::worker_loop(&thread_name, receiver, shutdown_flag, counters))
                // Dropping `pool` here stops the workers already spawned.
                .map_err(|e| ThreadPoolError::Spawn(e.to_string()))?;

            pool.workers.push(handle);
        }

        Ok(pool)
    }

    /// Worker thread main loop
    fn worker_loop(
        name: &str,
        receiver: Receiver<Task>,
        shutdown_flag: Arc<AtomicBool>,
        counters: Arc<PoolCounters>,
    ) {
        debug!("{}: starting", name);

        while !shutdown_flag.load(Ordering::Relaxed) {
            // Wait for a task or check shutdown flag every 100ms
            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(task) => {
                    task.run(&counters, name);
                }
                Err(_) => {
                    if shutdown_flag.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
        }

        debug!("{}: shutting down", name);
    }

    /// Submit a task to be executed by the thread pool
    pub fn execute<F>(&self, f: F) -> Result<(), ThreadPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutting_down.load(Ordering::Relaxed) {
            return Err(ThreadPoolError::ShuttingDown);
        }

        match self.task_sender.try_send(Task::new(f)) {
            Ok(_) => {
                self.counters.record_queued();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(ThreadPoolError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(ThreadPoolError::ShuttingDown),
        }
    }

    /// Get current statistics for the thread pool
    pub fn get_stats(&self) -> ThreadPoolStats {
        self.counters.snapshot()
    }

    /// Stop accepting tasks; workers exit at their next poll
    pub fn shutdown(&self) {
        if !self.is_shutting_down.swap(true, Ordering::Relaxed) {
            info!("Shutting down thread pool");
        }
    }

    /// Shut down the thread pool and wait for workers to finish
    pub fn shutdown_and_join(mut self) {
        self.shutdown();

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // A worker dropping the last handle to the pool cannot join itself.
            if worker.thread().id() == current {
                continue;
            }
            worker.join().unwrap_or_else(|e| {
                error!("Worker thread panicked during shutdown: {:?}", e);
            });
        }

        info!("Thread pool shutdown complete");
    }

    /// Get the number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Check if the thread pool is shutting down
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Relaxed)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
        debug!("Thread pool dropped - workers will exit when they next check the shutdown flag");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_thread_pool_multiple_tasks() {
        let pool = ThreadPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = bounded(10);

        for _ in 0..10 {
            let counter = counter.clone();
            let done_tx = done_tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                done_tx.send(()).unwrap();
            })
            .unwrap();
        }

        for _ in 0..10 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.worker_count(), 2);
    }

    #[test]
    fn test_thread_pool_panic_handling() {
        let pool = ThreadPool::new(1).unwrap();
        let (done_tx, done_rx) = bounded(1);

        pool.execute(|| {
            panic!("This task should panic");
        })
        .unwrap();

        // The same single worker must survive and run the next task
        pool.execute(move || {
            done_tx.send(()).unwrap();
        })
        .unwrap();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        thread::sleep(Duration::from_millis(20));

        let stats = pool.get_stats();
        assert_eq!(stats.tasks_queued, 2);
        assert_eq!(stats.tasks_panicked, 1);
        assert_eq!(stats.tasks_completed, 1);
    }

    #[test]
    fn test_thread_pool_shutdown_rejects_tasks() {
        let pool = ThreadPool::new(2).unwrap();
        pool.shutdown();
        assert!(pool.is_shutting_down());

        let result = pool.execute(|| {});
        assert_eq!(result, Err(ThreadPoolError::ShuttingDown));
        assert_eq!(
            DispatchError::from(result.unwrap_err()),
            DispatchError::ShuttingDown
        );

        pool.shutdown_and_join();
    }

    #[test]
    fn test_thread_pool_queue_full() {
        let config = ThreadPoolConfig {
            queue_size: Some(1),
            max_threads: 1,
            thread_name_prefix: "test".to_string(),
        };
        let pool = ThreadPool::with_config(config).unwrap();

        let barrier = Arc::new(Mutex::new(()));
        let lock = barrier.lock().unwrap();
        let (started_tx, started_rx) = bounded(1);

        let barrier_clone = barrier.clone();
        pool.execute(move || {
            started_tx.send(()).unwrap();
            let _lock = barrier_clone.lock().unwrap();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Fill the queue
        pool.execute(|| {}).unwrap();

        let result = pool.execute(|| {});
        assert_eq!(result, Err(ThreadPoolError::QueueFull));

        drop(lock);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "<unknown panic>");
    }
}
