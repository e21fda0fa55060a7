//! Executors that run dispatcher tasks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;
use parking_lot::Mutex;
use troupe_core::config::{DispatcherSettings, ExecutorKind};
use troupe_core::error::DispatchError;

use crate::pool::thread::{PoolCounters, Task, ThreadPool, ThreadPoolConfig, ThreadPoolError};
use crate::pool::ThreadPoolStats;

/// Runs tasks on the thread that calls [`CallingThreadExecutor::run_until_idle`].
///
/// Nothing runs in the background, which makes actor scenarios fully
/// deterministic in tests.
#[derive(Default)]
pub struct CallingThreadExecutor {
    tasks: Mutex<VecDeque<Task>>,
    is_shutting_down: AtomicBool,
    counters: PoolCounters,
}

impl CallingThreadExecutor {
    /// Create an empty executor.
    pub fn new() -> Self {
        Self::default()
    }

    fn execute<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutting_down.load(Ordering::Acquire) {
            return Err(DispatchError::ShuttingDown);
        }
        self.tasks.lock().push_back(Task::new(f));
        self.counters.record_queued();
        Ok(())
    }

    /// Run queued tasks, including those they enqueue, until none are left.
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.tasks.lock().pop_front();
            match task {
                Some(task) => {
                    task.run(&self.counters, "calling-thread");
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    fn shutdown(&self) {
        self.is_shutting_down.store(true, Ordering::Release);
        // Drop queued tasks outside the lock; they may own the last handle to
        // an actor whose teardown enqueues more work.
        let abandoned = std::mem::take(&mut *self.tasks.lock());
        drop(abandoned);
    }
}

/// Where dispatcher tasks run.
pub enum Executor {
    /// Background worker threads
    ThreadPool(ThreadPool),
    /// The thread draining the executor
    CallingThread(CallingThreadExecutor),
}

impl Executor {
    /// Build the executor the settings describe.
    pub fn from_settings(settings: &DispatcherSettings) -> Result<Self, ThreadPoolError> {
        match settings.executor {
            ExecutorKind::ThreadPool => {
                let config = ThreadPoolConfig {
                    queue_size: None,
                    max_threads: settings.worker_threads,
                    thread_name_prefix: settings.thread_name_prefix.clone(),
                };
                Ok(Executor::ThreadPool(ThreadPool::with_config(config)?))
            }
            ExecutorKind::CallingThread => {
                info!("Using calling-thread executor");
                Ok(Executor::CallingThread(CallingThreadExecutor::new()))
            }
        }
    }

    /// Submit a task.
    pub fn execute<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Executor::ThreadPool(pool) => pool.execute(f).map_err(DispatchError::from),
            Executor::CallingThread(executor) => executor.execute(f),
        }
    }

    /// Drain queued tasks on the current thread. A no-op for the thread pool.
    pub fn run_until_idle(&self) -> usize {
        match self {
            Executor::ThreadPool(_) => 0,
            Executor::CallingThread(executor) => executor.run_until_idle(),
        }
    }

    /// Stop accepting tasks.
    pub fn shutdown(&self) {
        match self {
            Executor::ThreadPool(pool) => pool.shutdown(),
            Executor::CallingThread(executor) => executor.shutdown(),
        }
    }

    /// Task counters.
    pub fn stats(&self) -> ThreadPoolStats {
        match self {
            Executor::ThreadPool(pool) => pool.get_stats(),
            Executor::CallingThread(executor) => executor.counters.snapshot(),
        }
    }
}
