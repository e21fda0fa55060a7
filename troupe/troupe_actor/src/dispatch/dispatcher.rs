//! Mailbox scheduling.
//!
//! The dispatcher guarantees that a mailbox runs on at most one thread at a
//! time: a task is only submitted by whoever flips the mailbox's scheduled
//! bit, and the bit is only cleared once the run has finished.

use std::sync::Arc;

use log::{debug, error, trace};
use troupe_core::error::DispatchError;

use crate::mailbox::{Mailbox, MessageInvoker, RunLimits};
use crate::pool::ThreadPoolStats;

use super::executor::Executor;

/// Anything owning a mailbox the dispatcher can run.
pub trait Schedulable: MessageInvoker + Send + Sync + 'static {
    /// The mailbox to run.
    fn mailbox(&self) -> &Mailbox;
}

/// Schedules mailboxes onto an executor.
pub struct Dispatcher {
    executor: Executor,
    limits: RunLimits,
}

/// Clears the scheduled bit after a run, even if the run unwinds, and
/// re-registers the mailbox to pick up messages that arrived meanwhile.
struct RunGuard<T: Schedulable> {
    dispatcher: Arc<Dispatcher>,
    target: Arc<T>,
}

impl<T: Schedulable> Drop for RunGuard<T> {
    fn drop(&mut self) {
        self.target.mailbox().set_as_idle();
        self.dispatcher
            .register_for_execution(&self.target, false, false);
    }
}

impl Dispatcher {
    /// Create a dispatcher running mailboxes on `executor`.
    pub fn new(executor: Executor, limits: RunLimits) -> Self {
        Self { executor, limits }
    }

    /// Per-run limits applied to every mailbox.
    pub fn limits(&self) -> &RunLimits {
        &self.limits
    }

    /// Schedule `target`'s mailbox if it has work and is not already
    /// scheduled. Returns true if a run was submitted.
    pub fn register_for_execution<T: Schedulable>(
        self: &Arc<Self>,
        target: &Arc<T>,
        has_message_hint: bool,
        has_system_message_hint: bool,
    ) -> bool {
        let mailbox = target.mailbox();
        if !mailbox.can_be_scheduled_for_execution(has_message_hint, has_system_message_hint) {
            return false;
        }
        if !mailbox.set_as_scheduled() {
            return false;
        }

        trace!("Scheduling mailbox run");
        match self.submit(target) {
            Ok(()) => true,
            Err(_) => match self.submit(target) {
                Ok(()) => true,
                Err(e) => {
                    mailbox.set_as_idle();
                    match e {
                        DispatchError::ShuttingDown => {
                            debug!("Mailbox run rejected, dispatcher is shutting down")
                        }
                        DispatchError::QueueFull => {
                            error!("Mailbox run rejected twice: {}", e)
                        }
                    }
                    false
                }
            },
        }
    }

    fn submit<T: Schedulable>(self: &Arc<Self>, target: &Arc<T>) -> Result<(), DispatchError> {
        let dispatcher = Arc::clone(self);
        let target = Arc::clone(target);
        // The guard only exists once the task runs; a rejected or discarded
        // task must not re-register.
        self.executor.execute(move || {
            let guard = RunGuard { dispatcher, target };
            let limits = guard.dispatcher.limits;
            guard.target.mailbox().run(&*guard.target, &limits);
        })
    }

    /// Run queued work on the calling thread until none is left. Only does
    /// anything for the calling-thread executor.
    pub fn run_until_idle(&self) -> usize {
        self.executor.run_until_idle()
    }

    /// Stop accepting runs.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }

    /// Executor statistics.
    pub fn stats(&self) -> ThreadPoolStats {
        self.executor.stats()
    }
}
