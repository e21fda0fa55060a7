//! Actor mailboxes.
//!
//! A mailbox holds two queues: a lock-free system queue for runtime control
//! messages and a pluggable user queue. A single status word tracks whether
//! the mailbox is closed, whether it is scheduled on a worker, and how many
//! times it has been suspended.
//!
//! The mailbox knows nothing about scheduling. [`Mailbox::run`] is called by
//! the dispatcher on exactly one thread at a time and hands each message back
//! to its owner through [`MessageInvoker`].

pub mod queue;
mod system_queue;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use troupe_core::config::DispatcherSettings;

use crate::message::{Envelope, SystemMessage};
use system_queue::SystemQueue;

pub use queue::{
    BoundedQueue, MailboxError, MailboxType, MessageQueue, PriorityFn, PriorityQueue,
    UnboundedQueue,
};

const CLOSED: u32 = 1;
const SCHEDULED: u32 = 2;
const SUSPEND_UNIT: u32 = 4;
const SUSPEND_MASK: u32 = !(CLOSED | SCHEDULED);

/// Callbacks from a running mailbox into the actor that owns it.
pub trait MessageInvoker {
    /// Process one user message.
    fn invoke(&self, envelope: Envelope);

    /// Process one system message.
    fn system_invoke(&self, message: SystemMessage);

    /// Route a user message that can no longer be delivered.
    fn dead_letter(&self, envelope: Envelope);

    /// Route a system message that can no longer be delivered.
    fn dead_letter_system(&self, message: SystemMessage);
}

/// Per-run processing limits, taken from the dispatcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Maximum number of user messages per run
    pub throughput: usize,
    /// Optional time budget per run
    pub deadline: Option<Duration>,
    /// Maximum number of system messages drained after the entry batch
    pub system_message_limit: usize,
}

impl RunLimits {
    /// Limits described by the dispatcher settings.
    pub fn from_settings(settings: &DispatcherSettings) -> Self {
        Self {
            throughput: settings.throughput.max(1),
            deadline: settings.throughput_deadline(),
            system_message_limit: settings.system_message_limit.max(1),
        }
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self::from_settings(&DispatcherSettings::default())
    }
}

/// The message store of one actor.
pub struct Mailbox {
    status: AtomicU32,
    system_queue: SystemQueue<SystemMessage>,
    queue: Box<dyn MessageQueue>,
}

impl Mailbox {
    /// Create an open, idle mailbox around `queue`.
    pub fn new(queue: Box<dyn MessageQueue>) -> Self {
        Self {
            status: AtomicU32::new(0),
            system_queue: SystemQueue::new(),
            queue,
        }
    }

    /// Create a mailbox with the queue implementation `kind` selects.
    pub fn of_type(kind: &MailboxType) -> Self {
        Self::new(kind.create())
    }

    fn status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    /// Whether the owning actor has terminated.
    pub fn is_closed(&self) -> bool {
        self.status() & CLOSED != 0
    }

    /// Whether user message processing is paused.
    pub fn is_suspended(&self) -> bool {
        self.status() & SUSPEND_MASK != 0
    }

    /// Whether a worker currently owns this mailbox.
    pub fn is_scheduled(&self) -> bool {
        self.status() & SCHEDULED != 0
    }

    /// Current suspend depth.
    pub fn suspend_count(&self) -> u32 {
        self.status() / SUSPEND_UNIT
    }

    fn update_status<F>(&self, f: F) -> Option<u32>
    where
        F: Fn(u32) -> Option<u32>,
    {
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, f)
            .ok()
    }

    /// Increment the suspend counter. Returns true if the mailbox went from
    /// running to suspended.
    pub fn suspend(&self) -> bool {
        self.update_status(|s| (s & CLOSED == 0).then_some(s + SUSPEND_UNIT))
            .is_some_and(|previous| previous & SUSPEND_MASK == 0)
    }

    /// Decrement the suspend counter. Returns true if the mailbox is no
    /// longer suspended afterwards.
    pub fn resume(&self) -> bool {
        match self.update_status(|s| {
            if s & CLOSED != 0 {
                None
            } else if s & SUSPEND_MASK == 0 {
                Some(s)
            } else {
                Some(s - SUSPEND_UNIT)
            }
        }) {
            Some(previous) => previous & SUSPEND_MASK <= SUSPEND_UNIT,
            None => false,
        }
    }

    /// Close the mailbox for good. Returns false if it was already closed.
    pub fn become_closed(&self) -> bool {
        self.status.fetch_or(CLOSED, Ordering::AcqRel) & CLOSED == 0
    }

    /// Claim the mailbox for a worker. Fails if it is closed or already
    /// scheduled.
    pub fn set_as_scheduled(&self) -> bool {
        self.update_status(|s| (s & (CLOSED | SCHEDULED) == 0).then_some(s | SCHEDULED))
            .is_some()
    }

    /// Release the worker claim.
    pub fn set_as_idle(&self) {
        self.status.fetch_and(!SCHEDULED, Ordering::AcqRel);
    }

    /// Whether running the mailbox now would do any work.
    ///
    /// A suspended mailbox only qualifies for pending system messages.
    pub fn can_be_scheduled_for_execution(
        &self,
        has_message_hint: bool,
        has_system_message_hint: bool,
    ) -> bool {
        let status = self.status();
        if status & CLOSED != 0 {
            false
        } else if status & SUSPEND_MASK != 0 {
            has_system_message_hint || self.has_system_messages()
        } else {
            has_message_hint
                || has_system_message_hint
                || self.has_system_messages()
                || self.has_messages()
        }
    }

    fn should_process_message(&self) -> bool {
        self.status() & (CLOSED | SUSPEND_MASK) == 0
    }

    /// Queue a user message.
    pub fn enqueue_user(&self, envelope: Envelope) -> Result<(), MailboxError> {
        if self.is_closed() {
            return Err(MailboxError::Closed(envelope));
        }
        self.queue.enqueue(envelope)
    }

    /// Queue a system message. Never blocks; only fails once closed.
    pub fn enqueue_system(&self, message: SystemMessage) -> Result<(), SystemMessage> {
        if self.is_closed() {
            return Err(message);
        }
        self.system_queue.push(message);
        Ok(())
    }

    /// Whether any user message is queued.
    pub fn has_messages(&self) -> bool {
        self.queue.has_messages()
    }

    /// Number of queued user messages.
    pub fn number_of_messages(&self) -> usize {
        self.queue.number_of_messages()
    }

    /// Whether any system message is queued.
    pub fn has_system_messages(&self) -> bool {
        !self.system_queue.is_empty()
    }

    /// Process queued messages: every pending system message first, then up
    /// to `limits.throughput` user messages, draining system messages again
    /// after each one.
    ///
    /// Must only be called by the worker that won [`Mailbox::set_as_scheduled`].
    /// Leaves the scheduled flag set; the dispatcher clears it.
    pub fn run<I>(&self, invoker: &I, limits: &RunLimits)
    where
        I: MessageInvoker + ?Sized,
    {
        if self.is_closed() {
            return;
        }

        // The batch already waiting at entry is not charged to the limit.
        let entry = self.system_queue.take_all();
        self.process_system_batch(invoker, entry);

        let mut budget = limits.system_message_limit;
        if !self.drain_system_messages(invoker, &mut budget) {
            return;
        }
        self.process_user_messages(invoker, limits, &mut budget);
    }

    /// Drain system messages until none are left. Returns false if the
    /// budget ran out with messages still pending.
    fn drain_system_messages<I>(&self, invoker: &I, budget: &mut usize) -> bool
    where
        I: MessageInvoker + ?Sized,
    {
        while !self.system_queue.is_empty() {
            if *budget == 0 || self.is_closed() {
                return false;
            }
            let batch = self.system_queue.take_all();
            *budget = budget.saturating_sub(batch.len());
            self.process_system_batch(invoker, batch);
        }
        true
    }

    fn process_system_batch<I>(&self, invoker: &I, batch: Vec<SystemMessage>)
    where
        I: MessageInvoker + ?Sized,
    {
        let mut batch = batch.into_iter();
        for message in batch.by_ref() {
            invoker.system_invoke(message);
            if self.is_closed() {
                break;
            }
        }
        for message in batch {
            invoker.dead_letter_system(message);
        }
    }

    fn process_user_messages<I>(&self, invoker: &I, limits: &RunLimits, budget: &mut usize)
    where
        I: MessageInvoker + ?Sized,
    {
        let deadline = limits.deadline.map(|d| Instant::now() + d);
        let mut left = limits.throughput;

        while left > 0 && self.should_process_message() {
            let Some(envelope) = self.queue.dequeue() else {
                break;
            };
            invoker.invoke(envelope);
            if !self.drain_system_messages(invoker, budget) {
                break;
            }
            left -= 1;
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
        }
    }

    /// Flush everything still queued to dead letters.
    ///
    /// Called once the mailbox is closed, by the terminating actor and by
    /// senders whose message landed after the close.
    pub fn clean_up<I>(&self, invoker: &I)
    where
        I: MessageInvoker + ?Sized,
    {
        for message in self.system_queue.take_all() {
            invoker.dead_letter_system(message);
        }
        while let Some(envelope) = self.queue.dequeue() {
            invoker.dead_letter(envelope);
        }
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("closed", &self.is_closed())
            .field("scheduled", &self.is_scheduled())
            .field("suspend_count", &self.suspend_count())
            .field("messages", &self.number_of_messages())
            .finish()
    }
}
