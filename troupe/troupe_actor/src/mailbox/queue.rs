//! User message queues.
//!
//! Every mailbox owns one [`MessageQueue`]. The default is an unbounded FIFO;
//! bounded and priority queues are selected per actor through
//! [`MailboxType`].

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use thiserror::Error;
use troupe_core::config::{MailboxKind, MailboxSettings};

use crate::message::Envelope;

/// Error when enqueueing a user message.
///
/// The rejected envelope is handed back so the caller can route it to dead
/// letters.
#[derive(Error, Debug)]
pub enum MailboxError {
    /// The queue is full (bounded capacity reached)
    #[error("mailbox is full")]
    Full(Envelope),
    /// The mailbox has been closed because its actor terminated
    #[error("mailbox is closed")]
    Closed(Envelope),
}

impl MailboxError {
    /// Recover the rejected envelope.
    pub fn into_envelope(self) -> Envelope {
        match self {
            MailboxError::Full(envelope) | MailboxError::Closed(envelope) => envelope,
        }
    }
}

/// Storage for user messages.
///
/// Implementations must be safe for many concurrent producers. Dequeue is
/// called by the thread running the mailbox, and also by senders racing a
/// close when they flush late messages to dead letters.
pub trait MessageQueue: Send + Sync {
    /// Add a message, or hand it back if the queue cannot take it.
    fn enqueue(&self, envelope: Envelope) -> Result<(), MailboxError>;

    /// Take the next message.
    fn dequeue(&self) -> Option<Envelope>;

    /// Number of queued messages.
    fn number_of_messages(&self) -> usize;

    /// Whether any message is queued.
    fn has_messages(&self) -> bool {
        self.number_of_messages() > 0
    }
}

/// Unbounded FIFO backed by a crossbeam channel.
pub struct UnboundedQueue {
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
}

impl UnboundedQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }
}

impl Default for UnboundedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue for UnboundedQueue {
    fn enqueue(&self, envelope: Envelope) -> Result<(), MailboxError> {
        // Both channel ends live in `self`, so the channel never disconnects.
        self.sender
            .send(envelope)
            .map_err(|e| MailboxError::Closed(e.into_inner()))
    }

    fn dequeue(&self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    fn number_of_messages(&self) -> usize {
        self.receiver.len()
    }

    fn has_messages(&self) -> bool {
        !self.receiver.is_empty()
    }
}

/// FIFO that rejects messages beyond a fixed capacity.
pub struct BoundedQueue {
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
    capacity: usize,
}

impl BoundedQueue {
    /// Create an empty queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl MessageQueue for BoundedQueue {
    fn enqueue(&self, envelope: Envelope) -> Result<(), MailboxError> {
        self.sender.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(envelope) => MailboxError::Full(envelope),
            TrySendError::Disconnected(envelope) => MailboxError::Closed(envelope),
        })
    }

    fn dequeue(&self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    fn number_of_messages(&self) -> usize {
        self.receiver.len()
    }

    fn has_messages(&self) -> bool {
        !self.receiver.is_empty()
    }
}

/// Computes a message's priority; lower values are dequeued first.
pub type PriorityFn = Arc<dyn Fn(&Envelope) -> i32 + Send + Sync>;

struct Prioritized {
    priority: i32,
    sequence: u64,
    envelope: Envelope,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    // BinaryHeap is a max-heap: invert so the lowest priority value, then the
    // oldest sequence number, sits on top.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Unbounded priority queue, FIFO among equal priorities.
pub struct PriorityQueue {
    heap: Mutex<(BinaryHeap<Prioritized>, u64)>,
    priority: PriorityFn,
}

impl PriorityQueue {
    /// Create an empty queue ordered by `priority`.
    pub fn new(priority: PriorityFn) -> Self {
        Self {
            heap: Mutex::new((BinaryHeap::new(), 0)),
            priority,
        }
    }
}

impl MessageQueue for PriorityQueue {
    fn enqueue(&self, envelope: Envelope) -> Result<(), MailboxError> {
        let priority = (self.priority)(&envelope);
        let mut guard = self.heap.lock();
        let (heap, next_sequence) = &mut *guard;
        let sequence = *next_sequence;
        *next_sequence += 1;
        heap.push(Prioritized {
            priority,
            sequence,
            envelope,
        });
        Ok(())
    }

    fn dequeue(&self) -> Option<Envelope> {
        self.heap.lock().0.pop().map(|p| p.envelope)
    }

    fn number_of_messages(&self) -> usize {
        self.heap.lock().0.len()
    }
}

/// Selects the user queue implementation for an actor.
#[derive(Clone)]
pub enum MailboxType {
    /// Unbounded FIFO
    Unbounded,
    /// FIFO holding at most `capacity` messages; overflow goes to dead letters
    Bounded {
        /// Maximum number of queued messages
        capacity: usize,
    },
    /// Unbounded queue ordered by a priority function
    Priority(PriorityFn),
}

impl MailboxType {
    /// The mailbox type described by the system settings.
    pub fn from_settings(settings: &MailboxSettings) -> Self {
        match settings.kind {
            MailboxKind::Unbounded => MailboxType::Unbounded,
            MailboxKind::Bounded => MailboxType::Bounded {
                capacity: settings.capacity,
            },
        }
    }

    /// A priority mailbox using `priority` (lower values first).
    pub fn priority<F>(priority: F) -> Self
    where
        F: Fn(&Envelope) -> i32 + Send + Sync + 'static,
    {
        MailboxType::Priority(Arc::new(priority))
    }

    /// Build a fresh queue of this type.
    pub fn create(&self) -> Box<dyn MessageQueue> {
        match self {
            MailboxType::Unbounded => Box::new(UnboundedQueue::new()),
            MailboxType::Bounded { capacity } => Box::new(BoundedQueue::new(*capacity)),
            MailboxType::Priority(priority) => Box::new(PriorityQueue::new(Arc::clone(priority))),
        }
    }
}

impl fmt::Debug for MailboxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxType::Unbounded => write!(f, "Unbounded"),
            MailboxType::Bounded { capacity } => write!(f, "Bounded({})", capacity),
            MailboxType::Priority(_) => write!(f, "Priority"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(envelope: Envelope) -> u32 {
        *envelope.downcast_ref::<u32>().unwrap()
    }

    #[test]
    fn test_unbounded_queue_is_fifo() {
        let queue = UnboundedQueue::new();
        for i in 0..100u32 {
            queue.enqueue(Envelope::new(i, None)).unwrap();
        }
        assert_eq!(queue.number_of_messages(), 100);
        for i in 0..100u32 {
            assert_eq!(value(queue.dequeue().unwrap()), i);
        }
        assert!(!queue.has_messages());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_bounded_queue_rejects_overflow() {
        let queue = BoundedQueue::new(2);
        assert!(queue.enqueue(Envelope::new(1u32, None)).is_ok());
        assert!(queue.enqueue(Envelope::new(2u32, None)).is_ok());

        let rejected = queue.enqueue(Envelope::new(3u32, None)).unwrap_err();
        assert!(matches!(rejected, MailboxError::Full(_)));
        assert_eq!(value(rejected.into_envelope()), 3);

        assert_eq!(value(queue.dequeue().unwrap()), 1);
        assert!(queue.enqueue(Envelope::new(4u32, None)).is_ok());
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn test_priority_queue_orders_and_keeps_fifo_ties() {
        let queue = PriorityQueue::new(Arc::new(|envelope: &Envelope| {
            match envelope.downcast_ref::<u32>() {
                Some(v) if *v >= 100 => 0,
                _ => 1,
            }
        }));

        for v in [1u32, 100, 2, 101, 3] {
            queue.enqueue(Envelope::new(v, None)).unwrap();
        }

        let order: Vec<u32> = std::iter::from_fn(|| queue.dequeue()).map(value).collect();
        assert_eq!(order, vec![100, 101, 1, 2, 3]);
    }

    #[test]
    fn test_mailbox_type_from_settings() {
        let settings = MailboxSettings {
            kind: MailboxKind::Bounded,
            capacity: 3,
        };
        let queue = MailboxType::from_settings(&settings).create();
        for i in 0..3u32 {
            queue.enqueue(Envelope::new(i, None)).unwrap();
        }
        assert!(queue.enqueue(Envelope::new(9u32, None)).is_err());
    }
}
