//! Dead letters: user messages that could not be delivered.
//!
//! Each system has one office. It counts dead letters, logs the first few
//! and forwards a [`DeadLetter`] record to every subscriber.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::info;
use parking_lot::Mutex;

use super::actor_ref::ActorRef;

/// Why a message ended up as a dead letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    /// The recipient had terminated (or never existed)
    RecipientTerminated,
    /// The recipient's bounded mailbox was full
    MailboxFull,
    /// The recipient passed the message to `Context::unhandled`
    Unhandled,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::RecipientTerminated => write!(f, "recipient terminated"),
            DeadLetterReason::MailboxFull => write!(f, "mailbox full"),
            DeadLetterReason::Unhandled => write!(f, "unhandled"),
        }
    }
}

/// Record of one undeliverable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Intended recipient
    pub recipient: ActorRef,
    /// Sender, if the message was sent from an actor
    pub sender: Option<ActorRef>,
    /// Rust type name of the message
    pub message_type: &'static str,
    /// Why delivery failed
    pub reason: DeadLetterReason,
}

/// Collects dead letters for one actor system.
pub struct DeadLetterOffice {
    count: AtomicUsize,
    log_limit: usize,
    subscribers: Mutex<Vec<Sender<DeadLetter>>>,
}

impl DeadLetterOffice {
    /// Create an office logging at most `log_limit` dead letters.
    pub fn new(log_limit: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            log_limit,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Record a dead letter.
    pub fn publish(&self, letter: DeadLetter) {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if n <= self.log_limit {
            info!(
                "Message [{}] from {} to {} was not delivered ({}). [{}] dead letters encountered{}",
                letter.message_type,
                letter
                    .sender
                    .as_ref()
                    .map_or_else(|| "no sender".to_string(), |s| s.to_string()),
                letter.recipient,
                letter.reason,
                n,
                if n == self.log_limit {
                    ", no more dead letters will be logged"
                } else {
                    ""
                }
            );
        }

        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        // Drop subscribers whose receiver is gone.
        subscribers.retain(|s| s.send(letter.clone()).is_ok());
    }

    /// Receive every dead letter published from now on.
    pub fn subscribe(&self) -> Receiver<DeadLetter> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Number of dead letters so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for DeadLetterOffice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterOffice")
            .field("count", &self.count())
            .field("log_limit", &self.log_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(reason: DeadLetterReason) -> DeadLetter {
        DeadLetter {
            recipient: ActorRef::unresolved("troupe://test/user/gone"),
            sender: None,
            message_type: "u32",
            reason,
        }
    }

    #[test]
    fn test_publish_counts_and_broadcasts() {
        let office = DeadLetterOffice::new(1);
        let first = office.subscribe();
        let second = office.subscribe();

        office.publish(letter(DeadLetterReason::RecipientTerminated));
        office.publish(letter(DeadLetterReason::MailboxFull));

        assert_eq!(office.count(), 2);
        for rx in [&first, &second] {
            assert_eq!(
                rx.try_recv().unwrap().reason,
                DeadLetterReason::RecipientTerminated
            );
            assert_eq!(rx.try_recv().unwrap().reason, DeadLetterReason::MailboxFull);
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_dropped_subscriber_is_forgotten() {
        let office = DeadLetterOffice::new(0);
        let kept = office.subscribe();
        drop(office.subscribe());

        office.publish(letter(DeadLetterReason::Unhandled));
        assert_eq!(office.subscribers.lock().len(), 1);
        assert_eq!(kept.len(), 1);
    }
}
