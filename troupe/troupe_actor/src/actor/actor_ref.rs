//! Actor references.
//!
//! An [`ActorRef`] names one incarnation of an actor: its path plus a unique
//! id drawn when the actor was created. It holds the actor's cell only
//! weakly, so a reference never keeps an actor alive, and once the actor is
//! gone every message sent through the reference becomes a dead letter.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use log::debug;
use troupe_core::id::ActorUid;

use super::cell::{ActorCell, Lifecycle};
use super::dead_letters::{DeadLetter, DeadLetterOffice, DeadLetterReason};
use crate::message::{Envelope, SystemMessage};

struct RefInner {
    uid: ActorUid,
    path: String,
    cell: Weak<ActorCell>,
    dead_letters: Weak<DeadLetterOffice>,
}

/// Handle to an actor. Cheap to clone, compared by unique id.
#[derive(Clone)]
pub struct ActorRef {
    inner: Arc<RefInner>,
}

impl ActorRef {
    pub(crate) fn new(
        uid: ActorUid,
        path: String,
        cell: Weak<ActorCell>,
        dead_letters: Weak<DeadLetterOffice>,
    ) -> Self {
        Self {
            inner: Arc::new(RefInner {
                uid,
                path,
                cell,
                dead_letters,
            }),
        }
    }

    /// A reference that never resolved to an actor.
    #[cfg(test)]
    pub(crate) fn unresolved(path: &str) -> Self {
        Self::new(ActorUid::new(), path.to_string(), Weak::new(), Weak::new())
    }

    /// Full path, e.g. `troupe://orders/user/billing`.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Last path element.
    pub fn name(&self) -> &str {
        self.inner
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&self.inner.path)
    }

    /// Unique id of this incarnation.
    pub fn uid(&self) -> ActorUid {
        self.inner.uid
    }

    pub(crate) fn cell(&self) -> Option<Arc<ActorCell>> {
        self.inner.cell.upgrade()
    }

    /// Send a message. Never blocks and never fails: undeliverable messages
    /// become dead letters.
    pub fn tell<M: Any + Send>(&self, message: M, sender: Option<&ActorRef>) {
        self.tell_envelope(Envelope::new(message, sender.cloned()));
    }

    /// Send an already wrapped message.
    pub fn tell_envelope(&self, envelope: Envelope) {
        match self.cell() {
            Some(cell) => cell.send_message(envelope),
            None => self.dead_letter(envelope, DeadLetterReason::RecipientTerminated),
        }
    }

    /// Ask the actor to stop. Messages already queued are dropped to dead
    /// letters once it terminates.
    pub fn stop(&self) {
        self.send_system(SystemMessage::Terminate);
    }

    /// Tell this actor that `watchee` is gone because its host was declared
    /// unreachable (or for any other reason the caller knows of). Delivered
    /// like a regular death-watch notification.
    pub fn deliver_death_watch_notification(&self, watchee: &ActorRef, address_terminated: bool) {
        self.send_system(SystemMessage::DeathWatchNotification {
            actor: watchee.clone(),
            existence_confirmed: false,
            address_terminated,
        });
    }

    /// Current lifecycle state. A reference whose actor is gone reports
    /// [`Lifecycle::Terminated`].
    pub fn lifecycle(&self) -> Lifecycle {
        self.cell()
            .map_or(Lifecycle::Terminated, |cell| cell.lifecycle())
    }

    /// Whether the actor has terminated.
    pub fn is_terminated(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminated
    }

    pub(crate) fn send_system(&self, message: SystemMessage) {
        match self.cell() {
            Some(cell) => cell.send_system_message(message),
            None => self.system_dead_letter(message),
        }
    }

    pub(crate) fn dead_letter(&self, envelope: Envelope, reason: DeadLetterReason) {
        match self.inner.dead_letters.upgrade() {
            Some(office) => office.publish(DeadLetter {
                recipient: self.clone(),
                sender: envelope.sender().cloned(),
                message_type: envelope.type_name(),
                reason,
            }),
            None => debug!(
                "Dropping {} to {}, dead letter office is gone",
                envelope.type_name(),
                self
            ),
        }
    }

    /// A system message that reached a terminated actor. A watch request is
    /// answered right away so the watcher does not wait forever.
    pub(crate) fn system_dead_letter(&self, message: SystemMessage) {
        match message {
            SystemMessage::Watch { watchee, watcher } if watchee == *self && watcher != *self => {
                watcher.send_system(SystemMessage::DeathWatchNotification {
                    actor: watchee,
                    existence_confirmed: false,
                    address_terminated: false,
                });
            }
            other => debug!("Dropping system message {} to {}", other.kind(), self),
        }
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.uid == other.inner.uid
    }
}

impl Eq for ActorRef {}

impl PartialOrd for ActorRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActorRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.uid.cmp(&other.inner.uid)
    }
}

impl Hash for ActorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.uid.hash(state);
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Actor[{}#{}]", self.inner.path, self.inner.uid.short())
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("path", &self.inner.path)
            .field("uid", &self.inner.uid)
            .finish()
    }
}
