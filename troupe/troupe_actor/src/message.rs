//! Messages exchanged with and inside the runtime.
//!
//! User traffic travels in an [`Envelope`] carrying a type-erased payload and
//! the explicit sender. Runtime control traffic is a [`SystemMessage`], which
//! always takes priority over user messages in a mailbox.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::actor::actor_ref::ActorRef;
use crate::actor::fault::Fault;

/// A user message together with its sender.
pub struct Envelope {
    message: Box<dyn Any + Send>,
    type_name: &'static str,
    sender: Option<ActorRef>,
}

impl Envelope {
    /// Wrap a message.
    pub fn new<M: Any + Send>(message: M, sender: Option<ActorRef>) -> Self {
        Self {
            message: Box::new(message),
            type_name: std::any::type_name::<M>(),
            sender,
        }
    }

    /// The actor that sent this message, if it was sent from one.
    pub fn sender(&self) -> Option<&ActorRef> {
        self.sender.as_ref()
    }

    /// Rust type name of the payload.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the payload is an `M`.
    pub fn is<M: Any>(&self) -> bool {
        self.message.is::<M>()
    }

    /// Borrow the payload as an `M`.
    pub fn downcast_ref<M: Any>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    /// Take the payload out as an `M`, or get the envelope back unchanged.
    pub fn downcast<M: Any>(self) -> Result<(M, Option<ActorRef>), Envelope> {
        let Envelope {
            message,
            type_name,
            sender,
        } = self;
        match message.downcast::<M>() {
            Ok(message) => Ok((*message, sender)),
            Err(message) => Err(Envelope {
                message,
                type_name,
                sender,
            }),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("type", &self.type_name)
            .field("sender", &self.sender)
            .finish()
    }
}

/// Delivered to a watcher once a watched actor has terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminated {
    /// The actor that terminated
    pub actor: ActorRef,
    /// False when the watched reference never resolved to a live actor
    pub existence_confirmed: bool,
    /// True when the actor's whole host was declared unreachable
    pub address_terminated: bool,
}

/// Stops the receiving actor once every message queued before it is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoisonPill;

/// Makes the receiving actor fail with a killed fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kill;

/// Runtime control messages.
///
/// These bypass the user queue, are drained before any user message and are
/// processed even while the receiving mailbox is suspended.
#[derive(Debug)]
pub enum SystemMessage {
    /// Construct the actor instance; always the first message an actor sees
    Create,
    /// Replace the actor instance after a failure
    Recreate {
        /// Fault that triggered the restart
        cause: Arc<Fault>,
    },
    /// Stop processing user messages, recursively for children
    Suspend,
    /// Undo one `Suspend`
    Resume {
        /// Set when the resume is a supervisor's answer to this actor's failure
        caused_by_failure: Option<Arc<Fault>>,
    },
    /// Stop the actor and its children
    Terminate,
    /// A freshly created child announcing itself to its parent
    Supervise {
        /// The new child
        child: ActorRef,
    },
    /// Register `watcher` for the termination of `watchee`
    Watch {
        /// Actor being watched
        watchee: ActorRef,
        /// Actor to notify
        watcher: ActorRef,
    },
    /// Remove a previous `Watch`
    Unwatch {
        /// Actor being watched
        watchee: ActorRef,
        /// Actor no longer interested
        watcher: ActorRef,
    },
    /// A child failed and awaits its parent's directive
    Failed {
        /// The failed child
        child: ActorRef,
        /// What went wrong
        cause: Arc<Fault>,
    },
    /// A watched actor (or a child) has terminated
    DeathWatchNotification {
        /// The terminated actor
        actor: ActorRef,
        /// False when the actor was never observed alive
        existence_confirmed: bool,
        /// True when the actor's host was declared unreachable
        address_terminated: bool,
    },
}

impl SystemMessage {
    /// Short name used in logs and dead-letter records.
    pub fn kind(&self) -> &'static str {
        match self {
            SystemMessage::Create => "Create",
            SystemMessage::Recreate { .. } => "Recreate",
            SystemMessage::Suspend => "Suspend",
            SystemMessage::Resume { .. } => "Resume",
            SystemMessage::Terminate => "Terminate",
            SystemMessage::Supervise { .. } => "Supervise",
            SystemMessage::Watch { .. } => "Watch",
            SystemMessage::Unwatch { .. } => "Unwatch",
            SystemMessage::Failed { .. } => "Failed",
            SystemMessage::DeathWatchNotification { .. } => "DeathWatchNotification",
        }
    }
}
