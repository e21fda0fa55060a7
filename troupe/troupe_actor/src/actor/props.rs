//! Recipes for creating actors.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::fault::Fault;
use super::Actor;
use crate::mailbox::MailboxType;

type Factory = Arc<dyn Fn() -> Result<Box<dyn Actor>, Fault> + Send + Sync>;

/// How to build (and rebuild) an actor.
///
/// The factory runs once when the actor starts and again on every restart,
/// so it must produce a fresh instance each time.
#[derive(Clone)]
pub struct Props {
    factory: Factory,
    mailbox: Option<MailboxType>,
}

impl Props {
    /// Props for an actor built by an infallible factory.
    pub fn new<A, F>(factory: F) -> Self
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(move || Ok::<_, Fault>(Box::new(factory()) as Box<dyn Actor>)),
            mailbox: None,
        }
    }

    /// Props for an actor whose construction may fail. A failure is an
    /// initialization fault and stops the actor under the default strategy.
    pub fn try_new<A, F>(factory: F) -> Self
    where
        A: Actor,
        F: Fn() -> Result<A, Fault> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(move || factory().map(|a| Box::new(a) as Box<dyn Actor>)),
            mailbox: None,
        }
    }

    /// Use `mailbox` instead of the system's default mailbox.
    pub fn with_mailbox(mut self, mailbox: MailboxType) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    /// The mailbox override, if any.
    pub fn mailbox(&self) -> Option<&MailboxType> {
        self.mailbox.as_ref()
    }

    pub(crate) fn new_actor(&self) -> Result<Box<dyn Actor>, Fault> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.factory)()))
            .unwrap_or_else(|payload| Err(Fault::from_panic(payload)))
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}
