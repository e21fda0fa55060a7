//! The view an actor gets of its own cell while handling a message.

use std::sync::Arc;

use parking_lot::Mutex;
use troupe_core::error::ActorError;

use super::actor_ref::ActorRef;
use super::cell::{ActorCell, CellState};
use super::dead_letters::DeadLetterReason;
use super::fault::Fault;
use super::props::Props;
use crate::message::{Envelope, Terminated};

/// A message handler installed with [`Context::become_behavior`].
pub type Behavior = Box<dyn FnMut(&mut Context<'_>, Envelope) -> Result<(), Fault> + Send>;

pub(crate) type Handler = Arc<Mutex<Behavior>>;

/// Actor context, passed to every handler and lifecycle hook.
///
/// Lets an actor create and stop children, watch other actors and swap its
/// message handler.
pub struct Context<'a> {
    cell: &'a ActorCell,
    state: &'a mut CellState,
}

impl<'a> Context<'a> {
    pub(crate) fn new(cell: &'a ActorCell, state: &'a mut CellState) -> Self {
        Self { cell, state }
    }

    /// Reference to the actor itself.
    pub fn self_ref(&self) -> &ActorRef {
        self.cell.self_ref()
    }

    /// The parent, `None` only for the root guardian.
    pub fn parent(&self) -> Option<&ActorRef> {
        self.cell.parent()
    }

    /// Create and start a child named `name`.
    ///
    /// Fails if the name is invalid or already taken by a live, reserved or
    /// restarting child, or if this actor is stopping.
    pub fn actor_of(&mut self, props: Props, name: &str) -> Result<ActorRef, ActorError> {
        self.cell.create_child(props, name)
    }

    /// Stop `actor`: this actor, one of its children, or any other actor.
    pub fn stop(&mut self, actor: &ActorRef) {
        if actor == self.cell.self_ref() {
            actor.stop();
        } else {
            self.cell.stop_child(actor);
        }
    }

    /// Receive a [`Terminated`] once `subject` terminates. Watching an
    /// actor that is already gone yields `Terminated` right away.
    pub fn watch(&mut self, subject: &ActorRef) {
        self.cell.watch(self.state, subject);
    }

    /// Undo [`Context::watch`]. A `Terminated` already queued for `subject`
    /// is discarded.
    pub fn unwatch(&mut self, subject: &ActorRef) {
        self.cell.unwatch(self.state, subject);
    }

    /// Handle the following messages with `handler`. With `discard_old` the
    /// current handler is replaced, otherwise `handler` is pushed on top of
    /// it and [`Context::unbecome`] returns to it.
    pub fn become_behavior<F>(&mut self, handler: F, discard_old: bool)
    where
        F: FnMut(&mut Context<'_>, Envelope) -> Result<(), Fault> + Send + 'static,
    {
        if discard_old {
            self.state.behaviors.pop();
        }
        let behavior: Behavior = Box::new(handler);
        self.state.behaviors.push(Arc::new(Mutex::new(behavior)));
    }

    /// Return to the previous handler. The actor's own `receive` is never
    /// popped.
    pub fn unbecome(&mut self) {
        self.state.behaviors.pop();
    }

    /// Current children.
    pub fn children(&self) -> Vec<ActorRef> {
        self.cell.child_refs()
    }

    /// The child named `name`, if alive.
    pub fn child(&self, name: &str) -> Option<ActorRef> {
        self.cell.child(name)
    }

    /// Hand a message the actor does not understand back to the runtime.
    ///
    /// It becomes an unhandled dead letter, except for a [`Terminated`] of a
    /// watched actor, which fails this actor with a death-pact fault.
    pub fn unhandled(&mut self, envelope: Envelope) -> Result<(), Fault> {
        if let Some(terminated) = envelope.downcast_ref::<Terminated>() {
            return Err(Fault::death_pact(&terminated.actor));
        }
        self.cell
            .self_ref()
            .dead_letter(envelope, DeadLetterReason::Unhandled);
        Ok(())
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("self", self.cell.self_ref())
            .finish_non_exhaustive()
    }
}
