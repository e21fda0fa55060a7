//! Actors, their cells and the hierarchy that supervises them.
//!
//! This module provides the actor model itself:
//!
//! - The [`Actor`] trait and the [`Context`] handed to it
//! - [`ActorRef`] handles and [`Props`] recipes
//! - Supervision through [`SupervisorStrategy`] and death watch
//! - The [`ActorSystem`] owning the guardians, dispatcher and dead letters

pub mod actor_ref;
pub(crate) mod cell;
pub(crate) mod children;
pub mod context;
pub mod dead_letters;
mod death_watch;
pub mod fault;
mod fault_handling;
mod guardian;
pub mod props;
pub mod supervisor;
pub mod system;

pub use actor_ref::ActorRef;
pub use cell::Lifecycle;
pub use context::{Behavior, Context};
pub use dead_letters::{DeadLetter, DeadLetterOffice, DeadLetterReason};
pub use fault::{Fault, FaultKind};
pub use props::Props;
pub use supervisor::{default_decider, Decider, Directive, StrategyKind, SupervisorStrategy};
pub use system::ActorSystem;

use crate::message::Envelope;

/// A unit of state and behavior that processes one message at a time.
///
/// All hooks run on the thread currently owning the actor's mailbox, never
/// concurrently with each other. An error or a panic from any of them is a
/// [`Fault`] handled by the parent's [`SupervisorStrategy`].
pub trait Actor: Send + 'static {
    /// Handle one message.
    fn receive(&mut self, ctx: &mut Context<'_>, envelope: Envelope) -> Result<(), Fault>;

    /// Called once the instance is created, before the first message.
    fn pre_start(&mut self, _ctx: &mut Context<'_>) -> Result<(), Fault> {
        Ok(())
    }

    /// Called after the actor and all its children stopped.
    fn post_stop(&mut self, _ctx: &mut Context<'_>) -> Result<(), Fault> {
        Ok(())
    }

    /// Called on the failed instance before it is replaced.
    ///
    /// By default unwatches and stops all children, then calls
    /// [`Actor::post_stop`].
    fn pre_restart(&mut self, ctx: &mut Context<'_>, _cause: &Fault) -> Result<(), Fault> {
        for child in ctx.children() {
            ctx.unwatch(&child);
            ctx.stop(&child);
        }
        self.post_stop(ctx)
    }

    /// Called on the fresh instance after a restart. By default calls
    /// [`Actor::pre_start`].
    fn post_restart(&mut self, ctx: &mut Context<'_>, _cause: &Fault) -> Result<(), Fault> {
        self.pre_start(ctx)
    }

    /// How to supervise this actor's children. `None` uses the system's
    /// default strategy.
    fn supervisor_strategy(&self) -> Option<SupervisorStrategy> {
        None
    }
}
