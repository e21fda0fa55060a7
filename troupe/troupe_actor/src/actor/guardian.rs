//! The two actors every system starts with.
//!
//! The root guardian sits at the top of the hierarchy and watches the user
//! guardian, the parent of every actor created through the system. When the
//! user guardian terminates, the root stops itself and the system is done.

use super::context::Context;
use super::fault::Fault;
use super::supervisor::SupervisorStrategy;
use super::Actor;
use crate::message::{Envelope, Terminated};

pub(crate) struct RootGuardian;

impl Actor for RootGuardian {
    fn receive(&mut self, ctx: &mut Context<'_>, envelope: Envelope) -> Result<(), Fault> {
        if envelope.is::<Terminated>() {
            let me = ctx.self_ref().clone();
            ctx.stop(&me);
            return Ok(());
        }
        ctx.unhandled(envelope)
    }

    fn pre_restart(&mut self, _ctx: &mut Context<'_>, _cause: &Fault) -> Result<(), Fault> {
        Ok(())
    }

    fn supervisor_strategy(&self) -> Option<SupervisorStrategy> {
        Some(SupervisorStrategy::stopping())
    }
}

pub(crate) struct UserGuardian;

impl Actor for UserGuardian {
    fn receive(&mut self, ctx: &mut Context<'_>, envelope: Envelope) -> Result<(), Fault> {
        ctx.unhandled(envelope)
    }

    // Top-level actors survive a guardian restart
    fn pre_restart(&mut self, _ctx: &mut Context<'_>, _cause: &Fault) -> Result<(), Fault> {
        Ok(())
    }
}
