//! Failure, restart and termination handling of an [`ActorCell`].
//!
//! A failing actor suspends itself and its children and reports to its
//! parent, which answers with `Resume`, `Recreate` or `Terminate`. Restart,
//! failed creation and termination first wait for the children being
//! stopped; the last child's death notification finishes the operation.

use std::sync::Arc;

use log::{debug, error};

use super::actor_ref::ActorRef;
use super::cell::{ActorCell, CellState, FailedState, Lifecycle};
use super::children::SuspendReason;
use super::fault::Fault;
use crate::message::SystemMessage;

impl ActorCell {
    /// Suspend, mark as failed and report `cause` to the parent. A failure
    /// of the root terminates the system.
    pub(crate) fn handle_invoke_failure(
        &self,
        state: &mut CellState,
        perpetrator: Option<&ActorRef>,
        children_not_to_suspend: &[ActorRef],
        cause: Arc<Fault>,
    ) {
        if state.is_failed() {
            debug!(
                "{} already failed, ignoring further failure: {}",
                self.self_ref(),
                cause
            );
            return;
        }

        self.mailbox_ref().suspend();
        self.mark_suspended();
        let perpetrator = perpetrator.unwrap_or_else(|| self.self_ref()).clone();
        state.set_failed(&perpetrator);

        let mut skip = children_not_to_suspend.to_vec();
        skip.push(perpetrator);
        self.suspend_children(&skip);

        match self.parent() {
            Some(parent) => parent.send_system(SystemMessage::Failed {
                child: self.self_ref().clone(),
                cause,
            }),
            None => {
                error!(
                    "Root guardian {} failed, terminating the system: {}",
                    self.self_ref(),
                    cause
                );
                self.system.record_termination_cause(cause);
                self.self_ref().stop();
            }
        }
    }

    pub(crate) fn fault_suspend(&self) {
        self.mailbox_ref().suspend();
        self.mark_suspended();
        self.suspend_children(&[]);
    }

    pub(crate) fn fault_resume(&self, state: &mut CellState, caused_by_failure: Option<Arc<Fault>>) {
        if state.actor.is_none() {
            if let Some(cause) = &caused_by_failure {
                error!(
                    "{} has no instance, changing Resume into Create after: {}",
                    self.self_ref(),
                    cause
                );
            }
            self.fault_create(state);
            return;
        }
        if state.is_failed_fatally() {
            if let Some(cause) = caused_by_failure {
                error!(
                    "{} failed fatally, changing Resume into Restart after: {}",
                    self.self_ref(),
                    cause
                );
                self.fault_recreate(state, cause);
                return;
            }
        }

        let perpetrator = state.perpetrator();
        // Always resume to keep the suspend counter balanced
        self.mailbox_ref().resume();
        self.mark_resumed();
        if caused_by_failure.is_some() {
            state.clear_failed();
        }
        for child in self.child_refs() {
            let cause = if perpetrator.as_ref() == Some(&child) {
                caused_by_failure.clone()
            } else {
                None
            };
            child.send_system(SystemMessage::Resume {
                caused_by_failure: cause,
            });
        }
    }

    fn fault_create(&self, state: &mut CellState) {
        self.stop_all_children();
        if !self.set_termination_reason(SuspendReason::Creation) {
            self.finish_create(state);
        }
    }

    pub(crate) fn finish_create(&self, state: &mut CellState) {
        self.mailbox_ref().resume();
        state.clear_failed();
        self.create(state);
    }

    pub(crate) fn fault_recreate(&self, state: &mut CellState, cause: Arc<Fault>) {
        if state.actor.is_none() {
            error!(
                "{} has no instance, changing Recreate into Create after: {}",
                self.self_ref(),
                cause
            );
            self.fault_create(state);
            return;
        }
        if !self.children_normal() {
            // Already stopping or restarting; keep the suspend counter
            // balanced.
            self.fault_resume(state, None);
            return;
        }

        debug!("{} restarting", self.self_ref());
        if !state.is_failed_fatally() {
            let outcome = self.with_actor(state, |actor, ctx| actor.pre_restart(ctx, &cause));
            if let Some(Err(fault)) = outcome {
                error!(
                    "{} failed in pre_restart, restarting anyway: {}",
                    self.self_ref(),
                    fault
                );
            }
        }
        state.behaviors.clear();
        self.set_lifecycle(Lifecycle::Restarting);

        if !self.set_termination_reason(SuspendReason::Recreation(Arc::clone(&cause))) {
            self.finish_recreate(state, cause);
        }
    }

    pub(crate) fn finish_recreate(&self, state: &mut CellState, cause: Arc<Fault>) {
        // Children that survived pre_restart are restarted once we are up
        let survivors = self.child_refs();

        self.mailbox_ref().resume();
        state.clear_failed();

        let outcome = match self.new_actor() {
            Ok(fresh) => {
                self.install(state, fresh);
                self.with_actor(state, |actor, ctx| actor.post_restart(ctx, &cause))
                    .unwrap_or(Ok(()))
            }
            Err(fault) => Err(fault.into_initialization()),
        };

        match outcome {
            Ok(()) => {
                state.failed = FailedState::None;
                self.set_lifecycle(Lifecycle::Started);
                debug!("{} restarted", self.self_ref());
                for child in survivors {
                    child.send_system(SystemMessage::Recreate {
                        cause: Arc::clone(&cause),
                    });
                }
            }
            Err(fault) => {
                state.actor = None;
                state.failed = FailedState::Fatally;
                self.set_lifecycle(Lifecycle::Suspended);
                self.handle_invoke_failure(state, None, &survivors, Arc::new(fault));
            }
        }
    }

    pub(crate) fn terminate(&self, state: &mut CellState) {
        self.unwatch_watched_actors(state);
        self.stop_all_children();

        let was_terminating = self.is_terminating();
        if self.set_termination_reason(SuspendReason::Termination) {
            if !was_terminating {
                // No user messages while the children stop, and no failure
                // reports to the parent either.
                self.mailbox_ref().suspend();
                state.set_failed(self.self_ref());
                self.set_lifecycle(Lifecycle::Stopping);
                debug!("{} stopping", self.self_ref());
            }
        } else {
            self.children.lock().set_terminated();
            self.finish_terminate(state);
        }
    }

    pub(crate) fn finish_terminate(&self, state: &mut CellState) {
        if let Some(Err(fault)) = self.with_actor(state, |actor, ctx| actor.post_stop(ctx)) {
            error!("{} failed in post_stop: {}", self.self_ref(), fault);
        }

        self.mailbox_ref().become_closed();
        self.mailbox_ref().clean_up(self);
        let me = self.self_ref().clone();
        state.flush_stash(&me);
        self.set_lifecycle(Lifecycle::Terminated);

        // Watchers hear about us before the parent does, so a watcher of
        // both sees the parent's death last.
        self.tell_watchers_we_died(state);
        if let Some(parent) = self.parent() {
            parent.send_system(SystemMessage::DeathWatchNotification {
                actor: me.clone(),
                existence_confirmed: true,
                address_terminated: false,
            });
        }
        self.unwatch_watched_actors(state);

        state.actor = None;
        state.behaviors.clear();
        debug!("{} stopped", me);

        if self.is_root() {
            self.system.on_root_terminated();
        }
    }

    pub(crate) fn supervise(&self, child: &ActorRef) {
        if self.is_terminating() {
            return;
        }
        if self.is_child(child) {
            debug!("{} now supervising {}", self.self_ref(), child);
        } else {
            error!(
                "{} received Supervise from unregistered child {}",
                self.self_ref(),
                child
            );
        }
    }

    /// A child reported a failure; apply our strategy to it.
    pub(crate) fn handle_failure(&self, state: &mut CellState, child: &ActorRef, cause: Arc<Fault>) {
        let strategy = state
            .strategy
            .clone()
            .unwrap_or_else(|| self.system.default_strategy.clone());

        let handled = {
            let mut children = self.children.lock();
            if children.get_by_ref(child).is_none() {
                let reason = if children.has_child_named(child.name()) {
                    "old incarnation of a child"
                } else {
                    "unknown child"
                };
                debug!(
                    "{} dropping failure of {} ({}): {}",
                    self.self_ref(),
                    child,
                    reason,
                    cause
                );
                return;
            }
            strategy.handle_failure(&mut children, self.self_ref(), child, &cause)
        };

        if !handled {
            self.handle_invoke_failure(state, Some(child), &[], cause);
        }
    }

    /// A child has terminated; continue whatever was waiting for it.
    pub(crate) fn handle_child_terminated(&self, state: &mut CellState, child: &ActorRef) {
        let reason = self.children.lock().remove_child(child);
        match reason {
            Some(SuspendReason::Recreation(cause)) => self.finish_recreate(state, cause),
            Some(SuspendReason::Creation) => self.finish_create(state),
            Some(SuspendReason::Termination) => self.finish_terminate(state),
            Some(SuspendReason::UserRequest) | None => {}
        }
    }
}
