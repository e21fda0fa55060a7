//! Death watch: who watches whom, and turning a watchee's death into a
//! `Terminated` message.
//!
//! There is no central registry. The watcher records the watchee in its
//! `watching` set and sends it `Watch`; the watchee records the watcher in
//! `watched_by` and sends it a `DeathWatchNotification` when it terminates.

use log::{debug, warn};

use super::actor_ref::ActorRef;
use super::cell::{ActorCell, CellState};
use crate::message::{SystemMessage, Terminated};

impl ActorCell {
    /// Start watching `subject`. Idempotent; watching self is a no-op.
    pub(crate) fn watch(&self, state: &mut CellState, subject: &ActorRef) {
        if subject == self.self_ref() {
            return;
        }
        if state.watching.insert(subject.clone()) {
            subject.send_system(SystemMessage::Watch {
                watchee: subject.clone(),
                watcher: self.self_ref().clone(),
            });
        }
    }

    /// Stop watching `subject` and drop any `Terminated` for it that is
    /// still queued.
    pub(crate) fn unwatch(&self, state: &mut CellState, subject: &ActorRef) {
        if subject != self.self_ref() && state.watching.remove(subject) {
            subject.send_system(SystemMessage::Unwatch {
                watchee: subject.clone(),
                watcher: self.self_ref().clone(),
            });
        }
        state.terminated_queued.remove(subject);
    }

    pub(crate) fn add_watcher(&self, state: &mut CellState, watchee: &ActorRef, watcher: &ActorRef) {
        let watchee_self = watchee == self.self_ref();
        let watcher_self = watcher == self.self_ref();

        if watchee_self && !watcher_self {
            if state.watched_by.insert(watcher.clone()) {
                debug!("{} now watched by {}", self.self_ref(), watcher);
            }
        } else if !watchee_self && watcher_self {
            self.watch(state, watchee);
        } else {
            warn!(
                "{} ignoring illegal Watch({}, {})",
                self.self_ref(),
                watchee,
                watcher
            );
        }
    }

    pub(crate) fn remove_watcher(
        &self,
        state: &mut CellState,
        watchee: &ActorRef,
        watcher: &ActorRef,
    ) {
        let watchee_self = watchee == self.self_ref();
        let watcher_self = watcher == self.self_ref();

        if watchee_self && !watcher_self {
            if state.watched_by.remove(watcher) {
                debug!("{} no longer watched by {}", self.self_ref(), watcher);
            }
        } else if !watchee_self && watcher_self {
            self.unwatch(state, watchee);
        } else {
            warn!(
                "{} ignoring illegal Unwatch({}, {})",
                self.self_ref(),
                watchee,
                watcher
            );
        }
    }

    /// A watched actor or a child has terminated.
    pub(crate) fn watched_actor_terminated(
        &self,
        state: &mut CellState,
        actor: &ActorRef,
        existence_confirmed: bool,
        address_terminated: bool,
    ) {
        if state.watching.remove(actor) && !self.is_terminating() {
            // Sent through the user queue so it lands after everything the
            // watchee sent us before dying.
            self.self_ref().tell(
                Terminated {
                    actor: actor.clone(),
                    existence_confirmed,
                    address_terminated,
                },
                Some(actor),
            );
            state.terminated_queued.insert(actor.clone());
        }
        if self.is_child(actor) {
            self.handle_child_terminated(state, actor);
        }
    }

    pub(crate) fn tell_watchers_we_died(&self, state: &mut CellState) {
        for watcher in state.watched_by.drain() {
            if Some(&watcher) != self.parent() {
                watcher.send_system(SystemMessage::DeathWatchNotification {
                    actor: self.self_ref().clone(),
                    existence_confirmed: true,
                    address_terminated: false,
                });
            }
        }
    }

    pub(crate) fn unwatch_watched_actors(&self, state: &mut CellState) {
        for watchee in state.watching.drain() {
            watchee.send_system(SystemMessage::Unwatch {
                watchee: watchee.clone(),
                watcher: self.self_ref().clone(),
            });
        }
        state.terminated_queued.clear();
    }
}
