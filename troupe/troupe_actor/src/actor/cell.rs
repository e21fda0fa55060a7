//! The actor cell: one live actor together with its mailbox, children,
//! behavior stack and watch sets.
//!
//! Everything in [`CellState`] is only touched by the thread currently
//! running the cell's mailbox. The children registry is the exception: it is
//! also written by whoever creates a child, so it lives behind its own lock.
//! Lock order is always state before children.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::Mutex;
use troupe_core::error::ActorError;
use troupe_core::id::ActorUid;

use super::actor_ref::ActorRef;
use super::children::{validate_name, ChildrenContainer, SuspendReason};
use super::context::{Context, Handler};
use super::dead_letters::DeadLetterReason;
use super::fault::{catch_fault, Fault};
use super::props::Props;
use super::supervisor::SupervisorStrategy;
use super::system::SystemShared;
use super::Actor;
use crate::dispatch::Schedulable;
use crate::mailbox::{Mailbox, MailboxError, MessageInvoker};
use crate::message::{Envelope, Kill, PoisonPill, SystemMessage, Terminated};

/// Where an actor is in its life.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Constructed, `Create` not yet processed
    Created = 0,
    /// Processing messages
    Started = 1,
    /// Failed or suspended by its parent; only system messages run
    Suspended = 2,
    /// Waiting for children to stop before the fresh instance is built
    Restarting = 3,
    /// Waiting for children to stop before terminating
    Stopping = 4,
    /// Gone for good
    Terminated = 5,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Created,
            1 => Lifecycle::Started,
            2 => Lifecycle::Suspended,
            3 => Lifecycle::Restarting,
            4 => Lifecycle::Stopping,
            _ => Lifecycle::Terminated,
        }
    }
}

/// Who the current failure is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FailedState {
    None,
    /// Failed because of this actor (self, or a child whose failure was
    /// escalated)
    Failed(ActorRef),
    /// Construction failed; sticks until a fresh instance is running
    Fatally,
}

// Stash levels, ordered so that each level stashes a subset of the next.
const DEFAULT_STATE: u8 = 0;
const SUSPENDED_STATE: u8 = 1;
const WAITING_FOR_CHILDREN_STATE: u8 = 2;

pub(crate) struct CellState {
    pub(crate) actor: Option<Box<dyn Actor>>,
    /// Handlers pushed with `become`; empty means the actor's `receive`
    pub(crate) behaviors: Vec<Handler>,
    pub(crate) strategy: Option<SupervisorStrategy>,
    pub(crate) failed: FailedState,
    pub(crate) watching: HashSet<ActorRef>,
    pub(crate) watched_by: HashSet<ActorRef>,
    /// Watchees whose `Terminated` is queued in our user queue
    pub(crate) terminated_queued: HashSet<ActorRef>,
    /// System messages held back until the cell is ready for them, oldest
    /// first
    stash: Vec<SystemMessage>,
}

impl CellState {
    fn new() -> Self {
        Self {
            actor: None,
            behaviors: Vec::new(),
            strategy: None,
            failed: FailedState::None,
            watching: HashSet::new(),
            watched_by: HashSet::new(),
            terminated_queued: HashSet::new(),
            stash: Vec::new(),
        }
    }

    pub(crate) fn set_failed(&mut self, perpetrator: &ActorRef) {
        if self.failed != FailedState::Fatally {
            self.failed = FailedState::Failed(perpetrator.clone());
        }
    }

    pub(crate) fn clear_failed(&mut self) {
        if matches!(self.failed, FailedState::Failed(_)) {
            self.failed = FailedState::None;
        }
    }

    pub(crate) fn is_failed(&self) -> bool {
        matches!(self.failed, FailedState::Failed(_))
    }

    pub(crate) fn is_failed_fatally(&self) -> bool {
        self.failed == FailedState::Fatally
    }

    pub(crate) fn perpetrator(&self) -> Option<ActorRef> {
        match &self.failed {
            FailedState::Failed(perpetrator) => Some(perpetrator.clone()),
            _ => None,
        }
    }
}

/// Runtime representation of one actor.
pub struct ActorCell {
    self_ref: ActorRef,
    parent: Option<ActorRef>,
    props: Props,
    mailbox: Mailbox,
    pub(crate) system: Arc<SystemShared>,
    pub(crate) children: Mutex<ChildrenContainer>,
    state: Mutex<CellState>,
    lifecycle: AtomicU8,
}

impl ActorCell {
    /// Build a cell with `Create` already queued. Nothing runs until
    /// [`ActorCell::start`].
    pub(crate) fn new(
        system: Arc<SystemShared>,
        parent: Option<ActorRef>,
        path: String,
        props: Props,
    ) -> Arc<Self> {
        let mailbox = Mailbox::of_type(props.mailbox().unwrap_or(&system.default_mailbox));
        let dead_letters = Arc::downgrade(&system.dead_letters);
        let cell = Arc::new_cyclic(|weak| ActorCell {
            self_ref: ActorRef::new(ActorUid::new(), path, weak.clone(), dead_letters),
            parent,
            props,
            mailbox,
            system,
            children: Mutex::new(ChildrenContainer::new()),
            state: Mutex::new(CellState::new()),
            lifecycle: AtomicU8::new(Lifecycle::Created as u8),
        });
        // Create must be the first thing the actor processes, whatever is
        // sent to it between now and start.
        if let Err(message) = cell.mailbox.enqueue_system(SystemMessage::Create) {
            cell.self_ref.system_dead_letter(message);
        }
        cell
    }

    /// Announce the cell to its parent and schedule `Create`.
    pub(crate) fn start(self: &Arc<Self>) {
        if let Some(parent) = &self.parent {
            parent.send_system(SystemMessage::Supervise {
                child: self.self_ref.clone(),
            });
        }
        self.system
            .dispatcher
            .register_for_execution(self, false, true);
    }

    pub(crate) fn self_ref(&self) -> &ActorRef {
        &self.self_ref
    }

    pub(crate) fn parent(&self) -> Option<&ActorRef> {
        self.parent.as_ref()
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub(crate) fn set_lifecycle(&self, next: Lifecycle) {
        // Terminated is absorbing
        let _ = self
            .lifecycle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != Lifecycle::Terminated as u8).then_some(next as u8)
            });
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) {
        let _ = self.lifecycle.compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_suspended(&self) {
        self.transition(Lifecycle::Started, Lifecycle::Suspended);
    }

    pub(crate) fn mark_resumed(&self) {
        if !self.mailbox.is_suspended() {
            self.transition(Lifecycle::Suspended, Lifecycle::Started);
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Enqueue a user message and schedule the mailbox.
    pub(crate) fn send_message(self: &Arc<Self>, envelope: Envelope) {
        match self.mailbox.enqueue_user(envelope) {
            Ok(()) => {
                if self.mailbox.is_closed() {
                    // Closed between the check and the push
                    self.mailbox.clean_up(&**self);
                } else {
                    self.system
                        .dispatcher
                        .register_for_execution(self, true, false);
                }
            }
            Err(MailboxError::Closed(envelope)) => self
                .self_ref
                .dead_letter(envelope, DeadLetterReason::RecipientTerminated),
            Err(MailboxError::Full(envelope)) => {
                warn!(
                    "Mailbox of {} is full, dropping {}",
                    self.self_ref,
                    envelope.type_name()
                );
                self.self_ref
                    .dead_letter(envelope, DeadLetterReason::MailboxFull);
            }
        }
    }

    /// Enqueue a system message and schedule the mailbox.
    pub(crate) fn send_system_message(self: &Arc<Self>, message: SystemMessage) {
        match self.mailbox.enqueue_system(message) {
            Ok(()) => {
                if self.mailbox.is_closed() {
                    self.mailbox.clean_up(&**self);
                } else {
                    self.system
                        .dispatcher
                        .register_for_execution(self, false, true);
                }
            }
            Err(message) => self.self_ref.system_dead_letter(message),
        }
    }

    /// Reserve `name`, build the child and start it.
    pub(crate) fn create_child(&self, props: Props, name: &str) -> Result<ActorRef, ActorError> {
        validate_name(name)?;
        self.children.lock().reserve(&self.self_ref, name)?;

        let path = format!("{}/{}", self.self_ref.path(), name);
        let child = ActorCell::new(
            Arc::clone(&self.system),
            Some(self.self_ref.clone()),
            path,
            props,
        );
        // A child of a suspended parent starts out suspended as well.
        for _ in 0..self.mailbox.suspend_count() {
            child.mailbox.suspend();
        }

        if !self.children.lock().init_child(name, Arc::clone(&child)) {
            return Err(ActorError::ParentTerminating(
                self.self_ref.path().to_string(),
                name.to_string(),
            ));
        }
        child.start();
        Ok(child.self_ref.clone())
    }

    pub(crate) fn child_refs(&self) -> Vec<ActorRef> {
        self.children.lock().child_refs()
    }

    pub(crate) fn child(&self, name: &str) -> Option<ActorRef> {
        self.children.lock().get_by_name(name)
    }

    pub(crate) fn is_child(&self, actor: &ActorRef) -> bool {
        self.children.lock().get_by_ref(actor).is_some()
    }

    /// Stop `child` if it is ours; send it `Terminate` regardless.
    pub(crate) fn stop_child(&self, child: &ActorRef) {
        self.children.lock().stop_child(child);
    }

    /// Stop every child. Returns the children that were asked to stop.
    pub(crate) fn stop_all_children(&self) -> Vec<ActorRef> {
        let mut children = self.children.lock();
        let refs = children.child_refs();
        for child in &refs {
            children.stop_child(child);
        }
        refs
    }

    pub(crate) fn set_termination_reason(&self, reason: SuspendReason) -> bool {
        self.children.lock().set_termination_reason(reason)
    }

    pub(crate) fn children_normal(&self) -> bool {
        self.children.lock().is_normal()
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.children.lock().is_terminating()
    }

    pub(crate) fn suspend_children(&self, except: &[ActorRef]) {
        for child in self.child_refs() {
            if !except.contains(&child) {
                child.send_system(SystemMessage::Suspend);
            }
        }
    }

    pub(crate) fn mailbox_ref(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Run `f` against the current actor instance. `None` if there is no
    /// instance.
    pub(crate) fn with_actor<F>(&self, state: &mut CellState, f: F) -> Option<Result<(), Fault>>
    where
        F: FnOnce(&mut Box<dyn Actor>, &mut Context<'_>) -> Result<(), Fault>,
    {
        let mut actor = state.actor.take()?;
        let result = {
            let mut ctx = Context::new(self, state);
            catch_fault(|| f(&mut actor, &mut ctx))
        };
        state.actor = Some(actor);
        Some(result)
    }

    /// Build and start a fresh instance.
    pub(crate) fn create(&self, state: &mut CellState) {
        let actor = match self.props.new_actor() {
            Ok(actor) => actor,
            Err(fault) => {
                state.failed = FailedState::Fatally;
                self.set_lifecycle(Lifecycle::Suspended);
                self.handle_invoke_failure(state, None, &[], Arc::new(fault.into_initialization()));
                return;
            }
        };
        self.install(state, actor);

        match self.with_actor(state, |actor, ctx| actor.pre_start(ctx)) {
            Some(Err(fault)) => {
                state.actor = None;
                state.failed = FailedState::Fatally;
                self.set_lifecycle(Lifecycle::Suspended);
                self.handle_invoke_failure(state, None, &[], Arc::new(fault.into_initialization()));
            }
            _ => {
                state.failed = FailedState::None;
                self.set_lifecycle(Lifecycle::Started);
                debug!("{} started", self.self_ref);
            }
        }
    }

    /// Make `actor` the current instance with a clean behavior stack.
    pub(crate) fn install(&self, state: &mut CellState, actor: Box<dyn Actor>) {
        state.strategy = actor.supervisor_strategy();
        state.behaviors.clear();
        state.actor = Some(actor);
    }

    pub(crate) fn new_actor(&self) -> Result<Box<dyn Actor>, Fault> {
        self.props.new_actor()
    }

    fn receive_message(&self, state: &mut CellState, envelope: Envelope) -> Result<(), Fault> {
        if let Some(terminated) = envelope.downcast_ref::<Terminated>() {
            // Only deliver what death watch queued; anything else was
            // discarded by an unwatch in between.
            if !state.terminated_queued.remove(&terminated.actor) {
                debug!(
                    "{} discarding Terminated for unwatched {}",
                    self.self_ref, terminated.actor
                );
                return Ok(());
            }
        } else if envelope.is::<PoisonPill>() {
            self.self_ref.stop();
            return Ok(());
        } else if envelope.is::<Kill>() {
            return Err(Fault::killed(&self.self_ref));
        }

        if let Some(handler) = state.behaviors.last().cloned() {
            let mut ctx = Context::new(self, state);
            return catch_fault(|| {
                let mut handler = handler.lock();
                (*handler)(&mut ctx, envelope)
            });
        }

        if state.actor.is_none() {
            self.self_ref
                .dead_letter(envelope, DeadLetterReason::RecipientTerminated);
            return Ok(());
        }
        self.with_actor(state, |actor, ctx| actor.receive(ctx, envelope))
            .unwrap_or(Ok(()))
    }

    fn calculate_state(&self) -> u8 {
        if self.children.lock().is_waiting_for_children() {
            WAITING_FOR_CHILDREN_STATE
        } else if self.mailbox.is_suspended() {
            SUSPENDED_STATE
        } else {
            DEFAULT_STATE
        }
    }

    fn should_stash(message: &SystemMessage, state: u8) -> bool {
        match state {
            WAITING_FOR_CHILDREN_STATE => matches!(
                message,
                SystemMessage::Recreate { .. }
                    | SystemMessage::Suspend
                    | SystemMessage::Resume { .. }
                    | SystemMessage::Failed { .. }
            ),
            SUSPENDED_STATE => matches!(message, SystemMessage::Failed { .. }),
            _ => false,
        }
    }

    fn handle_system_message(&self, state: &mut CellState, message: SystemMessage) {
        match message {
            SystemMessage::Create => self.create(state),
            SystemMessage::Recreate { cause } => self.fault_recreate(state, cause),
            SystemMessage::Suspend => self.fault_suspend(),
            SystemMessage::Resume { caused_by_failure } => {
                self.fault_resume(state, caused_by_failure)
            }
            SystemMessage::Terminate => self.terminate(state),
            SystemMessage::Supervise { child } => self.supervise(&child),
            SystemMessage::Watch { watchee, watcher } => {
                self.add_watcher(state, &watchee, &watcher)
            }
            SystemMessage::Unwatch { watchee, watcher } => {
                self.remove_watcher(state, &watchee, &watcher)
            }
            SystemMessage::Failed { child, cause } => self.handle_failure(state, &child, cause),
            SystemMessage::DeathWatchNotification {
                actor,
                existence_confirmed,
                address_terminated,
            } => self.watched_actor_terminated(
                state,
                &actor,
                existence_confirmed,
                address_terminated,
            ),
        }
    }
}

impl MessageInvoker for ActorCell {
    fn invoke(&self, envelope: Envelope) {
        let mut state = self.state.lock();
        if let Err(fault) = self.receive_message(&mut state, envelope) {
            self.handle_invoke_failure(&mut state, None, &[], Arc::new(fault));
        }
    }

    fn system_invoke(&self, message: SystemMessage) {
        let mut state = self.state.lock();
        let mut todo = VecDeque::from([message]);
        let mut current = self.calculate_state();

        while let Some(message) = todo.pop_front() {
            if Self::should_stash(&message, current) {
                state.stash.push(message);
            } else {
                // Deciders and lifecycle hooks are user code
                let handled = catch_fault(|| {
                    self.handle_system_message(&mut state, message);
                    Ok(())
                });
                if let Err(fault) = handled {
                    if self.is_terminated() {
                        error!("{} failed after termination: {}", self.self_ref, fault);
                    } else {
                        self.handle_invoke_failure(&mut state, None, &[], Arc::new(fault));
                    }
                }
            }

            let next = self.calculate_state();
            // Each level stashes a subset of the one above, so walking down
            // means everything stashed may be ready now.
            if next < current {
                for message in std::mem::take(&mut state.stash).into_iter().rev() {
                    todo.push_front(message);
                }
            }
            current = next;

            if self.is_terminated() {
                for message in todo.drain(..) {
                    self.self_ref.system_dead_letter(message);
                }
            }
        }
    }

    fn dead_letter(&self, envelope: Envelope) {
        self.self_ref
            .dead_letter(envelope, DeadLetterReason::RecipientTerminated);
    }

    fn dead_letter_system(&self, message: SystemMessage) {
        self.self_ref.system_dead_letter(message);
    }
}

impl Schedulable for ActorCell {
    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }
}

impl CellState {
    /// Hand every stashed system message to dead letters.
    pub(crate) fn flush_stash(&mut self, owner: &ActorRef) {
        for message in self.stash.drain(..) {
            owner.system_dead_letter(message);
        }
    }
}

impl std::fmt::Debug for ActorCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorCell")
            .field("self", &self.self_ref)
            .field("lifecycle", &self.lifecycle())
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}
