//! The children registry of an actor cell.
//!
//! Besides the name → child map, the container tracks whether the parent is
//! waiting for children to die before it can finish creating, restarting or
//! terminating itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use troupe_core::error::ActorError;
use troupe_core::id::ActorUid;

use super::actor_ref::ActorRef;
use super::cell::ActorCell;
use super::fault::Fault;
use super::supervisor::ChildRestartStats;

/// Why a parent is waiting for children to terminate.
#[derive(Debug, Clone)]
pub(crate) enum SuspendReason {
    /// `Context::stop` on a child; nothing waits
    UserRequest,
    /// Creation failed and is retried once the old children are gone
    Creation,
    /// Restart resumes once the children stopped by `pre_restart` are gone
    Recreation(Arc<Fault>),
    /// The parent itself is stopping
    Termination,
}

impl SuspendReason {
    fn waits_for_children(&self) -> bool {
        matches!(self, SuspendReason::Creation | SuspendReason::Recreation(_))
    }
}

pub(crate) struct ChildStats {
    pub(crate) cell: Arc<ActorCell>,
    pub(crate) restarts: ChildRestartStats,
}

enum ChildEntry {
    /// Name taken while the child is being constructed
    Reserved,
    Live(ChildStats),
}

enum ContainerState {
    Normal,
    Terminating {
        to_die: HashSet<ActorUid>,
        reason: SuspendReason,
    },
    Terminated,
}

pub(crate) struct ChildrenContainer {
    children: HashMap<String, ChildEntry>,
    state: ContainerState,
}

impl ChildrenContainer {
    pub(crate) fn new() -> Self {
        Self {
            children: HashMap::new(),
            state: ContainerState::Normal,
        }
    }

    /// Claim `name` for a child about to be created.
    pub(crate) fn reserve(&mut self, parent: &ActorRef, name: &str) -> Result<(), ActorError> {
        if self.is_terminating() {
            return Err(ActorError::ParentTerminating(
                parent.path().to_string(),
                name.to_string(),
            ));
        }
        if self.children.contains_key(name) {
            return Err(ActorError::NameTaken(name.to_string()));
        }
        self.children.insert(name.to_string(), ChildEntry::Reserved);
        Ok(())
    }

    /// Release a reservation whose child was never created.
    pub(crate) fn unreserve(&mut self, name: &str) {
        if matches!(self.children.get(name), Some(ChildEntry::Reserved)) {
            self.children.remove(name);
        }
    }

    /// Turn a reservation into a live child. Fails if the parent started
    /// terminating since the reservation was made.
    pub(crate) fn init_child(&mut self, name: &str, cell: Arc<ActorCell>) -> bool {
        if self.is_terminating() {
            self.unreserve(name);
            return false;
        }
        self.children.insert(
            name.to_string(),
            ChildEntry::Live(ChildStats {
                cell,
                restarts: ChildRestartStats::default(),
            }),
        );
        true
    }

    fn live(&self) -> impl Iterator<Item = &ChildStats> {
        self.children.values().filter_map(|entry| match entry {
            ChildEntry::Live(stats) => Some(stats),
            ChildEntry::Reserved => None,
        })
    }

    /// The live child this reference names, matching its uid.
    pub(crate) fn get_by_ref(&self, child: &ActorRef) -> Option<&ChildStats> {
        match self.children.get(child.name()) {
            Some(ChildEntry::Live(stats)) if stats.cell.self_ref() == child => Some(stats),
            _ => None,
        }
    }

    /// Whether a live child with this name exists, whatever its uid.
    pub(crate) fn has_child_named(&self, name: &str) -> bool {
        matches!(self.children.get(name), Some(ChildEntry::Live(_)))
    }

    pub(crate) fn get_by_name(&self, name: &str) -> Option<ActorRef> {
        match self.children.get(name) {
            Some(ChildEntry::Live(stats)) => Some(stats.cell.self_ref().clone()),
            _ => None,
        }
    }

    pub(crate) fn stats_mut(&mut self, child: &ActorRef) -> Option<&mut ChildRestartStats> {
        match self.children.get_mut(child.name()) {
            Some(ChildEntry::Live(stats)) if stats.cell.self_ref() == child => {
                Some(&mut stats.restarts)
            }
            _ => None,
        }
    }

    pub(crate) fn all_stats_mut(&mut self) -> impl Iterator<Item = &mut ChildRestartStats> {
        self.children.values_mut().filter_map(|entry| match entry {
            ChildEntry::Live(stats) => Some(&mut stats.restarts),
            ChildEntry::Reserved => None,
        })
    }

    pub(crate) fn child_refs(&self) -> Vec<ActorRef> {
        self.live().map(|stats| stats.cell.self_ref().clone()).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live().next().is_none()
    }

    /// Mark `child` as dying without stopping it.
    pub(crate) fn shallow_die(&mut self, child: &ActorRef) {
        match &mut self.state {
            ContainerState::Normal => {
                self.state = ContainerState::Terminating {
                    to_die: HashSet::from([child.uid()]),
                    reason: SuspendReason::UserRequest,
                };
            }
            ContainerState::Terminating { to_die, .. } => {
                to_die.insert(child.uid());
            }
            ContainerState::Terminated => {}
        }
    }

    /// Mark `child` as dying and send it `Terminate`.
    pub(crate) fn stop_child(&mut self, child: &ActorRef) {
        if self.get_by_ref(child).is_some() {
            self.shallow_die(child);
        }
        child.stop();
    }

    /// Forget a terminated child. Returns the reason the parent was waiting
    /// if this was the last child it waited for.
    pub(crate) fn remove_child(&mut self, child: &ActorRef) -> Option<SuspendReason> {
        if self.get_by_ref(child).is_some() {
            self.children.remove(child.name());
        }
        let ContainerState::Terminating { to_die, reason } = &mut self.state else {
            return None;
        };
        to_die.remove(&child.uid());
        if !to_die.is_empty() {
            return None;
        }
        let reason = reason.clone();
        self.state = match reason {
            SuspendReason::Termination => ContainerState::Terminated,
            _ => ContainerState::Normal,
        };
        Some(reason)
    }

    /// Record why the parent waits for its dying children. Returns false if
    /// no child is dying, in which case the caller proceeds right away.
    pub(crate) fn set_termination_reason(&mut self, new_reason: SuspendReason) -> bool {
        match &mut self.state {
            ContainerState::Terminating { reason, .. } => {
                *reason = new_reason;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_terminated(&mut self) {
        self.state = ContainerState::Terminated;
    }

    /// Not stopping, not waiting for children.
    pub(crate) fn is_normal(&self) -> bool {
        match &self.state {
            ContainerState::Normal => true,
            ContainerState::Terminating { reason, .. } => {
                matches!(reason, SuspendReason::UserRequest)
            }
            ContainerState::Terminated => false,
        }
    }

    /// Stopping or stopped.
    pub(crate) fn is_terminating(&self) -> bool {
        match &self.state {
            ContainerState::Normal => false,
            ContainerState::Terminating { reason, .. } => {
                matches!(reason, SuspendReason::Termination)
            }
            ContainerState::Terminated => true,
        }
    }

    /// Creation or restart is on hold until children are gone.
    pub(crate) fn is_waiting_for_children(&self) -> bool {
        matches!(&self.state, ContainerState::Terminating { reason, .. } if reason.waits_for_children())
    }
}

/// Check a child name before reserving it.
pub(crate) fn validate_name(name: &str) -> Result<(), ActorError> {
    if name.is_empty() {
        return Err(ActorError::InvalidName(
            name.to_string(),
            "name must not be empty",
        ));
    }
    if name.starts_with('$') {
        return Err(ActorError::InvalidName(
            name.to_string(),
            "names starting with `$` are reserved",
        ));
    }
    if name.contains('/') || name.contains('#') {
        return Err(ActorError::InvalidName(
            name.to_string(),
            "name must not contain `/` or `#`",
        ));
    }
    Ok(())
}
