//! Actor supervision and failure recovery.
//!
//! When a child fails, its parent's [`SupervisorStrategy`] maps the fault to
//! a [`Directive`] and applies it either to the failing child alone
//! ([`StrategyKind::OneForOne`]) or to all of its siblings
//! ([`StrategyKind::AllForOne`]).

use log::{error, warn};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use troupe_core::config::SupervisionSettings;

use super::actor_ref::ActorRef;
use super::children::ChildrenContainer;
use super::fault::{Fault, FaultKind};
use crate::message::SystemMessage;

/// What to do with a failed child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep the current instance and state; the failing message is lost
    Resume,

    /// Replace the instance with a fresh one
    Restart,

    /// Stop the child permanently
    Stop,

    /// Fail the supervisor itself with the same fault
    Escalate,
}

/// Which children a directive applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Only the failed child
    OneForOne,

    /// The failed child and all its siblings
    AllForOne,
}

/// Maps a fault to a directive.
pub type Decider = Arc<dyn Fn(&Fault) -> Directive + Send + Sync>;

/// Supervision policy of a parent actor
#[derive(Clone)]
pub struct SupervisorStrategy {
    kind: StrategyKind,
    decider: Decider,
    max_restarts: Option<u32>,
    within: Option<Duration>,
}

/// Stop on initialization, kill and death-pact faults; restart on
/// everything else.
pub fn default_decider(fault: &Fault) -> Directive {
    match fault.kind() {
        FaultKind::Initialization | FaultKind::Killed | FaultKind::DeathPact => Directive::Stop,
        FaultKind::Error | FaultKind::Panic => Directive::Restart,
    }
}

impl SupervisorStrategy {
    /// Apply directives to the failing child only.
    pub fn one_for_one<F>(decider: F) -> Self
    where
        F: Fn(&Fault) -> Directive + Send + Sync + 'static,
    {
        Self {
            kind: StrategyKind::OneForOne,
            decider: Arc::new(decider),
            max_restarts: None,
            within: None,
        }
    }

    /// Apply directives to all children of the supervisor.
    pub fn all_for_one<F>(decider: F) -> Self
    where
        F: Fn(&Fault) -> Directive + Send + Sync + 'static,
    {
        Self {
            kind: StrategyKind::AllForOne,
            ..Self::one_for_one(decider)
        }
    }

    /// Limit restarts: a child may restart at most `max_restarts` times
    /// within `within` (or ever, when `within` is `None`). A child that
    /// exceeds the limit is stopped.
    pub fn with_restart_window(mut self, max_restarts: Option<u32>, within: Option<Duration>) -> Self {
        self.max_restarts = max_restarts;
        self.within = within;
        self
    }

    /// One-for-one strategy that stops every failing child.
    pub fn stopping() -> Self {
        Self::one_for_one(|_| Directive::Stop)
    }

    /// One-for-one strategy with [`default_decider`] and no restart limit.
    pub fn default_strategy() -> Self {
        Self::one_for_one(default_decider)
    }

    /// The default strategy with the restart window from the settings.
    pub fn from_settings(settings: &SupervisionSettings) -> Self {
        Self::default_strategy().with_restart_window(settings.max_restarts, settings.within())
    }

    /// Strategy kind
    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Decide what to do about `fault`.
    pub fn decide(&self, fault: &Fault) -> Directive {
        (self.decider)(fault)
    }

    /// Apply the strategy to a failure reported by `child`. Returns false if
    /// the failure must be escalated.
    pub(crate) fn handle_failure(
        &self,
        children: &mut ChildrenContainer,
        supervisor: &ActorRef,
        child: &ActorRef,
        cause: &Arc<Fault>,
    ) -> bool {
        let directive = self.decide(cause);
        match directive {
            Directive::Resume => warn!(
                "{} failed: {} (supervisor {} decided {:?})",
                child, cause, supervisor, directive
            ),
            _ => error!(
                "{} failed: {} (supervisor {} decided {:?})",
                child, cause, supervisor, directive
            ),
        }

        match directive {
            Directive::Resume => {
                child.send_system(SystemMessage::Resume {
                    caused_by_failure: Some(Arc::clone(cause)),
                });
                true
            }
            Directive::Restart => {
                self.process_failure(children, true, child, cause);
                true
            }
            Directive::Stop => {
                self.process_failure(children, false, child, cause);
                true
            }
            Directive::Escalate => false,
        }
    }

    fn process_failure(
        &self,
        children: &mut ChildrenContainer,
        restart: bool,
        child: &ActorRef,
        cause: &Arc<Fault>,
    ) {
        match self.kind {
            StrategyKind::OneForOne => {
                let permitted = restart
                    && children.stats_mut(child).is_some_and(|stats| {
                        stats.request_restart_permission(self.max_restarts, self.within)
                    });
                if permitted {
                    restart_child(child, cause, false);
                } else {
                    children.stop_child(child);
                }
            }
            StrategyKind::AllForOne => {
                let permitted = restart
                    && children.all_stats_mut().all(|stats| {
                        stats.request_restart_permission(self.max_restarts, self.within)
                    });
                for sibling in children.child_refs() {
                    if permitted {
                        restart_child(&sibling, cause, sibling != *child);
                    } else {
                        children.stop_child(&sibling);
                    }
                }
            }
        }
    }
}

fn restart_child(child: &ActorRef, cause: &Arc<Fault>, suspend_first: bool) {
    if suspend_first {
        child.send_system(SystemMessage::Suspend);
    }
    child.send_system(SystemMessage::Recreate {
        cause: Arc::clone(cause),
    });
}

impl Default for SupervisorStrategy {
    fn default() -> Self {
        Self::default_strategy()
    }
}

impl fmt::Debug for SupervisorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorStrategy")
            .field("kind", &self.kind)
            .field("max_restarts", &self.max_restarts)
            .field("within", &self.within)
            .finish_non_exhaustive()
    }
}

/// Restart bookkeeping for one child
#[derive(Debug, Default)]
pub(crate) struct ChildRestartStats {
    /// Restarts granted inside the current window, oldest first
    restarts: VecDeque<Instant>,
    /// Restarts granted in total, used when there is no window
    total: u32,
}

impl ChildRestartStats {
    /// Ask for permission to restart once more.
    pub(crate) fn request_restart_permission(
        &mut self,
        max_restarts: Option<u32>,
        within: Option<Duration>,
    ) -> bool {
        self.request_restart_permission_at(max_restarts, within, Instant::now())
    }

    fn request_restart_permission_at(
        &mut self,
        max_restarts: Option<u32>,
        within: Option<Duration>,
        now: Instant,
    ) -> bool {
        let Some(max) = max_restarts else {
            return true;
        };
        if max == 0 {
            return false;
        }
        match within {
            None => {
                self.total += 1;
                self.total <= max
            }
            Some(window) => {
                while self
                    .restarts
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= window)
                {
                    self.restarts.pop_front();
                }
                if self.restarts.len() < max as usize {
                    self.restarts.push_back(now);
                    true
                } else {
                    false
                }
            }
        }
    }
}
