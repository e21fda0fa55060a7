//! The actor system: entry point of the runtime.
//!
//! An [`ActorSystem`] owns the dispatcher, the dead-letter office and the
//! two guardians. Every actor created through [`ActorSystem::actor_of`] is a
//! child of the user guardian; terminating the user guardian terminates the
//! system.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::{Condvar, Mutex};
use troupe_core::config::{ExecutorKind, Settings};
use troupe_core::error::{ActorError, Error};
use troupe_core::id::SystemId;

use super::actor_ref::ActorRef;
use super::cell::ActorCell;
use super::dead_letters::DeadLetterOffice;
use super::fault::Fault;
use super::guardian::{RootGuardian, UserGuardian};
use super::props::Props;
use super::supervisor::SupervisorStrategy;
use crate::dispatch::{Dispatcher, Executor};
use crate::mailbox::{MailboxType, RunLimits};
use crate::message::SystemMessage;
use crate::pool::{ThreadPoolError, ThreadPoolStats};

/// How long dropping a live system waits for it to terminate.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// State shared by every cell of one system.
pub(crate) struct SystemShared {
    pub(crate) id: SystemId,
    pub(crate) name: String,
    pub(crate) settings: Settings,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) dead_letters: Arc<DeadLetterOffice>,
    pub(crate) default_strategy: SupervisorStrategy,
    pub(crate) default_mailbox: MailboxType,
    terminated: Mutex<bool>,
    termination: Condvar,
    cause: Mutex<Option<Arc<Fault>>>,
}

impl SystemShared {
    pub(crate) fn on_root_terminated(&self) {
        let mut terminated = self.terminated.lock();
        *terminated = true;
        self.termination.notify_all();
        info!("Actor system [{}] terminated", self.name);
    }

    /// Remember why the system went down. The first cause wins.
    pub(crate) fn record_termination_cause(&self, cause: Arc<Fault>) {
        self.cause.lock().get_or_insert(cause);
    }
}

/// A hierarchy of actors sharing one dispatcher.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use troupe_actor::{Actor, ActorSystem, Context, Envelope, Fault, Props};
/// use troupe_core::Settings;
///
/// struct Counter(Arc<AtomicUsize>);
///
/// impl Actor for Counter {
///     fn receive(&mut self, _ctx: &mut Context<'_>, envelope: Envelope) -> Result<(), Fault> {
///         if let Some(n) = envelope.downcast_ref::<usize>() {
///             self.0.fetch_add(*n, Ordering::SeqCst);
///         }
///         Ok(())
///     }
/// }
///
/// let total = Arc::new(AtomicUsize::new(0));
/// let system = ActorSystem::with_settings(Settings::calling_thread())?;
/// let shared = Arc::clone(&total);
/// let counter = system.actor_of(Props::new(move || Counter(Arc::clone(&shared))), "counter")?;
///
/// counter.tell(2usize, None);
/// counter.tell(3usize, None);
/// system.run_until_idle();
/// assert_eq!(total.load(Ordering::SeqCst), 5);
/// # Ok::<(), troupe_core::Error>(())
/// ```
pub struct ActorSystem {
    shared: Arc<SystemShared>,
    // Owns the whole hierarchy
    root: Arc<ActorCell>,
    user_guardian: ActorRef,
}

impl ActorSystem {
    /// Start a system with default settings.
    pub fn new() -> Result<Self, Error> {
        Self::with_settings(Settings::default())
    }

    /// Start a system with `settings`.
    pub fn with_settings(settings: Settings) -> Result<Self, Error> {
        settings.validate()?;

        let executor = Executor::from_settings(&settings.dispatcher).map_err(|e| match e {
            ThreadPoolError::Spawn(reason) => {
                Error::Runtime(format!("failed to start dispatcher: {}", reason))
            }
            other => Error::Dispatch(other.into()),
        })?;
        let dispatcher = Arc::new(Dispatcher::new(
            executor,
            RunLimits::from_settings(&settings.dispatcher),
        ));

        let shared = Arc::new(SystemShared {
            id: SystemId::new(),
            name: settings.name.clone(),
            dispatcher,
            dead_letters: Arc::new(DeadLetterOffice::new(settings.log_dead_letters)),
            default_strategy: SupervisorStrategy::from_settings(&settings.supervision),
            default_mailbox: MailboxType::from_settings(&settings.mailbox),
            settings,
            terminated: Mutex::new(false),
            termination: Condvar::new(),
            cause: Mutex::new(None),
        });

        let root = ActorCell::new(
            Arc::clone(&shared),
            None,
            format!("troupe://{}", shared.name),
            Props::new(|| RootGuardian),
        );
        root.start();
        let user_guardian = root.create_child(Props::new(|| UserGuardian), "user")?;
        root.self_ref().send_system(SystemMessage::Watch {
            watchee: user_guardian.clone(),
            watcher: root.self_ref().clone(),
        });

        info!(
            "Actor system [{}] started (id {})",
            shared.name,
            shared.id.short()
        );
        Ok(Self {
            shared,
            root,
            user_guardian,
        })
    }

    /// Create a top-level actor named `name`.
    pub fn actor_of(&self, props: Props, name: &str) -> Result<ActorRef, ActorError> {
        match self.user_guardian.cell() {
            Some(guardian) if !self.is_terminated() => guardian.create_child(props, name),
            _ => Err(ActorError::SystemTerminated(self.shared.name.clone())),
        }
    }

    /// Stop `actor`.
    pub fn stop(&self, actor: &ActorRef) {
        match self.user_guardian.cell() {
            Some(guardian) => guardian.stop_child(actor),
            None => actor.stop(),
        }
    }

    /// The parent of every top-level actor.
    pub fn guardian(&self) -> &ActorRef {
        &self.user_guardian
    }

    /// Stop every actor and then the system itself. Returns immediately; use
    /// [`ActorSystem::await_termination`] to wait.
    pub fn terminate(&self) {
        self.user_guardian.stop();
    }

    /// Wait until the system has terminated. Returns false on timeout.
    ///
    /// With the calling-thread executor this drains pending work first, as
    /// nothing else would.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        if self.shared.settings.dispatcher.executor == ExecutorKind::CallingThread {
            self.run_until_idle();
            return self.is_terminated();
        }

        let deadline = Instant::now() + timeout;
        let mut terminated = self.shared.terminated.lock();
        while !*terminated {
            if self
                .shared
                .termination
                .wait_until(&mut terminated, deadline)
                .timed_out()
            {
                return *terminated;
            }
        }
        true
    }

    /// Whether the root guardian has terminated.
    pub fn is_terminated(&self) -> bool {
        *self.shared.terminated.lock()
    }

    /// The fault that took the root guardian down, if any.
    pub fn termination_cause(&self) -> Option<Arc<Fault>> {
        self.shared.cause.lock().clone()
    }

    /// Run queued mailboxes on this thread until there is no work left.
    /// Returns the number of runs. Only the calling-thread executor has
    /// anything to run.
    pub fn run_until_idle(&self) -> usize {
        self.shared.dispatcher.run_until_idle()
    }

    /// The dead-letter office of this system.
    pub fn dead_letters(&self) -> &DeadLetterOffice {
        &self.shared.dead_letters
    }

    /// Settings the system was started with.
    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// System name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Dispatcher task counters.
    pub fn pool_stats(&self) -> ThreadPoolStats {
        self.shared.dispatcher.stats()
    }
}

impl Drop for ActorSystem {
    fn drop(&mut self) {
        if !self.is_terminated() {
            self.terminate();
            if !self.await_termination(TERMINATION_GRACE) {
                warn!(
                    "Actor system [{}] did not terminate within {:?} ({:?})",
                    self.shared.name,
                    TERMINATION_GRACE,
                    self.root
                );
            }
        }
        self.shared.dispatcher.shutdown();
    }
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSystem")
            .field("name", &self.shared.name)
            .field("id", &self.shared.id)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::context::Context;
    use crate::actor::Actor;
    use crate::message::Envelope;
    use troupe_core::config::MailboxKind;

    struct Sink;

    impl Actor for Sink {
        fn receive(&mut self, ctx: &mut Context<'_>, envelope: Envelope) -> Result<(), Fault> {
            ctx.unhandled(envelope)
        }
    }

    fn system() -> ActorSystem {
        ActorSystem::with_settings(Settings::calling_thread()).unwrap()
    }

    #[test]
    fn test_guardian_paths() {
        let system = system();
        system.run_until_idle();
        assert_eq!(system.guardian().path(), "troupe://troupe/user");
        assert_eq!(system.root.self_ref().path(), "troupe://troupe");

        let sink = system.actor_of(Props::new(|| Sink), "sink").unwrap();
        assert_eq!(sink.path(), "troupe://troupe/user/sink");
        assert_eq!(sink.name(), "sink");
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let mut settings = Settings::calling_thread();
        settings.mailbox.kind = MailboxKind::Bounded;
        settings.mailbox.capacity = 0;
        assert!(matches!(
            ActorSystem::with_settings(settings),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_terminate_stops_everything() {
        let system = system();
        let sink = system.actor_of(Props::new(|| Sink), "sink").unwrap();
        system.run_until_idle();
        assert!(!system.is_terminated());

        system.terminate();
        assert!(system.await_termination(Duration::from_secs(1)));
        assert!(sink.is_terminated());
        assert!(system.root.self_ref().is_terminated());
        assert!(system.termination_cause().is_none());
        assert_eq!(
            system.actor_of(Props::new(|| Sink), "late").unwrap_err(),
            ActorError::SystemTerminated("troupe".into())
        );
    }
}
