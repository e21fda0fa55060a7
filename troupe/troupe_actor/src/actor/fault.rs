//! Faults raised by actor code.
//!
//! A [`Fault`] is what an actor hands to its supervisor. It is never returned
//! to the code that sent the failing message; supervision decides what
//! happens next.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use anyhow::anyhow;

use super::actor_ref::ActorRef;
use crate::pool::thread::panic_message;

/// What kind of failure a [`Fault`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// A handler returned an error
    Error,
    /// A handler panicked
    Panic,
    /// Construction or `pre_start` failed
    Initialization,
    /// The actor processed a [`Kill`](crate::message::Kill) message
    Killed,
    /// The actor left a `Terminated` message unhandled
    DeathPact,
}

/// An actor failure, routed to the actor's supervisor.
///
/// Any `std::error::Error` converts into a `Fault`, so handlers can use `?`
/// freely:
///
/// ```
/// use troupe_actor::actor::{Fault, FaultKind};
///
/// fn parse(input: &str) -> Result<u32, Fault> {
///     Ok(input.parse::<u32>()?)
/// }
///
/// let fault = parse("x").unwrap_err();
/// assert_eq!(fault.kind(), FaultKind::Error);
/// assert!(fault.is::<std::num::ParseIntError>());
/// ```
pub struct Fault {
    kind: FaultKind,
    error: anyhow::Error,
}

impl Fault {
    /// A fault carrying just a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            kind: FaultKind::Error,
            error: anyhow::Error::msg(message),
        }
    }

    /// Wrap an [`anyhow::Error`].
    pub fn from_anyhow(error: anyhow::Error) -> Self {
        Self {
            kind: FaultKind::Error,
            error,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self {
            kind: FaultKind::Panic,
            error: anyhow!("{}", panic_message(&*payload)),
        }
    }

    pub(crate) fn into_initialization(self) -> Self {
        Self {
            kind: FaultKind::Initialization,
            error: self.error,
        }
    }

    pub(crate) fn killed(actor: &ActorRef) -> Self {
        Self {
            kind: FaultKind::Killed,
            error: anyhow!("{} was killed", actor),
        }
    }

    pub(crate) fn death_pact(actor: &ActorRef) -> Self {
        Self {
            kind: FaultKind::DeathPact,
            error: anyhow!("monitored actor {} terminated", actor),
        }
    }

    /// The kind of failure.
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// The underlying error.
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    /// Borrow the underlying error as an `E`, if that is what it is.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Whether the underlying error is an `E`.
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.is::<E>()
    }
}

impl<E> From<E> for Fault
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self {
            kind: FaultKind::Error,
            error: anyhow::Error::new(error),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FaultKind::Panic => write!(f, "panicked: {}", self.error),
            FaultKind::Initialization => write!(f, "initialization failed: {:#}", self.error),
            _ => write!(f, "{:#}", self.error),
        }
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("kind", &self.kind)
            .field("error", &format_args!("{:#}", self.error))
            .finish()
    }
}

/// Run actor code, turning a panic into a [`FaultKind::Panic`] fault.
pub(crate) fn catch_fault<T, F>(f: F) -> Result<T, Fault>
where
    F: FnOnce() -> Result<T, Fault>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Fault::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_std_errors_convert() {
        let fault: Fault = io::Error::new(io::ErrorKind::Other, "disk on fire").into();
        assert_eq!(fault.kind(), FaultKind::Error);
        assert!(fault.is::<io::Error>());
        assert_eq!(
            fault.downcast_ref::<io::Error>().map(|e| e.kind()),
            Some(io::ErrorKind::Other)
        );
        assert_eq!(fault.to_string(), "disk on fire");
    }

    #[test]
    fn test_catch_fault_captures_panics() {
        let result: Result<(), Fault> = catch_fault(|| panic!("kaboom"));
        let fault = result.unwrap_err();
        assert_eq!(fault.kind(), FaultKind::Panic);
        assert_eq!(fault.to_string(), "panicked: kaboom");

        let formatted: Result<(), Fault> = catch_fault(|| panic!("code {}", 7));
        assert_eq!(formatted.unwrap_err().to_string(), "panicked: code 7");
    }

    #[test]
    fn test_catch_fault_passes_results_through() {
        assert_eq!(catch_fault(|| Ok::<_, Fault>(3)).unwrap(), 3);
        let fault = catch_fault(|| Err::<(), _>(Fault::msg("nope"))).unwrap_err();
        assert_eq!(fault.to_string(), "nope");
    }

    #[test]
    fn test_initialization_keeps_error() {
        let fault = Fault::msg("no database").into_initialization();
        assert_eq!(fault.kind(), FaultKind::Initialization);
        assert!(fault.is::<&str>());
        assert_eq!(fault.to_string(), "initialization failed: no database");
    }
}
