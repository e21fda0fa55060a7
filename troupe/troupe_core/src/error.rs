//! Error types for the Troupe runtime.
//!
//! Errors are organized by subsystem, each with its own enum, and the root
//! `Error` type wraps any of them so callers can handle failures uniformly
//! at the top level.
//!
//! These are *operational* errors returned from runtime APIs such as
//! creating an actor. Faults raised by actor code itself never surface as
//! these types; they are routed through supervision instead.

use thiserror::Error;

/// Root error type for the Troupe runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Actor creation and addressing errors
    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dispatcher and worker pool errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// General runtime errors
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Errors raised when creating or addressing actors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActorError {
    /// A live, reserved or restarting child already uses this name
    #[error("actor name [{0}] is not unique")]
    NameTaken(String),

    /// The name is empty, starts with `$` or contains a path separator
    #[error("invalid actor name [{0}]: {1}")]
    InvalidName(String, &'static str),

    /// The parent is stopping and does not accept new children
    #[error("parent [{0}] is terminating, cannot create child [{1}]")]
    ParentTerminating(String, String),

    /// The actor system has already terminated
    #[error("actor system [{0}] has terminated")]
    SystemTerminated(String),
}

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings document could not be parsed
    #[error("failed to parse settings: {0}")]
    Parse(String),

    /// A setting has a value outside its allowed range
    #[error("invalid setting `{key}`: {reason}")]
    Invalid {
        /// Dotted path of the offending key
        key: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Errors raised when handing work to an executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The executor is shutting down and accepts no more work
    #[error("executor is shutting down")]
    ShuttingDown,

    /// The executor's task queue is full
    #[error("executor queue is full")]
    QueueFull,
}

/// Result type used throughout the Troupe runtime.
pub type Result<T> = std::result::Result<T, Error>;
