#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # Troupe Core
//!
//! Shared building blocks for the Troupe actor runtime: strongly-typed
//! identifiers, the operational error hierarchy, and the settings object the
//! runtime is configured with.
//!
//! ## Crate Structure
//!
//! - **id**: Strongly-typed identifier types
//! - **error**: Error types for runtime operations
//! - **config**: Parsed runtime settings

pub mod config;
pub mod error;
pub mod id;

// Re-export key types for convenience
pub use config::{
    DispatcherSettings, ExecutorKind, MailboxKind, MailboxSettings, Settings, SupervisionSettings,
};
pub use error::{ActorError, ConfigError, DispatchError, Error, Result};
pub use id::{ActorUid, Id, SystemId};
