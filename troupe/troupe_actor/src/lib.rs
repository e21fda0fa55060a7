#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # Troupe Actor
//!
//! The actor execution substrate of the Troupe runtime.
//!
//! This crate multiplexes many single-threaded actors over a shared pool of
//! worker threads, including:
//!
//! - Mailboxes with a lock-free system queue and pluggable user queues
//! - A dispatcher that runs each mailbox on at most one thread at a time
//! - Actor cells with restart, stop and failure handling
//! - Supervision strategies and death watch across the actor hierarchy
//!
//! ## Integration with Other Troupe Crates
//!
//! - **troupe_core**: Identifiers, error types and the parsed [`Settings`]
//!   the system is started with
//!
//! [`Settings`]: troupe_core::Settings

/// Actors, supervision, death watch and the actor system
pub mod actor;

/// Scheduling of mailboxes onto executors
pub mod dispatch;

/// Message queues and the mailbox status word
pub mod mailbox;

/// User envelopes and runtime control messages
pub mod message;

/// Worker thread pool
pub mod pool;

// Re-export key types for easier access
pub use actor::{
    Actor, ActorRef, ActorSystem, Context, DeadLetter, DeadLetterReason, Directive, Fault,
    FaultKind, Lifecycle, Props, StrategyKind, SupervisorStrategy,
};
pub use mailbox::MailboxType;
pub use message::{Envelope, Kill, PoisonPill, Terminated};
pub use pool::ThreadPool;
