//! Scheduling of mailboxes onto executors.
//!
//! - [`Dispatcher`] decides when a mailbox runs and guarantees that it never
//!   runs on two threads at once
//! - [`Executor`] is either the worker [`ThreadPool`](crate::pool::ThreadPool)
//!   or a calling-thread executor for deterministic tests

pub mod dispatcher;
pub mod executor;

pub use dispatcher::{Dispatcher, Schedulable};
pub use executor::{CallingThreadExecutor, Executor};
