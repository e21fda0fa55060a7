//! Worker threads that run scheduled mailboxes.

pub mod thread;

pub use thread::{ThreadPool, ThreadPoolConfig, ThreadPoolError, ThreadPoolStats};
