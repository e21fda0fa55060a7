//! Runtime settings.
//!
//! The runtime consumes an already-parsed [`Settings`] value. Every field
//! has a default, so a partial TOML document (or none at all) yields a
//! usable configuration.
//!
//! ```
//! use troupe_core::config::{ExecutorKind, Settings};
//!
//! let settings = Settings::from_toml_str(
//!     r#"
//!     name = "orders"
//!
//!     [dispatcher]
//!     executor = "calling-thread"
//!     throughput = 10
//!
//!     [supervision]
//!     max-restarts = 3
//!     within = 1000
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(settings.name, "orders");
//! assert_eq!(settings.dispatcher.executor, ExecutorKind::CallingThread);
//! assert_eq!(settings.supervision.max_restarts, Some(3));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which executor runs scheduled mailboxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// A pool of background worker threads
    ThreadPool,
    /// No background threads; work runs when the owner drains it
    CallingThread,
}

/// Dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DispatcherSettings {
    /// Executor implementation
    #[serde(default = "default_executor")]
    pub executor: ExecutorKind,

    /// Number of worker threads for the thread-pool executor
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Name prefix for worker threads
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Maximum number of user messages processed per mailbox run
    #[serde(default = "default_throughput")]
    pub throughput: usize,

    /// Optional time budget per mailbox run (milliseconds)
    #[serde(default)]
    pub throughput_deadline: Option<u64>,

    /// Maximum number of system messages drained per mailbox run beyond
    /// the batch already queued when the run started
    #[serde(default = "default_system_message_limit")]
    pub system_message_limit: usize,
}

fn default_executor() -> ExecutorKind {
    ExecutorKind::ThreadPool
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

fn default_thread_name_prefix() -> String {
    "troupe-dispatcher".to_string()
}

fn default_throughput() -> usize {
    5
}

fn default_system_message_limit() -> usize {
    1000
}

impl DispatcherSettings {
    /// The per-run time budget, if any.
    pub fn throughput_deadline(&self) -> Option<Duration> {
        self.throughput_deadline.map(Duration::from_millis)
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            executor: default_executor(),
            worker_threads: default_worker_threads(),
            thread_name_prefix: default_thread_name_prefix(),
            throughput: default_throughput(),
            throughput_deadline: None,
            system_message_limit: default_system_message_limit(),
        }
    }
}

/// User queue implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MailboxKind {
    /// Unbounded FIFO
    Unbounded,
    /// FIFO rejecting messages beyond `capacity`
    Bounded,
}

/// Default mailbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MailboxSettings {
    /// Queue implementation
    #[serde(rename = "type", default = "default_mailbox_kind")]
    pub kind: MailboxKind,

    /// Capacity used by bounded mailboxes
    #[serde(default = "default_mailbox_capacity")]
    pub capacity: usize,
}

fn default_mailbox_kind() -> MailboxKind {
    MailboxKind::Unbounded
}

fn default_mailbox_capacity() -> usize {
    1000
}

impl Default for MailboxSettings {
    fn default() -> Self {
        Self {
            kind: default_mailbox_kind(),
            capacity: default_mailbox_capacity(),
        }
    }
}

/// Restart window applied by the default supervisor strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SupervisionSettings {
    /// Maximum restarts of one child inside `within`; absent means unlimited
    #[serde(default)]
    pub max_restarts: Option<u32>,

    /// Window for counting restarts (milliseconds); absent means forever
    #[serde(default)]
    pub within: Option<u64>,
}

impl SupervisionSettings {
    /// The restart counting window, if any.
    pub fn within(&self) -> Option<Duration> {
        self.within.map(Duration::from_millis)
    }
}

/// Settings for one actor system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// System name, used as the root of every actor path
    #[serde(default = "default_name")]
    pub name: String,

    /// Dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    /// Default mailbox for actors whose props do not choose one
    #[serde(default)]
    pub mailbox: MailboxSettings,

    /// Default restart window
    #[serde(default)]
    pub supervision: SupervisionSettings,

    /// How many dead letters are logged before going quiet (0 disables)
    #[serde(default = "default_log_dead_letters")]
    pub log_dead_letters: usize,
}

fn default_name() -> String {
    "troupe".to_string()
}

fn default_log_dead_letters() -> usize {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: default_name(),
            dispatcher: DispatcherSettings::default(),
            mailbox: MailboxSettings::default(),
            supervision: SupervisionSettings::default(),
            log_dead_letters: default_log_dead_letters(),
        }
    }
}

impl Settings {
    /// Parse and validate settings from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let settings: Settings =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings for deterministic tests: calling-thread executor, no dead
    /// letter logging.
    pub fn calling_thread() -> Self {
        let mut settings = Self::default();
        settings.dispatcher.executor = ExecutorKind::CallingThread;
        settings.log_dead_letters = 0;
        settings
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(ConfigError::Invalid {
                key: "name",
                reason: format!("`{}` is not a valid system name", self.name),
            });
        }
        if self.dispatcher.throughput == 0 {
            return Err(ConfigError::Invalid {
                key: "dispatcher.throughput",
                reason: "must be at least 1".into(),
            });
        }
        if self.dispatcher.executor == ExecutorKind::ThreadPool
            && self.dispatcher.worker_threads == 0
        {
            return Err(ConfigError::Invalid {
                key: "dispatcher.worker-threads",
                reason: "must be at least 1".into(),
            });
        }
        if self.dispatcher.system_message_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "dispatcher.system-message-limit",
                reason: "must be at least 1".into(),
            });
        }
        if self.mailbox.kind == MailboxKind::Bounded && self.mailbox.capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "mailbox.capacity",
                reason: "bounded mailboxes need a capacity of at least 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.name, "troupe");
        assert_eq!(settings.dispatcher.executor, ExecutorKind::ThreadPool);
        assert_eq!(settings.dispatcher.throughput, 5);
        assert_eq!(settings.dispatcher.throughput_deadline(), None);
        assert_eq!(settings.mailbox.kind, MailboxKind::Unbounded);
        assert_eq!(settings.supervision.max_restarts, None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.dispatcher.throughput, 5);
        assert_eq!(settings.log_dead_letters, 10);
    }

    #[test]
    fn test_parse_full_document() {
        let settings = Settings::from_toml_str(
            r#"
            name = "billing"
            log-dead-letters = 0

            [dispatcher]
            worker-threads = 2
            throughput = 20
            throughput-deadline = 50

            [mailbox]
            type = "bounded"
            capacity = 16

            [supervision]
            max-restarts = 3
            within = 1000
            "#,
        )
        .unwrap();

        assert_eq!(settings.name, "billing");
        assert_eq!(settings.dispatcher.worker_threads, 2);
        assert_eq!(
            settings.dispatcher.throughput_deadline(),
            Some(Duration::from_millis(50))
        );
        assert_eq!(settings.mailbox.kind, MailboxKind::Bounded);
        assert_eq!(settings.mailbox.capacity, 16);
        assert_eq!(settings.supervision.within(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_rejects_zero_throughput() {
        let err = Settings::from_toml_str("[dispatcher]\nthroughput = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "dispatcher.throughput",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_zero_capacity_bounded_mailbox() {
        let err =
            Settings::from_toml_str("[mailbox]\ntype = \"bounded\"\ncapacity = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "mailbox.capacity",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_malformed_document() {
        let err = Settings::from_toml_str("[dispatcher\nthroughput = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
