//! Background job server options.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use busjobs_core::{IdGenerator, ServerName};

use super::activator::JobActivator;
use super::filter::{FilterProvider, GlobalFilters};
use super::process::BackgroundProcess;
use super::timezone::{TimeZoneResolver, UtcResolver};

/// Queue polled when nothing else is configured.
pub const DEFAULT_QUEUE_NAME: &str = "mt-message-queue";

pub const MAX_QUEUE_NAME_LEN: usize = 100;

/// Invalid server configuration, detected when a server starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("at least one queue must be configured")]
    EmptyQueues,
    #[error("invalid queue name '{name}': {reason}")]
    InvalidQueueName { name: String, reason: String },
    #[error("queue '{0}' is listed more than once")]
    DuplicateQueue(String),
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("server name must not be empty")]
    EmptyServerName,
    #[error("no job activator configured")]
    MissingActivator,
    #[error("invalid setting {key}='{value}': {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },
}

/// Check a queue name: 1..=100 chars of `[a-z0-9_-]`.
pub fn validate_queue_name(name: &str) -> Result<(), ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidQueueName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(invalid("longer than 100 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(invalid("only lowercase letters, digits, '_' and '-' are allowed"));
    }
    Ok(())
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 5)
        .unwrap_or(4)
        .min(20)
}

/// Configuration of one [`BackgroundJobServer`](super::server::BackgroundJobServer).
///
/// Building options never fails; [`JobServerOptions::validate`] runs when the
/// server starts. The server takes the options by value, so they are frozen
/// from then on.
#[derive(Clone)]
pub struct JobServerOptions {
    pub server_name: ServerName,
    /// Queues in poll priority order
    pub queues: Vec<String>,
    pub worker_count: usize,
    /// Sleep between polls when no job is due
    pub poll_interval: Duration,
    /// Grace period `dispose()` waits for in-flight jobs
    pub shutdown_timeout: Duration,
    pub time_zone_resolver: Arc<dyn TimeZoneResolver>,
    pub filter_provider: Arc<dyn FilterProvider>,
    pub activator: Option<Arc<dyn JobActivator>>,
    /// Run on their own threads for the server's lifetime
    pub background_processes: Vec<Arc<dyn BackgroundProcess>>,
}

impl JobServerOptions {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

    /// Defaults with a freshly generated server name.
    pub fn new(ids: &dyn IdGenerator) -> Self {
        Self {
            server_name: ServerName::generate(ids),
            queues: vec![DEFAULT_QUEUE_NAME.to_string()],
            worker_count: default_worker_count(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            shutdown_timeout: Self::DEFAULT_SHUTDOWN_TIMEOUT,
            time_zone_resolver: Arc::new(UtcResolver),
            filter_provider: Arc::new(GlobalFilters::new()),
            activator: None,
            background_processes: Vec::new(),
        }
    }

    pub fn with_server_name(mut self, name: ServerName) -> Self {
        self.server_name = name;
        self
    }

    pub fn with_queues<I, Q>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_time_zone_resolver(mut self, resolver: Arc<dyn TimeZoneResolver>) -> Self {
        self.time_zone_resolver = resolver;
        self
    }

    pub fn with_filter_provider(mut self, provider: Arc<dyn FilterProvider>) -> Self {
        self.filter_provider = provider;
        self
    }

    pub fn with_activator(mut self, activator: Arc<dyn JobActivator>) -> Self {
        self.activator = Some(activator);
        self
    }

    pub fn with_background_process(mut self, process: Arc<dyn BackgroundProcess>) -> Self {
        self.background_processes.push(process);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.server_name.is_empty() {
            return Err(ConfigurationError::EmptyServerName);
        }
        if self.queues.is_empty() {
            return Err(ConfigurationError::EmptyQueues);
        }

        let mut seen = HashSet::new();
        for queue in &self.queues {
            validate_queue_name(queue)?;
            if !seen.insert(queue.as_str()) {
                return Err(ConfigurationError::DuplicateQueue(queue.clone()));
            }
        }

        if self.worker_count == 0 {
            return Err(ConfigurationError::NoWorkers);
        }
        if self.activator.is_none() {
            return Err(ConfigurationError::MissingActivator);
        }
        Ok(())
    }
}

impl core::fmt::Debug for JobServerOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobServerOptions")
            .field("server_name", &self.server_name)
            .field("queues", &self.queues)
            .field("worker_count", &self.worker_count)
            .field("poll_interval", &self.poll_interval)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("activator", &self.activator.is_some())
            .field(
                "background_processes",
                &self.background_processes.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use busjobs_core::SequentialIdGenerator;

    use super::*;
    use crate::jobs::activator::activator_fn;
    use crate::jobs::types::JobOutcome;

    fn options() -> JobServerOptions {
        JobServerOptions::new(&SequentialIdGenerator::new())
            .with_activator(Arc::new(activator_fn(|_, _| JobOutcome::Succeeded)))
    }

    #[test]
    fn defaults_use_single_default_queue_and_generated_name() {
        let options = JobServerOptions::new(&SequentialIdGenerator::new());
        assert_eq!(options.queues, vec![DEFAULT_QUEUE_NAME.to_string()]);
        assert_eq!(
            options.server_name.as_str(),
            "bus-scheduler-00000000000000000000000000000001"
        );
        assert!(options.worker_count >= 1 && options.worker_count <= 20);
        assert!(options.activator.is_none());
    }

    #[test]
    fn defaults_without_activator_fail_validation() {
        let defaults = JobServerOptions::new(&SequentialIdGenerator::new());
        assert_eq!(defaults.validate(), Err(ConfigurationError::MissingActivator));
        assert_eq!(options().validate(), Ok(()));
    }

    #[test]
    fn empty_queue_set_is_rejected() {
        let options = options().with_queues(Vec::<String>::new());
        assert_eq!(options.validate(), Err(ConfigurationError::EmptyQueues));
    }

    #[test]
    fn malformed_and_duplicate_queue_names_are_rejected() {
        assert!(matches!(
            options().with_queues(["Critical"]).validate(),
            Err(ConfigurationError::InvalidQueueName { .. })
        ));
        assert!(matches!(
            options().with_queues(["ok", ""]).validate(),
            Err(ConfigurationError::InvalidQueueName { .. })
        ));
        assert!(matches!(
            options().with_queues(["x".repeat(101)]).validate(),
            Err(ConfigurationError::InvalidQueueName { .. })
        ));
        assert_eq!(
            options().with_queues(["a", "b", "a"]).validate(),
            Err(ConfigurationError::DuplicateQueue("a".to_string()))
        );
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert_eq!(
            options().with_worker_count(0).validate(),
            Err(ConfigurationError::NoWorkers)
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: any name drawn from the allowed alphabet validates.
            #[test]
            fn well_formed_queue_names_validate(name in "[a-z0-9_-]{1,100}") {
                prop_assert!(validate_queue_name(&name).is_ok());
            }

            /// Property: an uppercase letter anywhere is rejected.
            #[test]
            fn uppercase_queue_names_are_rejected(
                prefix in "[a-z]{0,10}",
                upper in "[A-Z]",
                suffix in "[a-z]{0,10}",
            ) {
                let name = format!("{prefix}{upper}{suffix}");
                prop_assert!(validate_queue_name(&name).is_err());
            }
        }
    }
}
