//! Scheduler configuration loaded from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `BUSJOBS_SCHEDULER_ADDRESS` | `queue:mt-message-queue` |
//! | `BUSJOBS_QUEUES` (comma separated) | `mt-message-queue` |
//! | `BUSJOBS_WORKERS` | per-CPU default of [`JobServerOptions`] |
//! | `BUSJOBS_POLL_INTERVAL_MS` | `1000` |
//! | `BUSJOBS_SHUTDOWN_TIMEOUT_MS` | `15000` |
//! | `BUSJOBS_LEASE_MS` | `300000` |

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jobs::options::{ConfigurationError, DEFAULT_QUEUE_NAME, JobServerOptions};

pub const ENV_SCHEDULER_ADDRESS: &str = "BUSJOBS_SCHEDULER_ADDRESS";
pub const ENV_QUEUES: &str = "BUSJOBS_QUEUES";
pub const ENV_WORKERS: &str = "BUSJOBS_WORKERS";
pub const ENV_POLL_INTERVAL_MS: &str = "BUSJOBS_POLL_INTERVAL_MS";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "BUSJOBS_SHUTDOWN_TIMEOUT_MS";
pub const ENV_LEASE_MS: &str = "BUSJOBS_LEASE_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Endpoint address the scheduler is known by; used in logs
    pub scheduler_address: String,
    pub queues: Vec<String>,
    /// `None` keeps the options default
    pub worker_count: Option<usize>,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Lease granted to a claimed job by in-memory storage
    pub lease_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_address: format!("queue:{DEFAULT_QUEUE_NAME}"),
            queues: vec![DEFAULT_QUEUE_NAME.to_string()],
            worker_count: None,
            poll_interval_ms: 1_000,
            shutdown_timeout_ms: 15_000,
            lease_ms: 300_000,
        }
    }
}

fn parse_setting<T>(key: &str, value: &str) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigurationError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

impl SchedulerConfig {
    /// Read the `BUSJOBS_*` variables; unset ones keep their defaults.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(address) = lookup(ENV_SCHEDULER_ADDRESS) {
            let address = address.trim();
            if address.is_empty() {
                return Err(ConfigurationError::InvalidSetting {
                    key: ENV_SCHEDULER_ADDRESS.to_string(),
                    value: address.to_string(),
                    reason: "address must not be empty".to_string(),
                });
            }
            config.scheduler_address = address.to_string();
        }
        if let Some(queues) = lookup(ENV_QUEUES) {
            // an empty list is left for start-time validation
            config.queues = queues
                .split(',')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            config.worker_count = Some(parse_setting(ENV_WORKERS, &workers)?);
        }
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS) {
            config.poll_interval_ms = parse_setting(ENV_POLL_INTERVAL_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_SHUTDOWN_TIMEOUT_MS) {
            config.shutdown_timeout_ms = parse_setting(ENV_SHUTDOWN_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_LEASE_MS) {
            config.lease_ms = parse_setting(ENV_LEASE_MS, &ms)?;
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    /// Copy these settings over `options`.
    pub fn apply(&self, options: &mut JobServerOptions) {
        options.queues = self.queues.clone();
        if let Some(workers) = self.worker_count {
            options.worker_count = workers;
        }
        options.poll_interval = self.poll_interval();
        options.shutdown_timeout = self.shutdown_timeout();
    }
}
