//! Client side of the scheduler: enqueue messages for later delivery.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use busjobs_core::JobId;

use crate::jobs::options::{ConfigurationError, DEFAULT_QUEUE_NAME, validate_queue_name};
use crate::jobs::store::{JobStorage, StorageError};
use crate::jobs::types::{Job, JobKind, RetryPolicy};

/// Schedules bus messages as jobs on the scheduler queue.
///
/// The jobs are delivered by a [`BusActivator`](super::bus_activator::BusActivator)
/// once a scheduler polling the same queue picks them up.
#[derive(Clone)]
pub struct MessageScheduler {
    storage: Arc<dyn JobStorage>,
    queue: String,
    retry_policy: RetryPolicy,
}

impl MessageScheduler {
    /// Scheduler writing to the default queue.
    pub fn new(storage: Arc<dyn JobStorage>) -> Self {
        Self {
            storage,
            queue: DEFAULT_QUEUE_NAME.to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn on_queue(
        storage: Arc<dyn JobStorage>,
        queue: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let queue = queue.into();
        validate_queue_name(&queue)?;
        Ok(Self {
            queue,
            ..Self::new(storage)
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Deliver `payload` as `message_type` to `destination` at `at`.
    pub fn schedule_send(
        &self,
        destination: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<JobId, StorageError> {
        let job = Job::new(
            self.queue.as_str(),
            JobKind::scheduled_message(destination, message_type),
            payload,
        )
        .scheduled_at(at)
        .with_retry_policy(self.retry_policy.clone());

        let job_id = self.storage.enqueue(job)?;
        debug!(job_id = %job_id, queue = %self.queue, at = %at, "scheduled send");
        Ok(job_id)
    }

    /// Cancel a send that has not been delivered yet.
    pub fn cancel_scheduled_send(&self, job_id: JobId) -> Result<(), StorageError> {
        self.storage.cancel(job_id)?;
        debug!(job_id = %job_id, "cancelled scheduled send");
        Ok(())
    }
}

impl core::fmt::Debug for MessageScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageScheduler")
            .field("queue", &self.queue)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}
