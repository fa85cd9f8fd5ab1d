//! Job storage abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use busjobs_core::{JobId, ServerName};

use super::types::{DeadLetterEntry, Job, JobOutcome, JobStatus};

/// Job storage as seen by a background job server.
///
/// Storage is shared by every server using it, possibly across processes, so
/// `claim_next_due` must be atomic: a job is handed to at most one worker
/// until its lease expires. Retry policy and lease expiry are storage
/// concerns.
pub trait JobStorage: Send + Sync {
    /// Add a new job.
    fn enqueue(&self, job: Job) -> Result<JobId, StorageError>;

    fn get(&self, job_id: JobId) -> Result<Option<Job>, StorageError>;

    /// Atomically claim the next due job. `queues` are checked in order; within
    /// a queue the oldest job wins. Returns `None` when nothing is due.
    fn claim_next_due(
        &self,
        queues: &[String],
        server: &ServerName,
    ) -> Result<Option<Job>, StorageError>;

    /// Record the outcome of `claimed`, as returned by `claim_next_due`, and
    /// return the job's new status.
    ///
    /// Refused with [`StorageError::LeaseLost`] once the job has been claimed
    /// again, so a worker whose lease expired cannot finish another
    /// server's attempt.
    fn record_result(&self, claimed: &Job, outcome: JobOutcome) -> Result<JobStatus, StorageError>;

    /// Cancel a job that has not completed yet.
    fn cancel(&self, job_id: JobId) -> Result<(), StorageError>;

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, StorageError>;

    /// Move a dead-lettered job back to pending with a fresh attempt count.
    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, StorageError>;

    fn stats(&self) -> Result<JobStats, StorageError>;
}

impl<S> JobStorage for Arc<S>
where
    S: JobStorage + ?Sized,
{
    fn enqueue(&self, job: Job) -> Result<JobId, StorageError> {
        (**self).enqueue(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, StorageError> {
        (**self).get(job_id)
    }

    fn claim_next_due(
        &self,
        queues: &[String],
        server: &ServerName,
    ) -> Result<Option<Job>, StorageError> {
        (**self).claim_next_due(queues, server)
    }

    fn record_result(&self, claimed: &Job, outcome: JobOutcome) -> Result<JobStatus, StorageError> {
        (**self).record_result(claimed, outcome)
    }

    fn cancel(&self, job_id: JobId) -> Result<(), StorageError> {
        (**self).cancel(job_id)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, StorageError> {
        (**self).list_dead_letters(limit)
    }

    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, StorageError> {
        (**self).retry_dead_letter(job_id)
    }

    fn stats(&self) -> Result<JobStats, StorageError> {
        (**self).stats()
    }
}

/// Job storage error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {job_id} is not processing (status: {status:?})")]
    NotProcessing { job_id: JobId, status: JobStatus },
    #[error("job {job_id} attempt {attempt} lost its lease to {holder:?}")]
    LeaseLost {
        job_id: JobId,
        attempt: u32,
        holder: Option<ServerName>,
    },
    #[error("job {0} already finished")]
    AlreadyFinished(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub cancelled: usize,
}

/// In-memory job storage for tests/dev.
///
/// Claims run under the write lock, which makes them atomic within this
/// process.
#[derive(Debug)]
pub struct InMemoryJobStorage {
    jobs: RwLock<HashMap<JobId, Job>>,
    dead_letters: RwLock<HashMap<JobId, DeadLetterEntry>>,
    lease_duration: Duration,
}

impl InMemoryJobStorage {
    pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

    pub fn new() -> Self {
        Self::with_lease(Self::DEFAULT_LEASE)
    }

    /// Storage whose claims expire after `lease_duration`.
    pub fn with_lease(lease_duration: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            dead_letters: RwLock::new(HashMap::new()),
            lease_duration,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned<T>(_: T) -> StorageError {
        StorageError::Storage("lock poisoned".to_string())
    }
}

impl Default for InMemoryJobStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStorage for InMemoryJobStorage {
    fn enqueue(&self, job: Job) -> Result<JobId, StorageError> {
        let mut jobs = self.jobs.write().map_err(Self::poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(StorageError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(Self::poisoned)?;
        if let Some(job) = jobs.get(&job_id) {
            return Ok(Some(job.clone()));
        }
        drop(jobs);

        let dls = self.dead_letters.read().map_err(Self::poisoned)?;
        Ok(dls.get(&job_id).map(|entry| entry.job.clone()))
    }

    fn claim_next_due(
        &self,
        queues: &[String],
        server: &ServerName,
    ) -> Result<Option<Job>, StorageError> {
        let mut jobs = self.jobs.write().map_err(Self::poisoned)?;
        let now = Utc::now();

        for queue in queues {
            let candidate = jobs
                .values()
                .filter(|j| &j.queue == queue && j.is_claimable(now))
                .min_by_key(|j| (j.scheduled_at.unwrap_or(j.created_at), j.created_at))
                .map(|j| j.id);

            if let Some(job_id) = candidate {
                if let Some(job) = jobs.get_mut(&job_id) {
                    let processing = job.status == JobStatus::Processing;
                    if let Some(stale) = job.lease.as_ref().filter(|_| processing) {
                        warn!(
                            job_id = %job_id,
                            previous_server = %stale.server,
                            server = %server,
                            "reclaiming job with expired lease"
                        );
                    }
                    job.mark_processing(server, self.lease_duration, now);
                    return Ok(Some(job.clone()));
                }
            }
        }

        Ok(None)
    }

    fn record_result(&self, claimed: &Job, outcome: JobOutcome) -> Result<JobStatus, StorageError> {
        let job_id = claimed.id;
        let mut jobs = self.jobs.write().map_err(Self::poisoned)?;
        let job = jobs.get_mut(&job_id).ok_or(StorageError::NotFound(job_id))?;

        let processing = job.status == JobStatus::Processing;
        let holder = job.lease.as_ref().map(|lease| &lease.server);
        let claimant = claimed.lease.as_ref().map(|lease| &lease.server);
        if job.attempt != claimed.attempt || (processing && holder != claimant) {
            return Err(StorageError::LeaseLost {
                job_id,
                attempt: claimed.attempt,
                holder: holder.cloned(),
            });
        }
        if !processing {
            return Err(StorageError::NotProcessing {
                job_id,
                status: job.status.clone(),
            });
        }

        let now = Utc::now();
        match outcome {
            JobOutcome::Succeeded => job.mark_completed(now),
            JobOutcome::Failed(error) => job.mark_failed(error, now),
            JobOutcome::RetryAfter(delay) => {
                job.mark_retry_after("retry requested".to_string(), delay, now)
            }
        }
        let status = job.status.clone();

        if let JobStatus::DeadLettered { error, .. } = &status {
            let reason = error.clone();
            if let Some(job) = jobs.remove(&job_id) {
                let mut dls = self.dead_letters.write().map_err(Self::poisoned)?;
                dls.insert(job_id, DeadLetterEntry::new(job, reason));
            }
        }

        debug!(job_id = %job_id, status = ?status, "recorded job result");
        Ok(status)
    }

    fn cancel(&self, job_id: JobId) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(Self::poisoned)?;
        let job = jobs.get_mut(&job_id).ok_or(StorageError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(StorageError::AlreadyFinished(job_id));
        }
        job.mark_cancelled();
        Ok(())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, StorageError> {
        let dls = self.dead_letters.read().map_err(Self::poisoned)?;
        let mut result: Vec<_> = dls.values().cloned().collect();

        result.sort_by_key(|e| e.dead_lettered_at);
        result.truncate(limit);
        Ok(result)
    }

    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, StorageError> {
        let mut jobs = self.jobs.write().map_err(Self::poisoned)?;
        let mut dls = self.dead_letters.write().map_err(Self::poisoned)?;

        let entry = dls.remove(&job_id).ok_or(StorageError::NotFound(job_id))?;

        let mut job = entry.job;
        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.scheduled_at = None;
        job.lease = None;
        job.updated_at = Utc::now();
        job.history.clear();

        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn stats(&self) -> Result<JobStats, StorageError> {
        let jobs = self.jobs.read().map_err(Self::poisoned)?;
        let dls = self.dead_letters.read().map_err(Self::poisoned)?;

        let mut stats = JobStats::default();

        for job in jobs.values() {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
                JobStatus::DeadLettered { .. } => stats.dead_lettered += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.dead_lettered += dls.len();

        Ok(stats)
    }
}
