//! Test doubles shared by unit and integration tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use busjobs_core::{JobId, ServerName};

use crate::jobs::store::{InMemoryJobStorage, JobStats, JobStorage, StorageError};
use crate::jobs::types::{DeadLetterEntry, Job, JobOutcome, JobStatus};

/// In-memory storage that records every claim and result report.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    inner: InMemoryJobStorage,
    claim_calls: AtomicUsize,
    claimed: Mutex<Vec<JobId>>,
    results: Mutex<Vec<(JobId, JobOutcome)>>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            inner: InMemoryJobStorage::with_lease(lease),
            ..Default::default()
        }
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub fn claimed(&self) -> Vec<JobId> {
        self.claimed.lock().unwrap().clone()
    }

    pub fn results(&self) -> Vec<(JobId, JobOutcome)> {
        self.results.lock().unwrap().clone()
    }

    pub fn results_for(&self, job_id: JobId) -> Vec<JobOutcome> {
        self.results()
            .into_iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, outcome)| outcome)
            .collect()
    }
}

impl JobStorage for RecordingStorage {
    fn enqueue(&self, job: Job) -> Result<JobId, StorageError> {
        self.inner.enqueue(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, StorageError> {
        self.inner.get(job_id)
    }

    fn claim_next_due(
        &self,
        queues: &[String],
        server: &ServerName,
    ) -> Result<Option<Job>, StorageError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        let claimed = self.inner.claim_next_due(queues, server)?;
        if let Some(job) = &claimed {
            self.claimed.lock().unwrap().push(job.id);
        }
        Ok(claimed)
    }

    fn record_result(&self, claimed: &Job, outcome: JobOutcome) -> Result<JobStatus, StorageError> {
        self.results.lock().unwrap().push((claimed.id, outcome.clone()));
        self.inner.record_result(claimed, outcome)
    }

    fn cancel(&self, job_id: JobId) -> Result<(), StorageError> {
        self.inner.cancel(job_id)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, StorageError> {
        self.inner.list_dead_letters(limit)
    }

    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, StorageError> {
        self.inner.retry_dead_letter(job_id)
    }

    fn stats(&self) -> Result<JobStats, StorageError> {
        self.inner.stats()
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
