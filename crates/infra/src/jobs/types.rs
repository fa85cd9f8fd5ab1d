//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use busjobs_core::{JobId, ServerName};

/// Job kind, used by activators to route a job to its work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Publish a message to the host bus when the job comes due
    ScheduledMessage {
        destination: String,
        message_type: String,
    },
    /// Generic/custom job
    Custom { kind: String },
}

impl JobKind {
    pub fn scheduled_message(
        destination: impl Into<String>,
        message_type: impl Into<String>,
    ) -> Self {
        Self::ScheduledMessage {
            destination: destination.into(),
            message_type: message_type.into(),
        }
    }

    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom { kind: kind.into() }
    }

    pub fn type_name(&self) -> &str {
        match self {
            JobKind::ScheduledMessage { message_type, .. } => message_type,
            JobKind::Custom { kind } => kind,
        }
    }
}

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to come due
    Pending,
    /// Claimed by a server; see `Job::lease`
    Processing,
    /// Completed successfully
    Completed,
    /// Failed, will be retried
    Failed { error: String, attempt: u32 },
    /// Exhausted retries
    DeadLettered { error: String, attempts: u32 },
    /// Cancelled before it ran
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::DeadLettered { .. } | JobStatus::Cancelled
        )
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, JobStatus::Failed { .. })
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy applied by job storage when a run fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 = dead-letter on first failure)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before the retry that follows `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        // Deterministic jitter derived from the attempt number
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms.max(base_ms) * 1.5) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Claim held by a server on a processing job. Once `expires_at` passes the
/// job may be claimed again by any server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLease {
    pub server: ServerName,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A background job as held by job storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Queue the job waits in
    pub queue: String,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Number of runs started so far
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may run; `None` means immediately
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Time-zone id the job was scheduled in (resolved by the server)
    pub time_zone: Option<String>,
    pub lease: Option<JobLease>,
    /// Execution history
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub server: Option<ServerName>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

// Out-of-range delays saturate at a century.
fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

impl Job {
    pub fn new(queue: impl Into<String>, kind: JobKind, payload: serde_json::Value) -> Self {
        Self::with_id(JobId::new(), queue, kind, payload)
    }

    pub fn with_id(
        id: JobId,
        queue: impl Into<String>,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            queue: queue.into(),
            kind,
            payload,
            status: JobStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            time_zone: None,
            lease: None,
            history: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.scheduled_at = Some(Utc::now() + to_chrono(delay));
        self
    }

    pub fn in_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| now >= at)
    }

    /// Whether a worker may claim this job at `now`: a due pending/failed job,
    /// or a processing job whose lease has expired.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match &self.status {
            JobStatus::Pending | JobStatus::Failed { .. } => self.is_due(now),
            JobStatus::Processing => self.lease_expired(now),
            _ => false,
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().is_none_or(|lease| now >= lease.expires_at)
    }

    pub fn mark_processing(&mut self, server: &ServerName, lease: Duration, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.attempt += 1;
        self.updated_at = now;
        self.lease = Some(JobLease {
            server: server.clone(),
            claimed_at: now,
            expires_at: now + to_chrono(lease),
        });
    }

    fn finish_attempt(&mut self, now: DateTime<Utc>, error: Option<String>) {
        let (server, started_at) = match self.lease.take() {
            Some(lease) => (Some(lease.server), lease.claimed_at),
            None => (None, now),
        };
        self.updated_at = now;
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            server,
            started_at,
            finished_at: now,
            success: error.is_none(),
            error,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.finish_attempt(now, None);
        self.status = JobStatus::Completed;
    }

    /// Record a failed run; schedules a retry with backoff or dead-letters
    /// the job when the retry policy is exhausted.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        let delay = self.retry_policy.delay_for_attempt(self.attempt);
        self.fail_with_delay(error, delay, now);
    }

    /// Record a failed run that asked to be retried after `delay`,
    /// still bounded by the retry policy.
    pub fn mark_retry_after(&mut self, error: String, delay: Duration, now: DateTime<Utc>) {
        self.fail_with_delay(error, delay, now);
    }

    fn fail_with_delay(&mut self, error: String, delay: Duration, now: DateTime<Utc>) {
        self.finish_attempt(now, Some(error.clone()));

        if self.retry_policy.should_retry(self.attempt) {
            self.scheduled_at = Some(now + to_chrono(delay));
            self.status = JobStatus::Failed {
                error,
                attempt: self.attempt,
            };
        } else {
            self.status = JobStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.lease = None;
        self.updated_at = Utc::now();
    }
}

/// Result of running a job, reported back to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    /// Transient failure; retry after the given delay
    RetryAfter(Duration),
}

impl JobOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

/// Entry in the dead-letter list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: String) -> Self {
        Self {
            job,
            dead_lettered_at: Utc::now(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerName {
        "worker-a".parse().unwrap()
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn job_lifecycle_records_lease_holder_in_history() {
        let mut job = Job::new(
            "default",
            JobKind::custom("test"),
            serde_json::json!({"key": "value"}),
        );
        let now = Utc::now();

        assert!(job.is_claimable(now));
        job.mark_processing(&server(), Duration::from_secs(30), now);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempt, 1);
        assert!(!job.is_claimable(now));

        job.mark_completed(now + chrono::Duration::milliseconds(40));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.lease.is_none());
        assert_eq!(job.history.len(), 1);
        assert_eq!(job.history[0].server, Some(server()));
        assert_eq!(job.history[0].duration_ms, 40);
        assert!(job.history[0].success);
    }

    #[test]
    fn expired_lease_makes_job_claimable_again() {
        let mut job = Job::new("default", JobKind::custom("test"), serde_json::json!({}));
        let now = Utc::now();
        job.mark_processing(&server(), Duration::from_secs(5), now);

        assert!(!job.is_claimable(now + chrono::Duration::seconds(4)));
        assert!(job.is_claimable(now + chrono::Duration::seconds(5)));
    }

    #[test]
    fn job_failure_and_retry() {
        let mut job = Job::new("default", JobKind::custom("test"), serde_json::json!({}))
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                ..Default::default()
            });
        let now = Utc::now();

        job.mark_processing(&server(), Duration::from_secs(30), now);
        job.mark_failed("error 1".to_string(), now);

        assert!(matches!(job.status, JobStatus::Failed { attempt: 1, .. }));
        assert!(job.scheduled_at.is_some_and(|at| at > now));
        assert!(!job.is_claimable(now));

        job.mark_processing(&server(), Duration::from_secs(30), now);
        job.mark_failed("error 2".to_string(), now);

        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 2, .. }));
    }

    #[test]
    fn retry_after_uses_requested_delay() {
        let mut job = Job::new("default", JobKind::custom("test"), serde_json::json!({}));
        let now = Utc::now();
        job.mark_processing(&server(), Duration::from_secs(30), now);
        job.mark_retry_after("busy".to_string(), Duration::from_secs(7), now);

        assert_eq!(job.scheduled_at, Some(now + chrono::Duration::seconds(7)));
        assert!(job.status.is_retriable());
    }

    #[test]
    fn scheduled_message_kind_routes_by_message_type() {
        let kind = JobKind::scheduled_message("loopback://local/orders", "OrderExpired");
        assert_eq!(kind.type_name(), "OrderExpired");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: backoff never exceeds the cap (plus jitter headroom).
            #[test]
            fn backoff_is_bounded(
                attempt in 0u32..200,
                base_ms in 1u64..5_000,
                cap_ms in 1u64..600_000,
            ) {
                let policy = RetryPolicy::exponential(
                    10,
                    Duration::from_millis(base_ms),
                    Duration::from_millis(cap_ms),
                );
                let delay = policy.delay_for_attempt(attempt).as_millis() as f64;
                let ceiling = (cap_ms.max(base_ms) as f64) * 1.5;
                prop_assert!(delay <= ceiling);
            }
        }
    }
}
