use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::model::{AttemptOutcome, Job, JobAttempt, JobStatus, NewJob};
use crate::jobs::retry::RetryConfig;

#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            limit: 100,
        }
    }
}

impl JobFilter {
    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, 500)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus, n: i64) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
            JobStatus::Dead => self.dead += n,
        }
    }
}

/// processing -> pending after a recoverable failure.
#[derive(Debug, Clone)]
pub struct Requeue {
    pub attempts: i32,
    pub scheduled_for: DateTime<Utc>,
    pub error_code: String,
    pub error_message: String,
    /// Narrowed payload for the next try; `None` keeps the stored one.
    pub payload: Option<Value>,
}

/// processing -> dead.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub attempts: i32,
    pub reason: String,
    pub error_code: String,
    pub error_message: String,
}

/// Data access for outbox jobs and their attempt audit rows.
///
/// Every transition out of `processing` is guarded by `locked_by = worker_id`;
/// a worker that lost its lease gets `StoreError::NotClaimed` instead of
/// overwriting somebody else's outcome.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    async fn status_counts(&self) -> Result<StatusCounts, StoreError>;

    /// Atomically move the oldest due pending job to processing and hand it to `worker_id`.
    async fn claim_due(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError>;

    async fn mark_completed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    async fn requeue(
        &self,
        job_id: Uuid,
        worker_id: &str,
        update: Requeue,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    async fn mark_dead(
        &self,
        job_id: Uuid,
        worker_id: &str,
        update: DeadLetter,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    /// Count an expired lease as a failed attempt: back to pending after the usual backoff,
    /// or dead once the attempt budget is spent. The abandoned attempt row is closed as
    /// failed. Returns the jobs it touched.
    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        retry: &RetryConfig,
    ) -> Result<Vec<Job>, StoreError>;

    async fn start_attempt(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<JobAttempt, StoreError>;

    async fn finish_attempt(
        &self,
        attempt_id: Uuid,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Oldest first.
    async fn list_attempts(&self, job_id: Uuid) -> Result<Vec<JobAttempt>, StoreError>;
}
