use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, SeedableRng};
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::{
    AttemptOutcome, AttemptStatus, DeadReason, Job, JobAttempt, JobStatus, NewJob,
};
use crate::jobs::retry::{next_delay_seconds, RetryConfig};
use crate::jobs::store::{DeadLetter, JobFilter, JobStore, Requeue, StatusCounts};

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<Uuid, Job>,
    attempts: Vec<JobAttempt>,
}

/// In-memory job store for tests/dev. One mutex covers both tables, so a claim is exclusive.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    tables: Mutex<Tables>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn held_by<'a>(
    tables: &'a mut Tables,
    job_id: Uuid,
    worker_id: &str,
) -> Result<&'a mut Job, StoreError> {
    let job = tables
        .jobs
        .get_mut(&job_id)
        .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

    if job.status != JobStatus::Processing || job.locked_by.as_deref() != Some(worker_id) {
        return Err(StoreError::NotClaimed {
            job_id,
            worker_id: worker_id.to_string(),
        });
    }
    Ok(job)
}

fn move_to(job: &mut Job, next: JobStatus) -> Result<(), StoreError> {
    if !job.status.can_transition_to(next) {
        return Err(StoreError::InvalidState {
            job_id: job.id,
            status: job.status.to_string(),
            action: next.as_str(),
        });
    }
    job.status = next;
    Ok(())
}

fn release(job: &mut Job, now: DateTime<Utc>) {
    job.locked_by = None;
    job.lease_expires_at = None;
    job.updated_at = now;
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<Job, StoreError> {
        job.payload.validate()?;
        let row = Job::from_new(job, Utc::now());
        self.lock().jobs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(&job_id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let tables = self.lock();
        let mut rows: Vec<Job> = tables
            .jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| {
                filter
                    .job_type
                    .as_deref()
                    .map_or(true, |t| j.job_type == t)
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(filter.clamped_limit() as usize);
        Ok(rows)
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for job in self.lock().jobs.values() {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn claim_due(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let mut tables = self.lock();

        let candidate = tables
            .jobs
            .values()
            .filter(|j| j.is_due(now))
            .min_by(|a, b| {
                a.scheduled_for
                    .cmp(&b.scheduled_for)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|j| j.id);

        let Some(job_id) = candidate else {
            return Ok(None);
        };

        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        move_to(job, JobStatus::Processing)?;
        job.locked_by = Some(worker_id.to_string());
        job.lease_expires_at = Some(now + lease);
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut tables = self.lock();
        let job = held_by(&mut tables, job_id, worker_id)?;
        move_to(job, JobStatus::Completed)?;
        release(job, now);
        Ok(job.clone())
    }

    async fn requeue(
        &self,
        job_id: Uuid,
        worker_id: &str,
        update: Requeue,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut tables = self.lock();
        let job = held_by(&mut tables, job_id, worker_id)?;
        move_to(job, JobStatus::Pending)?;
        job.attempts = update.attempts.min(job.max_attempts);
        job.scheduled_for = update.scheduled_for;
        job.last_error_code = Some(update.error_code);
        job.last_error_message = Some(update.error_message);
        if let Some(payload) = update.payload {
            job.payload = payload;
        }
        release(job, now);
        Ok(job.clone())
    }

    async fn mark_dead(
        &self,
        job_id: Uuid,
        worker_id: &str,
        update: DeadLetter,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut tables = self.lock();
        let job = held_by(&mut tables, job_id, worker_id)?;
        move_to(job, JobStatus::Dead)?;
        job.attempts = update.attempts.min(job.max_attempts);
        job.dead_reason = Some(update.reason);
        job.dead_at = Some(now);
        job.last_error_code = Some(update.error_code);
        job.last_error_message = Some(update.error_message);
        release(job, now);
        Ok(job.clone())
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        retry: &RetryConfig,
    ) -> Result<Vec<Job>, StoreError> {
        let mut guard = self.lock();
        let tables = &mut *guard;
        let mut rng = StdRng::from_entropy();
        let mut touched = Vec::new();

        for job in tables.jobs.values_mut() {
            let expired = job.status == JobStatus::Processing
                && job.lease_expires_at.map_or(false, |at| at < now);
            if !expired {
                continue;
            }

            job.attempts = (job.attempts + 1).min(job.max_attempts);
            job.last_error_code = Some(ErrorCode::LeaseExpired.as_str().to_string());
            job.last_error_message = Some(format!(
                "lease held by {} expired",
                job.locked_by.as_deref().unwrap_or("unknown")
            ));
            if job.attempts >= job.max_attempts {
                move_to(job, JobStatus::Dead)?;
                job.dead_reason = Some(DeadReason::MaxAttemptsExceeded.as_str().to_string());
                job.dead_at = Some(now);
            } else {
                move_to(job, JobStatus::Pending)?;
                let delay = next_delay_seconds(job.attempts, retry, &mut rng);
                job.scheduled_for = now + Duration::seconds(delay);
            }
            release(job, now);
            touched.push(job.clone());
        }

        // the crashed worker never closed its attempt row
        for attempt in tables.attempts.iter_mut().filter(|a| {
            a.status == AttemptStatus::Running && touched.iter().any(|j| j.id == a.job_id)
        }) {
            attempt.status = AttemptStatus::Failed;
            attempt.finished_at = Some(now);
            attempt.error_code = Some(ErrorCode::LeaseExpired.as_str().to_string());
            attempt.error_message = Some("lease expired before the attempt finished".to_string());
        }

        Ok(touched)
    }

    async fn start_attempt(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<JobAttempt, StoreError> {
        let mut tables = self.lock();
        if !tables.jobs.contains_key(&job_id) {
            return Err(StoreError::NotFound(job_id.to_string()));
        }

        let attempt_no = tables
            .attempts
            .iter()
            .filter(|a| a.job_id == job_id)
            .map(|a| a.attempt_no)
            .max()
            .unwrap_or(0)
            + 1;

        let attempt = JobAttempt {
            id: Uuid::new_v4(),
            job_id,
            attempt_no,
            worker_id: worker_id.to_string(),
            status: AttemptStatus::Running,
            started_at: now,
            finished_at: None,
            error_code: None,
            error_message: None,
            latency_ms: None,
        };
        tables.attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn finish_attempt(
        &self,
        attempt_id: Uuid,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let attempt = tables
            .attempts
            .iter_mut()
            .find(|a| a.id == attempt_id)
            .ok_or_else(|| StoreError::NotFound(attempt_id.to_string()))?;

        attempt.status = outcome.status;
        attempt.finished_at = Some(now);
        attempt.latency_ms = Some(outcome.latency_ms);
        attempt.error_code = outcome.error_code;
        attempt.error_message = outcome.error_message;
        Ok(())
    }

    async fn list_attempts(&self, job_id: Uuid) -> Result<Vec<JobAttempt>, StoreError> {
        let mut rows: Vec<JobAttempt> = self
            .lock()
            .attempts
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.attempt_no);
        Ok(rows)
    }
}
