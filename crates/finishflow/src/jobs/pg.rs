use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::{
    AttemptOutcome, AttemptStatus, DeadReason, Job, JobAttempt, JobStatus, NewJob,
};
use crate::jobs::retry::RetryConfig;
use crate::jobs::store::{DeadLetter, JobFilter, JobStore, Requeue, StatusCounts};

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    status: String,
    attempts: i32,
    max_attempts: i32,
    payload: Value,
    scheduled_for: DateTime<Utc>,
    locked_by: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    last_error_code: Option<String>,
    last_error_message: Option<String>,
    dead_reason: Option<String>,
    dead_at: Option<DateTime<Utc>>,
    replay_of_job_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(r: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&r.status)
            .ok_or_else(|| StoreError::Corrupt(format!("job {} has status {}", r.id, r.status)))?;

        Ok(Job {
            id: r.id,
            job_type: r.job_type,
            status,
            attempts: r.attempts,
            max_attempts: r.max_attempts,
            payload: r.payload,
            scheduled_for: r.scheduled_for,
            locked_by: r.locked_by,
            lease_expires_at: r.lease_expires_at,
            last_error_code: r.last_error_code,
            last_error_message: r.last_error_message,
            dead_reason: r.dead_reason,
            dead_at: r.dead_at,
            replay_of_job_id: r.replay_of_job_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    job_id: Uuid,
    attempt_no: i32,
    worker_id: String,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error_code: Option<String>,
    error_message: Option<String>,
    latency_ms: Option<i32>,
}

impl TryFrom<AttemptRow> for JobAttempt {
    type Error = StoreError;

    fn try_from(r: AttemptRow) -> Result<Self, Self::Error> {
        let status = AttemptStatus::parse(&r.status).ok_or_else(|| {
            StoreError::Corrupt(format!("attempt {} has status {}", r.id, r.status))
        })?;

        Ok(JobAttempt {
            id: r.id,
            job_id: r.job_id,
            attempt_no: r.attempt_no,
            worker_id: r.worker_id,
            status,
            started_at: r.started_at,
            finished_at: r.finished_at,
            error_code: r.error_code,
            error_message: r.error_message,
            latency_ms: r.latency_ms,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter().map(Job::try_from).collect()
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Turns "0 rows updated" into the reason the guard failed.
    async fn guard_failed(&self, job_id: Uuid, worker_id: &str) -> StoreError {
        match self.get(job_id).await {
            Ok(Some(_)) => StoreError::NotClaimed {
                job_id,
                worker_id: worker_id.to_string(),
            },
            Ok(None) => StoreError::NotFound(job_id.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: NewJob) -> Result<Job, StoreError> {
        job.payload.validate()?;

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (job_type, status, attempts, max_attempts, payload, scheduled_for, replay_of_job_id)
            VALUES ($1, $2, 0, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(job.payload.job_type())
        .bind(JobStatus::Pending.as_str())
        .bind(job.max_attempts)
        .bind(job.payload.to_value())
        .bind(job.scheduled_for)
        .bind(job.replay_of_job_id)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT *
            FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR job_type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.job_type.as_deref())
        .bind(filter.clamped_limit())
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            let status = JobStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown job status {status}")))?;
            counts.add(status, n);
        }
        Ok(counts)
    }

    // SKIP LOCKED keeps two sweeps from ever picking the same row.
    async fn claim_due(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            WITH candidate AS (
              SELECT id
              FROM jobs
              WHERE status = 'pending'
                AND scheduled_for <= $1
              ORDER BY scheduled_for ASC, created_at ASC
              FOR UPDATE SKIP LOCKED
              LIMIT 1
            )
            UPDATE jobs j
            SET status = 'processing',
                locked_by = $2,
                lease_expires_at = $3,
                updated_at = $1
            FROM candidate
            WHERE j.id = candidate.id
            RETURNING j.*
            "#,
        )
        .bind(now)
        .bind(worker_id)
        .bind(now + lease)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        row.map(Job::try_from).transpose()
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'completed',
                locked_by = NULL,
                lease_expires_at = NULL,
                updated_at = $3
            WHERE id = $1
              AND status = 'processing'
              AND locked_by = $2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => r.try_into(),
            None => Err(self.guard_failed(job_id, worker_id).await),
        }
    }

    async fn requeue(
        &self,
        job_id: Uuid,
        worker_id: &str,
        update: Requeue,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempts = LEAST($3, max_attempts),
                scheduled_for = $4,
                last_error_code = $5,
                last_error_message = $6,
                payload = COALESCE($7, payload),
                locked_by = NULL,
                lease_expires_at = NULL,
                updated_at = $8
            WHERE id = $1
              AND status = 'processing'
              AND locked_by = $2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(update.attempts)
        .bind(update.scheduled_for)
        .bind(&update.error_code)
        .bind(&update.error_message)
        .bind(update.payload)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => r.try_into(),
            None => Err(self.guard_failed(job_id, worker_id).await),
        }
    }

    async fn mark_dead(
        &self,
        job_id: Uuid,
        worker_id: &str,
        update: DeadLetter,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'dead',
                attempts = LEAST($3, max_attempts),
                dead_reason = $4,
                dead_at = $7,
                last_error_code = $5,
                last_error_message = $6,
                locked_by = NULL,
                lease_expires_at = NULL,
                updated_at = $7
            WHERE id = $1
              AND status = 'processing'
              AND locked_by = $2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(update.attempts)
        .bind(&update.reason)
        .bind(&update.error_code)
        .bind(&update.error_message)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => r.try_into(),
            None => Err(self.guard_failed(job_id, worker_id).await),
        }
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        retry: &RetryConfig,
    ) -> Result<Vec<Job>, StoreError> {
        // backoff mirrors retry::next_delay_seconds for the new attempt count
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            WITH reaped AS (
              UPDATE jobs
              SET attempts = LEAST(attempts + 1, max_attempts),
                  status = CASE WHEN attempts + 1 >= max_attempts THEN 'dead' ELSE 'pending' END,
                  dead_reason = CASE WHEN attempts + 1 >= max_attempts THEN $2 ELSE dead_reason END,
                  dead_at = CASE WHEN attempts + 1 >= max_attempts THEN $1 ELSE dead_at END,
                  scheduled_for = CASE
                    WHEN attempts + 1 >= max_attempts THEN scheduled_for
                    ELSE $1 + make_interval(secs => GREATEST(0, LEAST($5::float8, round(
                      LEAST($4::float8 * power(2::float8, LEAST(attempts, 62)), $5::float8)
                      * (1 + $6::float8 * (2 * random() - 1))
                    ))))
                  END,
                  last_error_code = $3,
                  last_error_message = 'lease held by ' || COALESCE(locked_by, 'unknown') || ' expired',
                  locked_by = NULL,
                  lease_expires_at = NULL,
                  updated_at = $1
              WHERE status = 'processing'
                AND lease_expires_at IS NOT NULL
                AND lease_expires_at < $1
              RETURNING *
            ),
            closed AS (
              UPDATE job_attempts a
              SET status = 'failed',
                  finished_at = $1,
                  error_code = $3,
                  error_message = 'lease expired before the attempt finished'
              FROM reaped r
              WHERE a.job_id = r.id
                AND a.status = 'running'
            )
            SELECT * FROM reaped
            "#,
        )
        .bind(now)
        .bind(DeadReason::MaxAttemptsExceeded.as_str())
        .bind(ErrorCode::LeaseExpired.as_str())
        .bind(retry.base_seconds.max(0) as f64)
        .bind(retry.max_seconds.max(0) as f64)
        .bind(if retry.jitter_pct.is_finite() { retry.jitter_pct.clamp(0.0, 1.0) } else { 0.0 })
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }

    async fn start_attempt(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<JobAttempt, StoreError> {
        let row = sqlx::query_as::<_, AttemptRow>(
            r#"
            INSERT INTO job_attempts (job_id, attempt_no, worker_id, status, started_at)
            VALUES (
              $1,
              COALESCE((SELECT MAX(attempt_no) FROM job_attempts WHERE job_id = $1), 0) + 1,
              $2,
              $3,
              $4
            )
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(AttemptStatus::Running.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn finish_attempt(
        &self,
        attempt_id: Uuid,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE job_attempts
            SET status = $2,
                finished_at = $3,
                latency_ms = $4,
                error_code = $5,
                error_message = $6
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .bind(outcome.status.as_str())
        .bind(now)
        .bind(outcome.latency_ms)
        .bind(outcome.error_code)
        .bind(outcome.error_message)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(attempt_id.to_string()));
        }
        Ok(())
    }

    async fn list_attempts(&self, job_id: Uuid) -> Result<Vec<JobAttempt>, StoreError> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT *
            FROM job_attempts
            WHERE job_id = $1
            ORDER BY attempt_no ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobAttempt::try_from).collect()
    }
}
