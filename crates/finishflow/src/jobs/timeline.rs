use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::error_codes;
use crate::jobs::model::{AttemptStatus, Job, JobAttempt, JobStatus};
use crate::jobs::store::JobStore;

#[derive(Debug, Serialize)]
pub struct JobTimeline {
    pub job: Job,
    pub summary: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_worker_id: Option<String>,
    pub attempts: Vec<TimelineAttempt>,
}

#[derive(Debug, Serialize)]
pub struct TimelineAttempt {
    pub id: Uuid,
    pub attempt_no: i32,
    pub status: AttemptStatus,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: Option<i32>,
    pub suggested_action: Option<&'static str>,
}

impl From<JobAttempt> for TimelineAttempt {
    fn from(a: JobAttempt) -> Self {
        let suggested_action = a.error_code.as_deref().map(error_codes::suggested_action);
        Self {
            id: a.id,
            attempt_no: a.attempt_no,
            status: a.status,
            worker_id: a.worker_id,
            started_at: a.started_at,
            finished_at: a.finished_at,
            error_code: a.error_code,
            error_message: a.error_message,
            latency_ms: a.latency_ms,
            suggested_action,
        }
    }
}

/// One-line operator summary of where a job stands.
pub fn summarize(job: &Job) -> String {
    match job.status {
        JobStatus::Completed => "Delivered.".to_string(),
        JobStatus::Processing => format!(
            "Being processed by {}.",
            job.locked_by.as_deref().unwrap_or("unknown worker")
        ),
        JobStatus::Dead => format!(
            "Dead after {} failed attempt(s). Reason: {}.",
            job.attempts,
            job.dead_reason.as_deref().unwrap_or("UNKNOWN")
        ),
        JobStatus::Failed => "Failed (legacy terminal state).".to_string(),
        JobStatus::Pending if job.attempts > 0 => format!(
            "Retry {} of {} scheduled for {}.",
            job.attempts + 1,
            job.max_attempts,
            job.scheduled_for.to_rfc3339()
        ),
        JobStatus::Pending => "Waiting to run.".to_string(),
    }
}

pub async fn build_timeline(
    store: &dyn JobStore,
    job_id: Uuid,
) -> Result<Option<JobTimeline>, StoreError> {
    let job = match store.get(job_id).await? {
        Some(j) => j,
        None => return Ok(None),
    };

    let attempts: Vec<TimelineAttempt> = store
        .list_attempts(job_id)
        .await?
        .into_iter()
        .map(TimelineAttempt::from)
        .collect();

    let last_worker_id = attempts.last().map(|a| a.worker_id.clone());
    let next_run_at = (job.status == JobStatus::Pending).then_some(job.scheduled_for);

    Ok(Some(JobTimeline {
        summary: summarize(&job),
        next_run_at,
        last_worker_id,
        attempts,
        job,
    }))
}
