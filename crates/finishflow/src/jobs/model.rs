use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::payload::JobPayload;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub payload: Value,
    pub scheduled_for: DateTime<Utc>,

    pub locked_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,

    pub dead_reason: Option<String>,
    pub dead_at: Option<DateTime<Utc>>,

    pub replay_of_job_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh pending row from a producer request.
    pub fn from_new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: new.payload.job_type().to_string(),
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: new.max_attempts,
            payload: new.payload.to_value(),
            scheduled_for: new.scheduled_for,
            locked_by: None,
            lease_expires_at: None,
            last_error_code: None,
            last_error_message: None,
            dead_reason: None,
            dead_at: None,
            replay_of_job_id: new.replay_of_job_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_for <= now
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub payload: JobPayload,
    pub scheduled_for: DateTime<Utc>,
    pub max_attempts: i32,
    pub replay_of_job_id: Option<Uuid>,
}

impl NewJob {
    pub fn now(payload: JobPayload, max_attempts: i32) -> Self {
        Self {
            payload,
            scheduled_for: Utc::now(),
            max_attempts,
            replay_of_job_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }

    /// `failed` only exists on rows written by older producers; nothing moves out of it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Dead
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Pending)
                | (JobStatus::Processing, JobStatus::Dead)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Retry { attempts: i32 },
    Dead { attempts: i32, reason: DeadReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadReason {
    NonRetryable,
    MaxAttemptsExceeded,
}

impl DeadReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadReason::NonRetryable => "NON_RETRYABLE",
            DeadReason::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
        }
    }
}

/// attempts is bumped on every failure and never passes max_attempts.
pub fn decide_failure(attempts: i32, max_attempts: i32, retryable: bool) -> FailureDecision {
    let attempts = (attempts + 1).min(max_attempts.max(1));
    if !retryable {
        FailureDecision::Dead {
            attempts,
            reason: DeadReason::NonRetryable,
        }
    } else if attempts >= max_attempts {
        FailureDecision::Dead {
            attempts,
            reason: DeadReason::MaxAttemptsExceeded,
        }
    } else {
        FailureDecision::Retry { attempts }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempt_no: i32,
    pub worker_id: String,
    pub status: AttemptStatus,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Running => "running",
            AttemptStatus::Succeeded => "succeeded",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(AttemptStatus::Running),
            "succeeded" => Some(AttemptStatus::Succeeded),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }
}

/// Closing data for an attempt row.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub status: AttemptStatus,
    pub latency_ms: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl AttemptOutcome {
    pub fn succeeded(latency_ms: i32) -> Self {
        Self {
            status: AttemptStatus::Succeeded,
            latency_ms,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(latency_ms: i32, code: &str, message: &str) -> Self {
        Self {
            status: AttemptStatus::Failed,
            latency_ms,
            error_code: Some(code.to_string()),
            error_message: Some(message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_documented_transitions_are_allowed() {
        let allowed = [
            (JobStatus::Pending, JobStatus::Processing),
            (JobStatus::Processing, JobStatus::Completed),
            (JobStatus::Processing, JobStatus::Pending),
            (JobStatus::Processing, JobStatus::Dead),
        ];

        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in JobStatus::ALL.iter().filter(|s| s.is_terminal()) {
            assert!(JobStatus::ALL.iter().all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn status_parses_its_own_names() {
        for s in JobStatus::ALL {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse(" Dead "), Some(JobStatus::Dead));
        assert_eq!(JobStatus::parse("queued"), None);
    }

    #[test]
    fn retryable_failures_retry_until_max_then_die() {
        assert_eq!(decide_failure(0, 3, true), FailureDecision::Retry { attempts: 1 });
        assert_eq!(decide_failure(1, 3, true), FailureDecision::Retry { attempts: 2 });
        assert_eq!(
            decide_failure(2, 3, true),
            FailureDecision::Dead {
                attempts: 3,
                reason: DeadReason::MaxAttemptsExceeded
            }
        );
    }

    #[test]
    fn non_retryable_dies_immediately_without_passing_max() {
        assert_eq!(
            decide_failure(0, 5, false),
            FailureDecision::Dead {
                attempts: 1,
                reason: DeadReason::NonRetryable
            }
        );
        // a corrupt row already at the ceiling stays at the ceiling
        assert_eq!(
            decide_failure(5, 5, false),
            FailureDecision::Dead {
                attempts: 5,
                reason: DeadReason::NonRetryable
            }
        );
    }
}
