use uuid::Uuid;

use crate::jobs::payload::PayloadError;

/// Failure of any store implementation (Postgres or in-memory).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("job {job_id} is not held by {worker_id}")]
    NotClaimed { job_id: Uuid, worker_id: String },
    #[error("job {job_id} is {status}; {action} not allowed")]
    InvalidState {
        job_id: Uuid,
        status: String,
        action: &'static str,
    },
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
