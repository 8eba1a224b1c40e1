#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    RateLimit,
    DependencyDown,
    PartialDelivery,
    LeaseExpired,
    WorkerShutdown,
    BadPayload,
    UnknownJobType,
    RecipientRejected,
    Unknown,
}

impl ErrorCode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "TIMEOUT" => Self::Timeout,
            "RATE_LIMIT" => Self::RateLimit,
            "DEPENDENCY_DOWN" => Self::DependencyDown,
            "PARTIAL_DELIVERY" => Self::PartialDelivery,
            "LEASE_EXPIRED" => Self::LeaseExpired,
            "WORKER_SHUTDOWN" => Self::WorkerShutdown,
            "BAD_PAYLOAD" => Self::BadPayload,
            "UNKNOWN_JOB_TYPE" => Self::UnknownJobType,
            "RECIPIENT_REJECTED" => Self::RecipientRejected,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::RateLimit => "RATE_LIMIT",
            Self::DependencyDown => "DEPENDENCY_DOWN",
            Self::PartialDelivery => "PARTIAL_DELIVERY",
            Self::LeaseExpired => "LEASE_EXPIRED",
            Self::WorkerShutdown => "WORKER_SHUTDOWN",
            Self::BadPayload => "BAD_PAYLOAD",
            Self::UnknownJobType => "UNKNOWN_JOB_TYPE",
            Self::RecipientRejected => "RECIPIENT_REJECTED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Unmapped codes retry; a wrong guess costs a few attempts, not a lost email.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::BadPayload | Self::UnknownJobType | Self::RecipientRejected
        )
    }
}

pub fn suggested_action(code: &str) -> &'static str {
    match ErrorCode::parse(code) {
        ErrorCode::Timeout => "Email provider is slow. Check provider latency; the job will retry.",
        ErrorCode::RateLimit => "Provider throttled us. Lower recipient concurrency or widen backoff.",
        ErrorCode::DependencyDown => "Provider or CRM unreachable. Check its status page; the job will retry.",
        ErrorCode::PartialDelivery => {
            "Some recipients failed. The retry only targets the remaining contacts."
        }
        ErrorCode::LeaseExpired => {
            "Worker died or stalled mid-job. Check worker logs and lease_seconds."
        }
        ErrorCode::WorkerShutdown => "Worker stopped while running the job; it will retry.",
        ErrorCode::BadPayload => {
            "Non-retryable. Fix the producer that wrote this payload, then replay the job."
        }
        ErrorCode::UnknownJobType => {
            "Non-retryable. No handler registered for this job_type; deploy one, then replay."
        }
        ErrorCode::RecipientRejected => {
            "Non-retryable. Provider refused the recipients (bounced/unsubscribed). Clean the contact list."
        }
        ErrorCode::Unknown => "Inspect error_message and worker logs; add a mapping once understood.",
    }
}
