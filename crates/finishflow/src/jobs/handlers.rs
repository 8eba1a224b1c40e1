use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};

use serde_json::{json, Value};
use tokio::{sync::Semaphore, task::JoinSet, time::timeout};

use crate::email::{EmailMessage, EmailSender, SendError};
use crate::engagement::{EngagementRecorder, EventType, NewEngagementEvent};
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::Job;
use crate::jobs::payload::{
    JobPayload, PayloadError, SEND_CAMPAIGN_EMAIL, SEND_OFFER_EMAIL, SEND_REORDER_EMAIL,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
type HandlerFn = dyn for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
    + Send
    + Sync;

#[derive(Debug, Clone, PartialEq)]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    /// Payload for the next try when only part of the work is left.
    pub retry_payload: Option<Value>,
}

impl JobError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: ErrorCode::parse(code).is_retryable(),
            retry_payload: None,
        }
    }

    pub fn bad_payload(e: PayloadError) -> Self {
        match e {
            PayloadError::UnknownJobType(t) => {
                Self::new("UNKNOWN_JOB_TYPE", format!("no handler for job_type={t}"))
            }
            other => Self::new("BAD_PAYLOAD", other.to_string()),
        }
    }

    pub fn with_retry_payload(mut self, payload: Value) -> Self {
        self.retry_payload = Some(payload);
        self
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for JobError {}

#[derive(Clone)]
pub struct JobContext {
    pub worker_id: String,
    pub sender: Arc<dyn EmailSender>,
    pub recorder: EngagementRecorder,
    /// Upper bound on concurrent sends within one job.
    pub recipient_concurrency: usize,
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<HandlerFn>,
    pub semaphore: Option<Arc<Semaphore>>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_with_options<F>(&mut self, job_type: &str, handler: F, opts: HandlerOptions)
    where
        F: for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        let semaphore = opts
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        self.handlers.insert(
            job_type.to_string(),
            HandlerEntry {
                handler: Arc::new(handler),
                semaphore,
                timeout: opts.timeout,
            },
        );
    }

    pub fn handler_for(&self, job_type: &str) -> Option<HandlerEntry> {
        self.handlers.get(job_type).cloned()
    }
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }
}

impl HandlerEntry {
    pub async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        let _permit = match &self.semaphore {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| JobError::new("WORKER_SHUTDOWN", "handler semaphore closed"))?,
            ),
            None => None,
        };

        let fut = (self.handler)(job, ctx);
        match self.timeout {
            Some(dur) => match timeout(dur, fut).await {
                Ok(inner) => inner,
                Err(_) => Err(JobError::new(
                    "TIMEOUT",
                    format!("handler timeout after {}ms", dur.as_millis()),
                )),
            },
            None => fut.await,
        }
    }
}

fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub contact_id: String,
    pub result: Result<(), SendError>,
}

/// Send one message per contact with at most `ctx.recipient_concurrency` in flight.
/// Outcomes come back in payload order.
pub async fn deliver_to_recipients(
    payload: &JobPayload,
    ctx: &JobContext,
) -> Vec<RecipientOutcome> {
    let job = payload.email();
    let limit = Arc::new(Semaphore::new(ctx.recipient_concurrency.max(1)));
    let mut set = JoinSet::new();

    for (idx, contact_id) in job.contact_ids.iter().enumerate() {
        let message = EmailMessage::for_contact(payload.job_type(), job, contact_id);
        let sender = ctx.sender.clone();
        let limit = limit.clone();

        set.spawn(async move {
            let result = match limit.acquire_owned().await {
                Ok(_permit) => sender.send(&message).await,
                Err(_) => Err(SendError::Transient {
                    code: "WORKER_SHUTDOWN",
                    message: "recipient limiter closed".to_string(),
                }),
            };
            (idx, message.contact_id, result)
        });
    }

    let mut outcomes: Vec<(usize, RecipientOutcome)> = Vec::with_capacity(job.contact_ids.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, contact_id, result)) => {
                outcomes.push((idx, RecipientOutcome { contact_id, result }))
            }
            Err(e) => tracing::error!(error = %e, "recipient send task panicked"),
        }
    }

    // a panicked task leaves its contact without an outcome; count it as transient
    let mut by_idx: Vec<Option<RecipientOutcome>> = vec![None; job.contact_ids.len()];
    for (idx, outcome) in outcomes {
        by_idx[idx] = Some(outcome);
    }
    by_idx
        .into_iter()
        .zip(job.contact_ids.iter())
        .map(|(outcome, contact_id)| {
            outcome.unwrap_or_else(|| RecipientOutcome {
                contact_id: contact_id.clone(),
                result: Err(SendError::Transient {
                    code: "UNKNOWN",
                    message: "send task panicked".to_string(),
                }),
            })
        })
        .collect()
}

/// Handler for every email job type.
///
/// - all delivered: success
/// - some transient failures: retryable, next try only targets those contacts
/// - only permanent failures left and nothing delivered: non-retryable
pub async fn send_email_job(job: &Job, ctx: &JobContext) -> Result<(), JobError> {
    let payload = JobPayload::parse(&job.job_type, &job.payload).map_err(JobError::bad_payload)?;
    let email = payload.email();

    let outcomes = deliver_to_recipients(&payload, ctx).await;

    let mut delivered = 0usize;
    let mut transient: Vec<String> = Vec::new();
    let mut transient_code: Option<&'static str> = None;
    let mut permanent: Vec<String> = Vec::new();

    for o in &outcomes {
        let event = NewEngagementEvent::new(EventType::EmailSent, email.company_id.clone())
            .contact(o.contact_id.clone())
            .keys(Some(email.offer_key.clone()), email.campaign_key.clone())
            .job(job.id);

        match &o.result {
            Ok(()) => {
                delivered += 1;
                ctx.recorder.record(event).await;
            }
            Err(e) => {
                let mut event = event.metadata(json!({ "error": e.to_string() }));
                event.event_type = EventType::EmailFailed;
                ctx.recorder.record(event).await;

                match e {
                    SendError::Transient { code, .. } => {
                        transient_code.get_or_insert(code);
                        transient.push(o.contact_id.clone());
                    }
                    SendError::Permanent(_) => permanent.push(o.contact_id.clone()),
                }
            }
        }
    }

    tracing::debug!(
        job_id = %job.id,
        worker_id = %ctx.worker_id,
        delivered,
        transient = transient.len(),
        permanent = permanent.len(),
        "email job delivery finished"
    );

    if !transient.is_empty() {
        let code = if delivered == 0 && permanent.is_empty() {
            transient_code.unwrap_or("DEPENDENCY_DOWN")
        } else {
            "PARTIAL_DELIVERY"
        };
        let message = format!(
            "{} of {} recipients need another try: {}",
            transient.len(),
            outcomes.len(),
            transient.join(",")
        );
        let mut err = JobError::new(code, message);
        if transient.len() < email.contact_ids.len() {
            err = err.with_retry_payload(payload.map_email(|e| e.with_contacts(transient)).to_value());
        }
        return Err(err);
    }

    if delivered == 0 && !permanent.is_empty() {
        return Err(JobError::new(
            "RECIPIENT_REJECTED",
            format!("provider rejected every recipient: {}", permanent.join(",")),
        ));
    }

    Ok(())
}

pub fn build_registry(handler_timeout: Duration, max_concurrency: usize) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    for job_type in [SEND_OFFER_EMAIL, SEND_CAMPAIGN_EMAIL, SEND_REORDER_EMAIL] {
        registry.register_with_options(
            job_type,
            |job, ctx| boxed(send_email_job(job, ctx)),
            HandlerOptions::new()
                .max_concurrency(max_concurrency)
                .timeout(handler_timeout),
        );
    }

    Arc::new(registry)
}

/// Dead-job audit event for dashboards. Works on raw JSON so malformed payloads are audited too.
pub fn dead_job_event(job: &Job, reason: &str, error: &JobError) -> NewEngagementEvent {
    let field = |name: &str| {
        job.payload
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    NewEngagementEvent::new(
        EventType::JobDead,
        field("company_id").unwrap_or_else(|| "unknown".to_string()),
    )
    .keys(field("offer_key"), field("campaign_key"))
    .job(job.id)
    .metadata(json!({
        "job_type": job.job_type,
        "reason": reason,
        "attempts": job.attempts,
        "error_code": error.code,
        "error_message": error.message,
    }))
}
