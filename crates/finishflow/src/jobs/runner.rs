use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::handlers::{dead_job_event, HandlerRegistry, JobContext, JobError};
use crate::jobs::model::{decide_failure, AttemptOutcome, FailureDecision, Job};
use crate::jobs::retry::{next_delay_seconds, RetryConfig};
use crate::jobs::store::{DeadLetter, JobStore, Requeue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retried { attempts: i32, next_run_at: DateTime<Utc> },
    Dead { attempts: i32 },
    /// Another worker owns the row now (our lease expired mid-run).
    Lost,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead: usize,
    pub lost: usize,
}

impl SweepReport {
    fn tally(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Retried { .. } => self.retried += 1,
            JobOutcome::Dead { .. } => self.dead += 1,
            JobOutcome::Lost => self.lost += 1,
        }
    }

    fn merge(&mut self, other: &SweepReport) {
        self.claimed += other.claimed;
        self.completed += other.completed;
        self.retried += other.retried;
        self.dead += other.dead;
        self.lost += other.lost;
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub lease: Duration,
    pub batch_size: usize,
    pub retry: RetryConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            lease: Duration::seconds(60),
            batch_size: 16,
            retry: RetryConfig::default(),
        }
    }
}

/// Claims due jobs, runs their handler and applies the resulting transition.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    ctx: JobContext,
    cfg: RunnerConfig,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        ctx: JobContext,
        cfg: RunnerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            ctx,
            cfg,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.ctx.worker_id
    }

    /// Claim up to `batch_size` due jobs and run them concurrently.
    /// Jobs that are not pending (completed, dead, already claimed) are never touched.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        let mut set = JoinSet::new();

        let mut first_err = None;

        for _ in 0..self.cfg.batch_size.max(1) {
            let job = match self
                .store
                .claim_due(&self.ctx.worker_id, now, self.cfg.lease)
                .await
            {
                Ok(Some(job)) => job,
                Ok(None) => break,
                // stop claiming, but let the jobs already running finish
                Err(e) => {
                    tracing::error!(worker_id = %self.ctx.worker_id, error = %e, "claim failed");
                    first_err = Some(e);
                    break;
                }
            };
            report.claimed += 1;

            let runner = self.clone();
            set.spawn(async move { runner.run_job(job, now).await });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => report.tally(outcome),
                Ok(Err(e)) => {
                    tracing::error!(worker_id = %self.ctx.worker_id, error = %e, "job bookkeeping failed");
                    first_err.get_or_insert(e);
                }
                // the lease will expire and reclaim_expired picks the job up
                Err(e) => tracing::error!(worker_id = %self.ctx.worker_id, error = %e, "job task panicked"),
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }

        if report.claimed > 0 {
            tracing::info!(
                worker_id = %self.ctx.worker_id,
                claimed = report.claimed,
                completed = report.completed,
                retried = report.retried,
                dead = report.dead,
                lost = report.lost,
                "sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep until nothing due is left (single cron invocation). `max_rounds` bounds the loop
    /// in case retries get scheduled at `now` again.
    pub async fn drain(
        &self,
        now: DateTime<Utc>,
        max_rounds: usize,
    ) -> Result<SweepReport, StoreError> {
        let mut total = SweepReport::default();
        for _ in 0..max_rounds.max(1) {
            let report = self.sweep(now).await?;
            total.merge(&report);
            if report.claimed == 0 {
                break;
            }
        }
        Ok(total)
    }

    /// Execute one claimed job and record the attempt.
    pub async fn run_job(&self, job: Job, now: DateTime<Utc>) -> Result<JobOutcome, StoreError> {
        let attempt = self
            .store
            .start_attempt(job.id, &self.ctx.worker_id, now)
            .await?;

        tracing::debug!(
            worker_id = %self.ctx.worker_id,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt_no = attempt.attempt_no,
            "running job"
        );

        let start = Instant::now();
        let result = match self.registry.handler_for(&job.job_type) {
            Some(entry) => entry.run(&job, &self.ctx).await,
            None => Err(JobError::new(
                "UNKNOWN_JOB_TYPE",
                format!("no handler for job_type={}", job.job_type),
            )),
        };
        let latency_ms = start.elapsed().as_millis().min(i32::MAX as u128) as i32;

        match result {
            Ok(()) => self.on_success(&job, attempt.id, latency_ms, now).await,
            Err(err) => self.on_failure(&job, attempt.id, latency_ms, err, now).await,
        }
    }

    pub async fn on_success(
        &self,
        job: &Job,
        attempt_id: Uuid,
        latency_ms: i32,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome, StoreError> {
        self.store
            .finish_attempt(attempt_id, AttemptOutcome::succeeded(latency_ms), now)
            .await?;

        match self
            .store
            .mark_completed(job.id, &self.ctx.worker_id, now)
            .await
        {
            Ok(_) => Ok(JobOutcome::Completed),
            Err(e) => self.lost_or(e, job.id),
        }
    }

    pub async fn on_failure(
        &self,
        job: &Job,
        attempt_id: Uuid,
        latency_ms: i32,
        err: JobError,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome, StoreError> {
        // 1) close out the attempt row (audit)
        self.store
            .finish_attempt(
                attempt_id,
                AttemptOutcome::failed(latency_ms, err.code, &err.message),
                now,
            )
            .await?;

        // 2) decide retry vs dead
        match decide_failure(job.attempts, job.max_attempts, err.retryable) {
            FailureDecision::Retry { attempts } => {
                let mut rng = StdRng::from_entropy();
                let delay = next_delay_seconds(attempts, &self.cfg.retry, &mut rng);
                let next_run_at = now + Duration::seconds(delay);

                let res = self
                    .store
                    .requeue(
                        job.id,
                        &self.ctx.worker_id,
                        Requeue {
                            attempts,
                            scheduled_for: next_run_at,
                            error_code: err.code.to_string(),
                            error_message: err.message.clone(),
                            payload: err.retry_payload.clone(),
                        },
                        now,
                    )
                    .await;

                match res {
                    Ok(_) => {
                        tracing::warn!(
                            job_id = %job.id,
                            code = err.code,
                            attempts,
                            max_attempts = job.max_attempts,
                            next_run_at = %next_run_at,
                            "job failed, retry scheduled"
                        );
                        Ok(JobOutcome::Retried {
                            attempts,
                            next_run_at,
                        })
                    }
                    Err(e) => self.lost_or(e, job.id),
                }
            }
            FailureDecision::Dead { attempts, reason } => {
                let res = self
                    .store
                    .mark_dead(
                        job.id,
                        &self.ctx.worker_id,
                        DeadLetter {
                            attempts,
                            reason: reason.as_str().to_string(),
                            error_code: err.code.to_string(),
                            error_message: err.message.clone(),
                        },
                        now,
                    )
                    .await;

                match res {
                    Ok(dead) => {
                        tracing::error!(
                            job_id = %job.id,
                            code = err.code,
                            reason = reason.as_str(),
                            attempts,
                            "job moved to dead letter"
                        );
                        self.ctx
                            .recorder
                            .record(dead_job_event(&dead, reason.as_str(), &err))
                            .await;
                        Ok(JobOutcome::Dead { attempts })
                    }
                    Err(e) => self.lost_or(e, job.id),
                }
            }
        }
    }

    /// Recover jobs whose worker died mid-run. Each expiry counts as one failed attempt.
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let touched = self.store.reclaim_expired(now, &self.cfg.retry).await?;

        for job in touched.iter().filter(|j| j.status.is_terminal()) {
            let err = JobError::new(
                "LEASE_EXPIRED",
                job.last_error_message.clone().unwrap_or_default(),
            );
            let reason = job.dead_reason.as_deref().unwrap_or("MAX_ATTEMPTS_EXCEEDED");
            self.ctx
                .recorder
                .record(dead_job_event(job, reason, &err))
                .await;
        }

        if !touched.is_empty() {
            tracing::warn!(
                worker_id = %self.ctx.worker_id,
                reclaimed = touched.len(),
                "reclaimed jobs with expired leases"
            );
        }
        Ok(touched.len())
    }

    fn lost_or(&self, e: StoreError, job_id: Uuid) -> Result<JobOutcome, StoreError> {
        match e {
            StoreError::NotClaimed { .. } => {
                tracing::warn!(
                    worker_id = %self.ctx.worker_id,
                    job_id = %job_id,
                    "lease lost before outcome was written"
                );
                Ok(JobOutcome::Lost)
            }
            other => Err(other),
        }
    }
}
