#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use sqlx::{postgres::PgPoolOptions, PgPool};

use finishflow::email::{EmailMessage, EmailSender, SendError};
use finishflow::engagement::{EngagementRecorder, MemoryEngagementStore};
use finishflow::jobs::payload::EmailJob;
use finishflow::jobs::retry::RetryConfig;
use finishflow::jobs::{
    build_registry, JobContext, JobRunner, JobStore, MemoryJobStore, RunnerConfig,
};
use finishflow::producer::JobProducer;

/// Postgres pool for integration tests, or `None` when `TEST_DATABASE_URL` is unset.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query(
        r#"
        TRUNCATE TABLE
            job_attempts,
            engagement_events,
            distributors,
            jobs
        CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("truncate failed");

    Some(pool)
}

/// Email sender with per-contact scripted failures. Unscripted contacts succeed.
#[derive(Default)]
pub struct ScriptedSender {
    queued: Mutex<HashMap<String, VecDeque<SendError>>>,
    always: Mutex<HashMap<String, SendError>>,
    calls: Mutex<Vec<String>>,
    delivered: Mutex<Vec<String>>,
}

impl ScriptedSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `times` sends to `contact_id`, then succeed.
    pub fn fail_next(&self, contact_id: &str, err: SendError, times: usize) {
        let mut q = self.queued.lock().unwrap();
        let entry = q.entry(contact_id.to_string()).or_default();
        for _ in 0..times {
            entry.push_back(err.clone());
        }
    }

    pub fn fail_always(&self, contact_id: &str, err: SendError) {
        self.always
            .lock()
            .unwrap()
            .insert(contact_id.to_string(), err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for ScriptedSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError> {
        let contact = message.contact_id.clone();
        self.calls.lock().unwrap().push(contact.clone());

        if let Some(err) = self.always.lock().unwrap().get(&contact) {
            return Err(err.clone());
        }
        if let Some(err) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&contact)
            .and_then(|q| q.pop_front())
        {
            return Err(err);
        }

        self.delivered.lock().unwrap().push(contact);
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub events: Arc<MemoryEngagementStore>,
    pub sender: Arc<ScriptedSender>,
    pub runner: JobRunner,
    pub producer: JobProducer,
}

/// Deterministic retry schedule: 30s, 60s, 120s ... capped at 1h, no jitter.
pub fn retry_cfg() -> RetryConfig {
    RetryConfig {
        base_seconds: 30,
        max_seconds: 3600,
        jitter_pct: 0.0,
    }
}

pub fn harness(max_attempts: i32) -> Harness {
    harness_for("worker-a", max_attempts, MemoryJobStore::arc())
}

pub fn context(
    worker_id: &str,
    sender: Arc<ScriptedSender>,
    events: Arc<MemoryEngagementStore>,
) -> JobContext {
    JobContext {
        worker_id: worker_id.to_string(),
        sender,
        recorder: EngagementRecorder::new(events),
        recipient_concurrency: 2,
    }
}

/// Runner over any store, with the test retry schedule and a 60s lease.
pub fn runner_for(store: Arc<dyn JobStore>, ctx: JobContext) -> JobRunner {
    JobRunner::new(
        store,
        build_registry(std::time::Duration::from_secs(5), 8),
        ctx,
        RunnerConfig {
            lease: Duration::seconds(60),
            batch_size: 8,
            retry: retry_cfg(),
        },
    )
}

pub fn harness_for(worker_id: &str, max_attempts: i32, store: Arc<MemoryJobStore>) -> Harness {
    let events = Arc::new(MemoryEngagementStore::new());
    let sender = ScriptedSender::new();

    let ctx = context(worker_id, sender.clone(), events.clone());
    let runner = runner_for(store.clone(), ctx);

    Harness {
        producer: JobProducer::new(store.clone(), max_attempts),
        store,
        events,
        sender,
        runner,
    }
}

/// `{company_id: C1, contact_ids: [K1, K2], offer_key: reorder_reminder, campaign_key: test}`
pub fn reorder_job() -> EmailJob {
    EmailJob {
        company_id: "C1".into(),
        contact_ids: vec!["K1".into(), "K2".into()],
        offer_key: "reorder_reminder".into(),
        campaign_key: Some("test".into()),
        subject: None,
        preview: None,
    }
}
