mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use common::{harness, reorder_job};
use finishflow::email::SendError;
use finishflow::engagement::{EngagementRecorder, EventType};
use finishflow::jobs::model::{AttemptStatus, NewJob};
use finishflow::jobs::payload::{EmailJob, JobPayload};
use finishflow::jobs::store::JobStore;
use finishflow::jobs::timeline::build_timeline;
use finishflow::jobs::{
    HandlerRegistry, JobContext, JobRunner, JobStatus, RunnerConfig, SweepReport,
};

#[tokio::test]
async fn successful_send_completes_without_touching_attempts() {
    let h = harness(3);

    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);

    let report = h.runner.sweep(Utc::now() + Duration::seconds(1)).await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            claimed: 1,
            completed: 1,
            ..SweepReport::default()
        }
    );

    let job = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.locked_by, None);

    let mut delivered = h.sender.delivered();
    delivered.sort();
    assert_eq!(delivered, vec!["K1", "K2"]);

    let sent: Vec<_> = h
        .events
        .all()
        .into_iter()
        .filter(|e| e.event_type == EventType::EmailSent)
        .collect();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|e| e.job_id == Some(job.id)
        && e.company_id == "C1"
        && e.offer_key.as_deref() == Some("reorder_reminder")));

    let attempts = h.store.list_attempts(job.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Succeeded);
}

#[tokio::test]
async fn transient_failures_retry_then_go_dead_at_max_attempts() {
    let h = harness(3);
    for contact in ["K1", "K2"] {
        h.sender
            .fail_always(contact, SendError::unavailable("provider 503"));
    }

    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();
    let t1 = Utc::now() + Duration::seconds(1);

    // first failure: requeued with backoff
    let report = h.runner.sweep(t1).await.unwrap();
    assert_eq!(report.retried, 1);
    let j = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Pending);
    assert_eq!(j.attempts, 1);
    assert_eq!(j.scheduled_for, t1 + Duration::seconds(30));
    assert_eq!(j.last_error_code.as_deref(), Some("DEPENDENCY_DOWN"));

    // not due yet
    let report = h.runner.sweep(t1 + Duration::seconds(10)).await.unwrap();
    assert_eq!(report.claimed, 0);

    let t2 = t1 + Duration::hours(1);
    h.runner.sweep(t2).await.unwrap();
    let j = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Pending);
    assert_eq!(j.attempts, 2);
    assert_eq!(j.scheduled_for, t2 + Duration::seconds(60));

    let t3 = t2 + Duration::hours(1);
    let report = h.runner.sweep(t3).await.unwrap();
    assert_eq!(report.dead, 1);
    let j = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Dead);
    assert_eq!(j.attempts, 3);
    assert_eq!(j.dead_reason.as_deref(), Some("MAX_ATTEMPTS_EXCEEDED"));

    let dead_events: Vec<_> = h
        .events
        .all()
        .into_iter()
        .filter(|e| e.event_type == EventType::JobDead)
        .collect();
    assert_eq!(dead_events.len(), 1);
    assert_eq!(dead_events[0].metadata["reason"], "MAX_ATTEMPTS_EXCEEDED");

    let attempts = h.store.list_attempts(job.id).await.unwrap();
    assert_eq!(
        attempts.iter().map(|a| a.attempt_no).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(attempts.iter().all(|a| a.status == AttemptStatus::Failed));
}

#[tokio::test]
async fn sweeping_terminal_jobs_is_a_no_op() {
    let h = harness(1);
    h.sender
        .fail_always("K9", SendError::timeout("provider timeout"));

    let ok = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();
    let mut failing = reorder_job();
    failing.contact_ids = vec!["K9".into()];
    let dead = h.producer.enqueue_reorder_email(failing).await.unwrap();

    let t = Utc::now() + Duration::seconds(1);
    let first = h.runner.sweep(t).await.unwrap();
    assert_eq!(first.completed, 1);
    assert_eq!(first.dead, 1);

    let before_ok = h.store.get(ok.id).await.unwrap().unwrap();
    let before_dead = h.store.get(dead.id).await.unwrap().unwrap();
    let calls = h.sender.calls().len();

    for days in 1..=3 {
        let again = h.runner.sweep(t + Duration::days(days)).await.unwrap();
        assert_eq!(again, SweepReport::default());
    }

    assert_eq!(h.store.get(ok.id).await.unwrap().unwrap(), before_ok);
    assert_eq!(h.store.get(dead.id).await.unwrap().unwrap(), before_dead);
    assert_eq!(h.sender.calls().len(), calls);
}

#[tokio::test]
async fn permanent_rejection_is_dead_immediately() {
    let h = harness(5);
    for contact in ["K1", "K2"] {
        h.sender
            .fail_always(contact, SendError::Permanent("mailbox unavailable".into()));
    }

    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();
    h.runner.sweep(Utc::now() + Duration::seconds(1)).await.unwrap();

    let j = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Dead);
    assert_eq!(j.attempts, 1);
    assert_eq!(j.dead_reason.as_deref(), Some("NON_RETRYABLE"));
    assert_eq!(j.last_error_code.as_deref(), Some("RECIPIENT_REJECTED"));
}

#[tokio::test]
async fn malformed_payload_is_dead_without_sending() {
    let h = harness(5);

    // bypass the producer: an older writer stored a payload without contacts
    let job = h
        .store
        .insert(NewJob::now(JobPayload::SendOfferEmail(reorder_job()), 5))
        .await
        .unwrap();
    h.store
        .claim_due("fixture", Utc::now() + Duration::seconds(1), Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    h.store
        .requeue(
            job.id,
            "fixture",
            finishflow::jobs::store::Requeue {
                attempts: 0,
                scheduled_for: Utc::now(),
                error_code: "TIMEOUT".into(),
                error_message: "fixture".into(),
                payload: Some(json!({ "company_id": "C1", "offer_key": "x" })),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    h.runner.sweep(Utc::now() + Duration::seconds(1)).await.unwrap();

    let j = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Dead);
    assert_eq!(j.last_error_code.as_deref(), Some("BAD_PAYLOAD"));
    assert_eq!(j.dead_reason.as_deref(), Some("NON_RETRYABLE"));
    assert!(h.sender.calls().is_empty());

    // the audit event still finds the company on the raw payload
    let dead = h
        .events
        .all()
        .into_iter()
        .find(|e| e.event_type == EventType::JobDead)
        .unwrap();
    assert_eq!(dead.company_id, "C1");
}

#[tokio::test]
async fn partial_delivery_retries_only_the_remaining_recipients() {
    let h = harness(3);
    h.sender
        .fail_next("K2", SendError::timeout("slow provider"), 1);

    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();
    let t1 = Utc::now() + Duration::seconds(1);
    h.runner.sweep(t1).await.unwrap();

    let j = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Pending);
    assert_eq!(j.attempts, 1);
    assert_eq!(j.last_error_code.as_deref(), Some("PARTIAL_DELIVERY"));
    let narrowed: EmailJob = serde_json::from_value(j.payload.clone()).unwrap();
    assert_eq!(narrowed.contact_ids, vec!["K2"]);
    assert_eq!(narrowed.offer_key, "reorder_reminder");

    h.runner.sweep(t1 + Duration::hours(1)).await.unwrap();
    let j = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Completed);
    assert_eq!(j.attempts, 1);

    // K1 got exactly one email
    let calls = h.sender.calls();
    assert_eq!(calls.iter().filter(|c| *c == "K1").count(), 1);
    assert_eq!(calls.iter().filter(|c| *c == "K2").count(), 2);
}

#[tokio::test]
async fn attempts_never_exceed_max() {
    for max in 1..=4 {
        let h = harness(max);
        h.sender
            .fail_always("K1", SendError::timeout("always slow"));
        let mut job = reorder_job();
        job.contact_ids = vec!["K1".into()];
        let job = h.producer.enqueue_reorder_email(job).await.unwrap();

        let mut t = Utc::now();
        let mut last_attempts = 0;
        for _ in 0..(max + 3) {
            t = t + Duration::hours(2);
            h.runner.sweep(t).await.unwrap();
            let j = h.store.get(job.id).await.unwrap().unwrap();
            assert!(j.attempts <= j.max_attempts);
            assert!(j.attempts >= last_attempts);
            last_attempts = j.attempts;
        }

        let j = h.store.get(job.id).await.unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Dead);
        assert_eq!(j.attempts, max);
    }
}

#[tokio::test]
async fn unknown_job_type_is_dead() {
    let h = harness(3);
    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();

    // a worker deployed without any handlers
    let ctx = JobContext {
        worker_id: "worker-old".into(),
        sender: h.sender.clone(),
        recorder: EngagementRecorder::new(h.events.clone()),
        recipient_concurrency: 1,
    };
    let bare = JobRunner::new(
        h.store.clone(),
        Arc::new(HandlerRegistry::new()),
        ctx,
        RunnerConfig::default(),
    );

    let report = bare.sweep(Utc::now() + Duration::seconds(1)).await.unwrap();
    assert_eq!(report.dead, 1);

    let j = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Dead);
    assert_eq!(j.attempts, 1);
    assert_eq!(j.last_error_code.as_deref(), Some("UNKNOWN_JOB_TYPE"));
    assert!(h.sender.calls().is_empty());
}

#[tokio::test]
async fn timeline_lists_attempts_with_suggested_actions() {
    let h = harness(3);
    h.sender
        .fail_next("K1", SendError::unavailable("provider 503"), 1);
    h.sender
        .fail_next("K2", SendError::unavailable("provider 503"), 1);

    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();
    let t1 = Utc::now() + Duration::seconds(1);
    h.runner.sweep(t1).await.unwrap();

    let tl = build_timeline(h.store.as_ref(), job.id).await.unwrap().unwrap();
    assert_eq!(tl.attempts.len(), 1);
    assert_eq!(tl.attempts[0].error_code.as_deref(), Some("DEPENDENCY_DOWN"));
    assert!(tl.attempts[0].suggested_action.is_some());
    assert_eq!(tl.next_run_at, Some(t1 + Duration::seconds(30)));
    assert!(tl.summary.starts_with("Retry 2 of 3"));

    h.runner.sweep(t1 + Duration::hours(1)).await.unwrap();
    let tl = build_timeline(h.store.as_ref(), job.id).await.unwrap().unwrap();
    assert_eq!(tl.attempts.len(), 2);
    assert_eq!(tl.attempts[1].status, AttemptStatus::Succeeded);
    assert_eq!(tl.summary, "Delivered.");
    assert_eq!(tl.last_worker_id.as_deref(), Some("worker-a"));
}
