mod common;

use chrono::{Duration, Utc};

use common::{harness_for, reorder_job};
use finishflow::email::SendError;
use finishflow::engagement::EventType;
use finishflow::jobs::model::AttemptStatus;
use finishflow::jobs::store::JobStore;
use finishflow::jobs::{JobOutcome, JobStatus, MemoryJobStore};

#[tokio::test]
async fn concurrent_workers_never_run_the_same_job_twice() {
    let store = MemoryJobStore::arc();
    let a = harness_for("worker-a", 3, store.clone());
    let b = harness_for("worker-b", 3, store.clone());

    let mut ids = Vec::new();
    for i in 0..20 {
        let mut email = reorder_job();
        email.company_id = format!("C{i}");
        ids.push(a.producer.enqueue_reorder_email(email).await.unwrap().id);
    }

    let t = Utc::now() + Duration::seconds(1);
    let (ra, rb) = tokio::join!(a.runner.sweep(t), b.runner.sweep(t));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.claimed + rb.claimed, 16);

    let (da, db) = tokio::join!(a.runner.drain(t, 10), b.runner.drain(t, 10));
    assert_eq!(da.unwrap().claimed + db.unwrap().claimed, 4);

    for id in ids {
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(store.list_attempts(id).await.unwrap().len(), 1);
    }
    assert_eq!(a.sender.calls().len() + b.sender.calls().len(), 40);
}

#[tokio::test]
async fn live_lease_is_not_reclaimed() {
    let store = MemoryJobStore::arc();
    let h = harness_for("worker-b", 3, store.clone());
    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();

    let t = Utc::now() + Duration::seconds(1);
    store
        .claim_due("worker-a", t, Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.runner.reclaim_expired(t + Duration::seconds(30)).await.unwrap(), 0);

    let j = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Processing);
    assert_eq!(j.locked_by.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn expired_lease_counts_as_a_failed_attempt() {
    let store = MemoryJobStore::arc();
    let h = harness_for("worker-b", 3, store.clone());
    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();

    let t = Utc::now() + Duration::seconds(1);
    store
        .claim_due("worker-a", t, Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();

    let reap_at = t + Duration::seconds(61);
    assert_eq!(h.runner.reclaim_expired(reap_at).await.unwrap(), 1);

    let j = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Pending);
    assert_eq!(j.attempts, 1);
    assert_eq!(j.scheduled_for, reap_at + Duration::seconds(30));
    assert_eq!(j.last_error_code.as_deref(), Some("LEASE_EXPIRED"));
    assert_eq!(j.locked_by, None);
    assert_eq!(j.lease_expires_at, None);

    // picked up again once the retry delay has passed
    let report = h.runner.sweep(reap_at + Duration::seconds(30)).await.unwrap();
    assert_eq!(report.completed, 1);
}

#[tokio::test]
async fn expired_lease_on_last_attempt_goes_dead() {
    let store = MemoryJobStore::arc();
    let h = harness_for("worker-b", 1, store.clone());
    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();

    let t = Utc::now() + Duration::seconds(1);
    store
        .claim_due("worker-a", t, Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    h.runner.reclaim_expired(t + Duration::minutes(5)).await.unwrap();

    let j = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Dead);
    assert_eq!(j.attempts, 1);
    assert_eq!(j.dead_reason.as_deref(), Some("MAX_ATTEMPTS_EXCEEDED"));

    let dead: Vec<_> = h
        .events
        .all()
        .into_iter()
        .filter(|e| e.event_type == EventType::JobDead)
        .collect();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, Some(job.id));
    assert_eq!(dead[0].company_id, "C1");
}

#[tokio::test]
async fn stale_worker_cannot_overwrite_the_new_owner() {
    let store = MemoryJobStore::arc();
    let a = harness_for("worker-a", 3, store.clone());
    let b = harness_for("worker-b", 3, store.clone());
    let job = a.producer.enqueue_reorder_email(reorder_job()).await.unwrap();

    let t = Utc::now() + Duration::seconds(1);
    let claimed = store
        .claim_due("worker-a", t, Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();

    // worker-a stalls past its lease; worker-b reaps and takes over
    let later = t + Duration::minutes(10);
    b.runner.reclaim_expired(later).await.unwrap();
    let taken = store
        .claim_due("worker-b", later + Duration::minutes(1), Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(taken.id, job.id);

    let outcome = a.runner.run_job(claimed, t).await.unwrap();
    assert_eq!(outcome, JobOutcome::Lost);

    let j = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Processing);
    assert_eq!(j.locked_by.as_deref(), Some("worker-b"));
    assert_eq!(j.attempts, 1);
}

#[tokio::test]
async fn reaping_closes_the_abandoned_attempt_row() {
    let store = MemoryJobStore::arc();
    let h = harness_for("worker-b", 1, store.clone());
    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();

    let t = Utc::now() + Duration::seconds(1);
    store
        .claim_due("worker-a", t, Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    store.start_attempt(job.id, "worker-a", t).await.unwrap();

    let reap_at = t + Duration::minutes(5);
    h.runner.reclaim_expired(reap_at).await.unwrap();

    let j = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Dead);

    let attempts = store.list_attempts(job.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Failed);
    assert_eq!(attempts[0].finished_at, Some(reap_at));
    assert_eq!(attempts[0].error_code.as_deref(), Some("LEASE_EXPIRED"));
    assert_eq!(attempts[0].worker_id, "worker-a");
}

#[tokio::test]
async fn reaped_job_backs_off_like_any_other_failure() {
    let store = MemoryJobStore::arc();
    let h = harness_for("worker-b", 5, store.clone());
    for contact in ["K1", "K2"] {
        h.sender
            .fail_next(contact, SendError::unavailable("provider 503"), 2);
    }
    let job = h.producer.enqueue_reorder_email(reorder_job()).await.unwrap();

    // two ordinary failures: 30s then 60s
    let mut t = Utc::now() + Duration::seconds(1);
    for _ in 0..2 {
        h.runner.sweep(t).await.unwrap();
        t = t + Duration::hours(1);
    }
    assert_eq!(store.get(job.id).await.unwrap().unwrap().attempts, 2);

    // third try is lost to a crash
    store
        .claim_due("worker-a", t, Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    let reap_at = t + Duration::minutes(5);
    h.runner.reclaim_expired(reap_at).await.unwrap();

    let j = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(j.status, JobStatus::Pending);
    assert_eq!(j.attempts, 3);
    assert_eq!(j.scheduled_for, reap_at + Duration::seconds(120));
}
