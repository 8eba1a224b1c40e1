use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaign::Recipients;
use crate::error::StoreError;
use crate::jobs::model::{Job, JobStatus, NewJob};
use crate::jobs::payload::{EmailJob, JobPayload};
use crate::jobs::store::JobStore;

/// Campaign-wide fields; each company gets its own job carrying these plus its contacts.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignSpec {
    pub campaign_key: String,
    pub offer_key: String,
    pub subject: String,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompanyOutcome {
    Enqueued { company_id: String, job_id: Uuid },
    Skipped { company_id: String },
    Failed { company_id: String, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignReport {
    pub enqueued: usize,
    pub skipped: usize,
    pub failed: usize,
    pub items: Vec<CompanyOutcome>,
}

impl CampaignReport {
    fn push(&mut self, outcome: CompanyOutcome) {
        match &outcome {
            CompanyOutcome::Enqueued { .. } => self.enqueued += 1,
            CompanyOutcome::Skipped { .. } => self.skipped += 1,
            CompanyOutcome::Failed { .. } => self.failed += 1,
        }
        self.items.push(outcome);
    }
}

/// Turns admin actions into pending job rows. Consent filtering is the caller's job.
#[derive(Clone)]
pub struct JobProducer {
    store: Arc<dyn JobStore>,
    default_max_attempts: i32,
}

impl JobProducer {
    pub fn new(store: Arc<dyn JobStore>, default_max_attempts: i32) -> Self {
        Self {
            store,
            default_max_attempts: default_max_attempts.max(1),
        }
    }

    pub async fn enqueue(
        &self,
        payload: JobPayload,
        scheduled_for: Option<DateTime<Utc>>,
        max_attempts: Option<i32>,
    ) -> Result<Job, StoreError> {
        payload.validate()?;

        let job = self
            .store
            .insert(NewJob {
                payload,
                scheduled_for: scheduled_for.unwrap_or_else(Utc::now),
                max_attempts: max_attempts.unwrap_or(self.default_max_attempts).max(1),
                replay_of_job_id: None,
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            scheduled_for = %job.scheduled_for,
            "job enqueued"
        );
        Ok(job)
    }

    /// One job per company. Companies without eligible contacts are skipped; a failed insert
    /// is reported for that company and the rest carry on.
    pub async fn enqueue_campaign(
        &self,
        spec: &CampaignSpec,
        targets: &[Recipients],
    ) -> CampaignReport {
        let mut report = CampaignReport::default();

        for target in targets {
            if target.contact_ids.is_empty() {
                tracing::debug!(company_id = %target.company_id, campaign_key = %spec.campaign_key, "no eligible contacts, skipping");
                report.push(CompanyOutcome::Skipped {
                    company_id: target.company_id.clone(),
                });
                continue;
            }

            let payload = JobPayload::SendCampaignEmail(EmailJob {
                company_id: target.company_id.clone(),
                contact_ids: target.contact_ids.clone(),
                offer_key: spec.offer_key.clone(),
                campaign_key: Some(spec.campaign_key.clone()),
                subject: Some(spec.subject.clone()),
                preview: spec.preview.clone(),
            });

            match self
                .enqueue(payload, spec.scheduled_for, spec.max_attempts)
                .await
            {
                Ok(job) => report.push(CompanyOutcome::Enqueued {
                    company_id: target.company_id.clone(),
                    job_id: job.id,
                }),
                Err(e) => {
                    tracing::warn!(
                        company_id = %target.company_id,
                        campaign_key = %spec.campaign_key,
                        error = %e,
                        "campaign enqueue failed for company"
                    );
                    report.push(CompanyOutcome::Failed {
                        company_id: target.company_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            campaign_key = %spec.campaign_key,
            enqueued = report.enqueued,
            skipped = report.skipped,
            failed = report.failed,
            "campaign enqueue finished"
        );
        report
    }

    pub async fn enqueue_reorder_email(&self, email: EmailJob) -> Result<Job, StoreError> {
        self.enqueue(JobPayload::SendReorderEmail(email), None, None)
            .await
    }

    pub async fn enqueue_test_offer(&self, email: EmailJob) -> Result<Job, StoreError> {
        self.enqueue(JobPayload::SendOfferEmail(email), None, None)
            .await
    }

    /// New pending job with the dead job's payload. The source row stays dead.
    pub async fn replay(
        &self,
        job_id: Uuid,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<Job, StoreError> {
        let src = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;

        if !matches!(src.status, JobStatus::Dead | JobStatus::Failed) {
            return Err(StoreError::InvalidState {
                job_id,
                status: src.status.to_string(),
                action: "replay",
            });
        }

        let payload = JobPayload::parse(&src.job_type, &src.payload)?;
        let job = self
            .store
            .insert(NewJob {
                payload,
                scheduled_for: scheduled_for.unwrap_or_else(Utc::now),
                max_attempts: src.max_attempts,
                replay_of_job_id: Some(src.id),
            })
            .await?;

        tracing::info!(job_id = %job.id, replay_of_job_id = %src.id, "job replayed");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::memory::MemoryJobStore;

    fn spec() -> CampaignSpec {
        CampaignSpec {
            campaign_key: "spring-promo".into(),
            offer_key: "creaser_blades".into(),
            subject: "Spring blades".into(),
            preview: None,
            scheduled_for: None,
            max_attempts: None,
        }
    }

    fn reorder(company_id: &str) -> EmailJob {
        EmailJob {
            company_id: company_id.into(),
            contact_ids: vec!["K1".into(), "K2".into()],
            offer_key: "reorder_reminder".into(),
            campaign_key: Some("test".into()),
            subject: None,
            preview: None,
        }
    }

    #[tokio::test]
    async fn invalid_payload_inserts_nothing() {
        let store = MemoryJobStore::arc();
        let producer = JobProducer::new(store.clone(), 3);

        let mut bad = reorder("C1");
        bad.contact_ids.clear();
        let err = producer.enqueue_reorder_email(bad).await.unwrap_err();
        assert!(matches!(err, StoreError::Payload(_)));

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn campaign_skips_companies_without_contacts() {
        let store = MemoryJobStore::arc();
        let producer = JobProducer::new(store.clone(), 3);

        let targets = vec![
            Recipients {
                company_id: "C1".into(),
                contact_ids: vec!["K1".into()],
            },
            Recipients {
                company_id: "C2".into(),
                contact_ids: vec![],
            },
            Recipients {
                company_id: "C3".into(),
                contact_ids: vec!["K7".into(), "K8".into()],
            },
        ];

        let report = producer.enqueue_campaign(&spec(), &targets).await;
        assert_eq!(report.enqueued, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            report.items[1],
            CompanyOutcome::Skipped {
                company_id: "C2".into()
            }
        );
    }

    #[tokio::test]
    async fn replay_requires_a_dead_source() {
        let store = MemoryJobStore::arc();
        let producer = JobProducer::new(store.clone(), 3);

        let job = producer.enqueue_reorder_email(reorder("C1")).await.unwrap();
        let err = producer.replay(job.id, None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { action: "replay", .. }));

        let err = producer.replay(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
