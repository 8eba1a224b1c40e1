//! Append-only log of customer-visible interactions (email sends/opens/clicks,
//! checkout starts, page views) used by dashboards and company timelines.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

pub mod memory;
pub mod pg;

pub use memory::MemoryEngagementStore;
pub use pg::PgEngagementStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EmailSent,
    EmailFailed,
    EmailOpen,
    EmailClick,
    CheckoutStarted,
    PageView,
    JobDead,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::EmailSent => "email_sent",
            EventType::EmailFailed => "email_failed",
            EventType::EmailOpen => "email_open",
            EventType::EmailClick => "email_click",
            EventType::CheckoutStarted => "checkout_started",
            EventType::PageView => "page_view",
            EventType::JobDead => "job_dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email_sent" => Some(EventType::EmailSent),
            "email_failed" => Some(EventType::EmailFailed),
            "email_open" => Some(EventType::EmailOpen),
            "email_click" => Some(EventType::EmailClick),
            "checkout_started" => Some(EventType::CheckoutStarted),
            "page_view" => Some(EventType::PageView),
            "job_dead" => Some(EventType::JobDead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementEvent {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event_type: EventType,
    pub company_id: String,
    pub contact_id: Option<String>,
    pub campaign_key: Option<String>,
    pub offer_key: Option<String>,
    pub value_cents: Option<i64>,
    pub job_id: Option<Uuid>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewEngagementEvent {
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    pub event_type: EventType,
    pub company_id: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub campaign_key: Option<String>,
    #[serde(default)]
    pub offer_key: Option<String>,
    #[serde(default)]
    pub value_cents: Option<i64>,
    #[serde(default)]
    pub job_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Value,
}

impl NewEngagementEvent {
    pub fn new(event_type: EventType, company_id: impl Into<String>) -> Self {
        Self {
            occurred_at: Utc::now(),
            event_type,
            company_id: company_id.into(),
            contact_id: None,
            campaign_key: None,
            offer_key: None,
            value_cents: None,
            job_id: None,
            metadata: Value::Null,
        }
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn contact(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }

    pub fn keys(mut self, offer_key: Option<String>, campaign_key: Option<String>) -> Self {
        self.offer_key = offer_key;
        self.campaign_key = campaign_key;
        self
    }

    pub fn job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn into_event(self) -> EngagementEvent {
        EngagementEvent {
            id: Uuid::new_v4(),
            occurred_at: self.occurred_at,
            event_type: self.event_type,
            company_id: self.company_id,
            contact_id: self.contact_id,
            campaign_key: self.campaign_key,
            offer_key: self.offer_key,
            value_cents: self.value_cents,
            job_id: self.job_id,
            metadata: self.metadata,
        }
    }
}

/// Company timeline query: `[from, to)`, newest first.
#[derive(Debug, Clone)]
pub struct EngagementQuery {
    pub company_id: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl EngagementQuery {
    pub fn for_company(company_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            from: None,
            to: None,
            limit: 100,
        }
    }

    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, 500)
    }

    pub fn matches(&self, e: &EngagementEvent) -> bool {
        e.company_id == self.company_id
            && self.from.map_or(true, |from| e.occurred_at >= from)
            && self.to.map_or(true, |to| e.occurred_at < to)
    }
}

/// No update or delete: events are write-once.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    async fn append(&self, event: NewEngagementEvent) -> Result<EngagementEvent, StoreError>;

    async fn list(&self, query: &EngagementQuery) -> Result<Vec<EngagementEvent>, StoreError>;
}

/// Fire-and-forget front for [`EngagementStore`]: callers never see write errors.
#[derive(Clone)]
pub struct EngagementRecorder {
    store: Arc<dyn EngagementStore>,
}

impl EngagementRecorder {
    pub fn new(store: Arc<dyn EngagementStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EngagementStore> {
        &self.store
    }

    pub async fn record(&self, event: NewEngagementEvent) {
        let event_type = event.event_type;
        let company_id = event.company_id.clone();
        if let Err(e) = self.store.append(event).await {
            tracing::warn!(
                event_type = event_type.as_str(),
                company_id = %company_id,
                error = %e,
                "failed to record engagement event"
            );
        }
    }
}
