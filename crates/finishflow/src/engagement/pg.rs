use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::{EngagementEvent, EngagementQuery, EngagementStore, EventType, NewEngagementEvent};
use crate::error::StoreError;

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    event_type: String,
    company_id: String,
    contact_id: Option<String>,
    campaign_key: Option<String>,
    offer_key: Option<String>,
    value_cents: Option<i64>,
    job_id: Option<Uuid>,
    metadata: Value,
}

impl TryFrom<EventRow> for EngagementEvent {
    type Error = StoreError;

    fn try_from(r: EventRow) -> Result<Self, Self::Error> {
        let event_type = EventType::parse(&r.event_type).ok_or_else(|| {
            StoreError::Corrupt(format!("event {} has type {}", r.id, r.event_type))
        })?;

        Ok(EngagementEvent {
            id: r.id,
            occurred_at: r.occurred_at,
            event_type,
            company_id: r.company_id,
            contact_id: r.contact_id,
            campaign_key: r.campaign_key,
            offer_key: r.offer_key,
            value_cents: r.value_cents,
            job_id: r.job_id,
            metadata: r.metadata,
        })
    }
}

#[derive(Clone)]
pub struct PgEngagementStore {
    pool: PgPool,
}

impl PgEngagementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EngagementStore for PgEngagementStore {
    async fn append(&self, event: NewEngagementEvent) -> Result<EngagementEvent, StoreError> {
        let e = event.into_event();

        sqlx::query(
            r#"
            INSERT INTO engagement_events (
              id, occurred_at, event_type, company_id, contact_id,
              campaign_key, offer_key, value_cents, job_id, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(e.id)
        .bind(e.occurred_at)
        .bind(e.event_type.as_str())
        .bind(&e.company_id)
        .bind(&e.contact_id)
        .bind(&e.campaign_key)
        .bind(&e.offer_key)
        .bind(e.value_cents)
        .bind(e.job_id)
        .bind(&e.metadata)
        .execute(&self.pool)
        .await?;

        Ok(e)
    }

    async fn list(&self, query: &EngagementQuery) -> Result<Vec<EngagementEvent>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, occurred_at, event_type, company_id, contact_id,
                   campaign_key, offer_key, value_cents, job_id, metadata
            FROM engagement_events
            WHERE company_id = $1
              AND ($2::timestamptz IS NULL OR occurred_at >= $2)
              AND ($3::timestamptz IS NULL OR occurred_at < $3)
            ORDER BY occurred_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(&query.company_id)
        .bind(query.from)
        .bind(query.to)
        .bind(query.clamped_limit())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EngagementEvent::try_from).collect()
    }
}
