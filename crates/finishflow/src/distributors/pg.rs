use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{Distributor, DistributorStore, TierChange};
use crate::error::StoreError;

#[derive(Debug, sqlx::FromRow)]
struct DistributorRow {
    code: String,
    name: String,
    pricing_tier: String,
    updated_at: DateTime<Utc>,
}

impl From<DistributorRow> for Distributor {
    fn from(r: DistributorRow) -> Self {
        Self {
            code: r.code,
            name: r.name,
            pricing_tier: r.pricing_tier,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgDistributorStore {
    pool: PgPool,
}

impl PgDistributorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DistributorStore for PgDistributorStore {
    async fn list(&self) -> Result<Vec<Distributor>, StoreError> {
        let rows = sqlx::query_as::<_, DistributorRow>(
            r#"
            SELECT code, name, pricing_tier, updated_at
            FROM distributors
            ORDER BY code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Distributor::from).collect())
    }

    async fn upsert(&self, d: Distributor) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO distributors (code, name, pricing_tier, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code) DO UPDATE
              SET name = EXCLUDED.name,
                  pricing_tier = EXCLUDED.pricing_tier,
                  updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&d.code)
        .bind(&d.name)
        .bind(&d.pricing_tier)
        .bind(d.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_tiers(
        &self,
        changes: &[TierChange],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let codes: Vec<String> = changes.iter().map(|c| c.code.clone()).collect();
        let tiers: Vec<String> = changes.iter().map(|c| c.pricing_tier.clone()).collect();

        let res = sqlx::query(
            r#"
            UPDATE distributors d
            SET pricing_tier = c.pricing_tier,
                updated_at = $3
            FROM UNNEST($1::text[], $2::text[]) AS c(code, pricing_tier)
            WHERE d.code = c.code
            "#,
        )
        .bind(&codes)
        .bind(&tiers)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}
