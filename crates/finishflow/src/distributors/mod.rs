//! Distributor pricing tiers and portal links.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub mod memory;
pub mod pg;

pub use memory::MemoryDistributorStore;
pub use pg::PgDistributorStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distributor {
    pub code: String,
    pub name: String,
    pub pricing_tier: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierChange {
    pub code: String,
    pub pricing_tier: String,
}

#[async_trait]
pub trait DistributorStore: Send + Sync {
    /// Ordered by code.
    async fn list(&self) -> Result<Vec<Distributor>, StoreError>;

    async fn upsert(&self, distributor: Distributor) -> Result<(), StoreError>;

    /// Write the given tiers; returns rows written.
    async fn update_tiers(
        &self,
        changes: &[TierChange],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// Portal entry point for a distributor.
pub fn portal_path(code: &str) -> String {
    format!("/portal/distributor/{code}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetRow {
    pub distributor: Distributor,
    pub modified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkTierUpdate {
    pub updated: usize,
    /// Selected codes that are not on the sheet.
    pub unknown: Vec<String>,
}

/// Editing session over a loaded set of distributors. Edits stay local until `save`,
/// which writes only the rows touched since the last save.
#[derive(Debug, Clone, Default)]
pub struct DistributorTierSheet {
    rows: Vec<SheetRow>,
}

impl DistributorTierSheet {
    pub fn new(distributors: Vec<Distributor>) -> Self {
        Self {
            rows: distributors
                .into_iter()
                .map(|distributor| SheetRow {
                    distributor,
                    modified: false,
                })
                .collect(),
        }
    }

    pub async fn load(store: &dyn DistributorStore) -> Result<Self, StoreError> {
        Ok(Self::new(store.list().await?))
    }

    pub fn bulk_set_tier(&mut self, codes: &[String], tier: &str) -> BulkTierUpdate {
        let selected: HashSet<&str> = codes.iter().map(String::as_str).collect();
        let mut result = BulkTierUpdate::default();

        for row in self
            .rows
            .iter_mut()
            .filter(|r| selected.contains(r.distributor.code.as_str()))
        {
            row.distributor.pricing_tier = tier.to_string();
            row.modified = true;
            result.updated += 1;
        }

        let mut unknown: Vec<String> = selected
            .into_iter()
            .filter(|code| !self.rows.iter().any(|r| r.distributor.code == *code))
            .map(str::to_string)
            .collect();
        unknown.sort();
        result.unknown = unknown;
        result
    }

    pub fn modified_rows(&self) -> Vec<&Distributor> {
        self.rows
            .iter()
            .filter(|r| r.modified)
            .map(|r| &r.distributor)
            .collect()
    }

    pub async fn save(
        &mut self,
        store: &dyn DistributorStore,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let changes: Vec<TierChange> = self
            .modified_rows()
            .into_iter()
            .map(|d| TierChange {
                code: d.code.clone(),
                pricing_tier: d.pricing_tier.clone(),
            })
            .collect();

        if changes.is_empty() {
            return Ok(0);
        }

        let written = store.update_tiers(&changes, now).await?;
        for row in self.rows.iter_mut().filter(|r| r.modified) {
            row.modified = false;
            row.distributor.updated_at = now;
        }

        tracing::info!(written, "distributor tiers saved");
        Ok(written)
    }
}
