use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Distributor, DistributorStore, TierChange};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<String, Distributor>,
    tier_writes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryDistributorStore {
    inner: Mutex<Inner>,
}

impl MemoryDistributorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Distributor>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for d in rows {
                inner.rows.insert(d.code.clone(), d);
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Codes passed to `update_tiers`, in write order.
    pub fn tier_writes(&self) -> Vec<String> {
        self.lock().tier_writes.clone()
    }
}

#[async_trait]
impl DistributorStore for MemoryDistributorStore {
    async fn list(&self) -> Result<Vec<Distributor>, StoreError> {
        Ok(self.lock().rows.values().cloned().collect())
    }

    async fn upsert(&self, distributor: Distributor) -> Result<(), StoreError> {
        self.lock()
            .rows
            .insert(distributor.code.clone(), distributor);
        Ok(())
    }

    async fn update_tiers(
        &self,
        changes: &[TierChange],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut written = 0;
        for change in changes {
            if let Some(row) = inner.rows.get_mut(&change.code) {
                row.pricing_tier = change.pricing_tier.clone();
                row.updated_at = now;
                written += 1;
                inner.tier_writes.push(change.code.clone());
            }
        }
        Ok(written)
    }
}
