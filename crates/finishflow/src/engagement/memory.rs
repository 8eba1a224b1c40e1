use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{EngagementEvent, EngagementQuery, EngagementStore, NewEngagementEvent};
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemoryEngagementStore {
    events: Mutex<Vec<EngagementEvent>>,
}

impl MemoryEngagementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EngagementEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every event in insertion order.
    pub fn all(&self) -> Vec<EngagementEvent> {
        self.lock().clone()
    }
}

#[async_trait]
impl EngagementStore for MemoryEngagementStore {
    async fn append(&self, event: NewEngagementEvent) -> Result<EngagementEvent, StoreError> {
        let event = event.into_event();
        self.lock().push(event.clone());
        Ok(event)
    }

    async fn list(&self, query: &EngagementQuery) -> Result<Vec<EngagementEvent>, StoreError> {
        let mut rows: Vec<EngagementEvent> = self
            .lock()
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        rows.truncate(query.clamped_limit() as usize);
        Ok(rows)
    }
}
