//! In-memory status store

use async_trait::async_trait;
use dashmap::DashMap;

use super::StatusStore;
use crate::error::Result;
use crate::types::{StatusRecord, StatusUpdate};

/// Status store backed by a concurrent map
#[derive(Default)]
pub struct MemoryStatusStore {
    records: DashMap<String, StatusRecord>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn create(&self, record: StatusRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, id: &str, update: StatusUpdate) -> Result<bool> {
        // The entry guard holds the shard lock for the whole read-modify-write
        let mut entry = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| StatusRecord::empty(id));
        let target = update.status;
        let applied = entry.apply(update);
        if !applied {
            tracing::debug!(
                processing_id = %id,
                current = %entry.status,
                target = %target,
                "Ignoring status write that would move the run backwards"
            );
        }
        Ok(applied)
    }

    async fn get(&self, id: &str) -> Result<Option<StatusRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
