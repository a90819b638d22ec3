//! Status and document storage
//!
//! Provides the status store stages write to, and the document store that
//! holds resumes, jobs, parsed text, extracted skills and scores.

mod database;
mod memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::{StatusRecord, StatusUpdate};

pub use database::PipelineDb;
pub use memory::MemoryStatusStore;

/// Item-count limit of a single `batch_write` call
pub const MAX_BATCH_WRITE: usize = 25;

/// Document store table names
pub mod tables {
    pub const JOBS: &str = "jobs";
    pub const RESUMES: &str = "resumes";
    pub const PARSED_RESUMES: &str = "parsed_resumes";
    pub const EXTRACTED_SKILLS: &str = "extracted_skills";
    pub const MATCH_SCORES: &str = "match_scores";
}

/// Trait for per-run status records
///
/// Implementations:
/// - `MemoryStatusStore`: concurrent map, per-key atomic updates
/// - `PipelineDb`: SQLite, updates serialized on the connection
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create (or replace) a record
    async fn create(&self, record: StatusRecord) -> Result<()>;

    /// Apply an update atomically.
    ///
    /// Returns false when the update would move the run backwards and was ignored.
    /// A missing record is created first.
    async fn update(&self, id: &str, update: StatusUpdate) -> Result<bool>;

    /// Read a record
    async fn get(&self, id: &str) -> Result<Option<StatusRecord>>;

    /// Get store name for logging
    fn name(&self) -> &str;
}

/// Trait for the JSON document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write an item, replacing any previous version
    async fn put_item(&self, table: &str, id: &str, item: Value) -> Result<()>;

    /// Read an item
    async fn get_item(&self, table: &str, id: &str) -> Result<Option<Value>>;

    /// Merge top-level fields into an item, creating it when missing
    async fn update_item(&self, table: &str, id: &str, fields: Map<String, Value>) -> Result<()>;

    /// Write up to [`MAX_BATCH_WRITE`] items in one call
    async fn batch_write(&self, table: &str, items: Vec<(String, Value)>) -> Result<()>;

    /// Items whose top-level `field` equals `value`
    async fn query_by_field(&self, table: &str, field: &str, value: &str) -> Result<Vec<Value>>;
}

/// Serialize and store a typed record
pub async fn put_record<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    table: &str,
    id: &str,
    record: &T,
) -> Result<()> {
    store.put_item(table, id, serde_json::to_value(record)?).await
}

/// Load and deserialize a typed record
pub async fn get_record<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    table: &str,
    id: &str,
) -> Result<Option<T>> {
    match store.get_item(table, id).await? {
        Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
            Error::storage(format!("Corrupt {} record '{}': {}", table, id, e))
        }),
        None => Ok(None),
    }
}

/// Typed secondary-index lookup
pub async fn query_records<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    table: &str,
    field: &str,
    value: &str,
) -> Result<Vec<T>> {
    store
        .query_by_field(table, field, value)
        .await?
        .into_iter()
        .map(|v| {
            serde_json::from_value(v)
                .map_err(|e| Error::storage(format!("Corrupt {} record: {}", table, e)))
        })
        .collect()
}
