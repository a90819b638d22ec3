//! Queue-driven stage processing
//!
//! A [`StageWorker`] owns the batch loop shared by every stage; the stage
//! itself only turns one accepted message into a [`StageOutput`].

mod extractor;
mod parser;
mod scorer;
mod worker;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::{PipelineMessage, ProcessingStatus, StatusUpdate};

pub use extractor::ExtractorStage;
pub use parser::ParserStage;
pub use scorer::ScorerStage;
pub use worker::{BatchReport, StageWorker};

/// One pipeline step
#[async_trait]
pub trait Stage: Send + Sync {
    /// Payload this stage consumes
    type Input: Send;

    /// Stage name for logging
    const NAME: &'static str;

    /// Envelope `type` this stage consumes; anything else is skipped
    const TAG: &'static str;

    /// Take the message if it belongs to this stage, otherwise hand it back
    fn accept(message: PipelineMessage) -> std::result::Result<Self::Input, PipelineMessage>;

    fn processing_id(input: &Self::Input) -> &str;

    /// Status written before `process` runs
    fn entry_status() -> ProcessingStatus;

    /// Handle one message. Errors fail the item unless they are systemic.
    async fn process(&self, input: Self::Input) -> Result<StageOutput>;
}

/// A full record write into the document store
#[derive(Debug, Clone)]
pub struct RecordWrite {
    pub table: &'static str,
    pub id: String,
    pub item: Value,
}

impl RecordWrite {
    pub fn new<T: Serialize>(table: &'static str, id: impl Into<String>, record: &T) -> Result<Self> {
        Ok(Self {
            table,
            id: id.into(),
            item: serde_json::to_value(record)?,
        })
    }
}

/// A field merge into an existing document
#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub table: &'static str,
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Side effects of one successfully processed message
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Buffered and written in batches
    pub records: Vec<RecordWrite>,
    /// Applied immediately, in order
    pub updates: Vec<FieldUpdate>,
    /// Message for the next stage's queue
    pub forward: Option<PipelineMessage>,
    /// Status written after everything else succeeded
    pub status: StatusUpdate,
}

impl StageOutput {
    pub fn new(status: StatusUpdate) -> Self {
        Self {
            records: Vec::new(),
            updates: Vec::new(),
            forward: None,
            status,
        }
    }

    pub fn with_record(mut self, record: RecordWrite) -> Self {
        self.records.push(record);
        self
    }

    pub fn with_update(mut self, update: FieldUpdate) -> Self {
        self.updates.push(update);
        self
    }

    pub fn forward(mut self, message: PipelineMessage) -> Self {
        self.forward = Some(message);
        self
    }
}
