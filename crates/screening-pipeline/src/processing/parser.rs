//! Parser stage: raw upload to normalized text

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::ingestion::TextExtractor;
use crate::providers::ObjectStore;
use crate::storage::tables;
use crate::types::{
    ExtractRequest, ParseRequest, ParsedResume, PipelineMessage, ProcessingStatus, StatusUpdate,
};

use super::{RecordWrite, Stage, StageOutput};

/// Fetches the raw file, extracts its text and hands it to the extractor.
///
/// Sets `PARSING` on entry and `EXTRACTING_SKILLS` on exit, meaning the run is
/// ready for the next stage.
pub struct ParserStage {
    objects: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl ParserStage {
    pub fn new(objects: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { objects, timeout }
    }
}

#[async_trait]
impl Stage for ParserStage {
    type Input = ParseRequest;
    const NAME: &'static str = "parser";
    const TAG: &'static str = PipelineMessage::PARSE;

    fn accept(message: PipelineMessage) -> std::result::Result<ParseRequest, PipelineMessage> {
        match message {
            PipelineMessage::Parse(request) => Ok(request),
            other => Err(other),
        }
    }

    fn processing_id(input: &ParseRequest) -> &str {
        &input.processing_id
    }

    fn entry_status() -> ProcessingStatus {
        ProcessingStatus::Parsing
    }

    async fn process(&self, request: ParseRequest) -> Result<StageOutput> {
        let object = self.objects.get_object(&request.object_key).await?;
        let size = object.data.len();

        let extracted =
            TextExtractor::extract_with_timeout(&request.file_name, object.data, self.timeout)
                .await?;
        let char_count = extracted.text.chars().count();

        tracing::info!(
            file = %request.file_name,
            bytes = size,
            chars = char_count,
            "Parsed resume"
        );

        let parsed = ParsedResume {
            resume_id: request.resume_id.clone(),
            job_id: request.job_id.clone(),
            processing_id: request.processing_id.clone(),
            file_name: request.file_name.clone(),
            text: extracted.text.clone(),
            content_hash: extracted.content_hash.clone(),
            char_count,
            parsed_at: Utc::now(),
        };

        let status = StatusUpdate::to(ProcessingStatus::ExtractingSkills)
            .with_field("contentHash", extracted.content_hash)
            .with_field("charCount", char_count);

        Ok(StageOutput::new(status)
            .with_record(RecordWrite::new(
                tables::PARSED_RESUMES,
                &request.resume_id,
                &parsed,
            )?)
            .forward(PipelineMessage::Extract(ExtractRequest {
                processing_id: request.processing_id,
                resume_id: request.resume_id,
                job_id: request.job_id,
                text: extracted.text,
                contact: request.contact,
                enqueued_at: Utc::now(),
            })))
    }
}
