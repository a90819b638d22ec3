//! screening-pipeline: queue-driven resume screening
//!
//! Uploaded resumes move through three stages connected by at-least-once
//! queues: the parser extracts text, the extractor asks an inference service
//! for structured skills, and the scorer rates those skills against a job.
//! Every stage records its progress in a shared, forward-only status record.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod pipeline;
pub mod processing;
pub mod prompts;
pub mod providers;
pub mod queue;
pub mod retry;
pub mod server;
pub mod storage;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::{NewJob, Pipeline, PipelineDeps, Submission, Upload};
pub use retry::RetryPolicy;
pub use types::{
    JobSpec, MatchScore, PipelineMessage, ProcessingStatus, ScoreAssessment, StatusRecord,
};
