//! Core types for the screening pipeline

pub mod message;
pub mod records;
pub mod status;

pub use message::{decode, Decoded, ExtractRequest, ParseRequest, PipelineMessage, ScoreRequest};
pub use records::{
    pair_key, Contact, ExtractedSkills, JobSpec, MatchScore, ParsedResume, ResumeRecord,
    ResumeState, ScoreAssessment,
};
pub use status::{ProcessingStatus, StatusRecord, StatusUpdate};
