//! Entities written to the document store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Target specification a resume is scored against
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Required skills, one entry per requirement
    pub requirements: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, title: impl Into<String>, requirements: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            requirements,
            created_at: Utc::now(),
        }
    }
}

/// Candidate contact details captured at upload
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Item-level state of an uploaded resume
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResumeState {
    Uploaded,
    Scored,
}

/// Uploaded resume (work item)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub id: String,
    pub job_id: String,
    pub file_name: String,
    /// Object store key of the raw upload
    pub object_key: String,
    #[serde(default)]
    pub contact: Contact,
    pub status: ResumeState,
    pub latest_processing_id: Option<String>,
    #[serde(default)]
    pub last_score: Option<u8>,
    /// Run that produced `last_score`
    #[serde(default)]
    pub scored_processing_id: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Text extracted from a resume by the parser stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResume {
    pub resume_id: String,
    pub job_id: String,
    pub processing_id: String,
    pub file_name: String,
    pub text: String,
    /// SHA-256 of `text`
    pub content_hash: String,
    pub char_count: usize,
    pub parsed_at: DateTime<Utc>,
}

/// Structured attributes returned by the extraction prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSkills {
    pub resume_id: String,
    pub job_id: String,
    pub processing_id: String,
    /// Exactly the object the inference service returned
    pub skills: Map<String, Value>,
    pub model: String,
    pub extracted_at: DateTime<Utc>,
}

/// Score payload the inference service is asked to produce
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreAssessment {
    #[serde(alias = "overall_score")]
    pub overall_score: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, alias = "matched_skills")]
    pub matched_skills: Vec<String>,
    #[serde(default, alias = "missing_skills")]
    pub missing_skills: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

fn default_confidence() -> f64 {
    0.5
}

impl ScoreAssessment {
    pub const FALLBACK_SCORE: u8 = 50;
    pub const FALLBACK_CONFIDENCE: f64 = 0.3;

    /// Low-confidence placeholder used when the score reply cannot be parsed
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            overall_score: f64::from(Self::FALLBACK_SCORE),
            confidence: Self::FALLBACK_CONFIDENCE,
            matched_skills: Vec::new(),
            missing_skills: Vec::new(),
            reasoning: reason.into(),
        }
    }
}

/// Final match score of a resume against a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchScore {
    pub resume_id: String,
    pub job_id: String,
    pub processing_id: String,
    /// 0-100
    pub overall_score: u8,
    /// 0.0-1.0
    pub confidence: f64,
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub reasoning: String,
    /// True when the fallback assessment was used
    pub degraded: bool,
    pub scored_at: DateTime<Utc>,
}

impl MatchScore {
    pub fn from_assessment(
        resume_id: impl Into<String>,
        job_id: impl Into<String>,
        processing_id: impl Into<String>,
        assessment: ScoreAssessment,
        degraded: bool,
    ) -> Self {
        Self {
            resume_id: resume_id.into(),
            job_id: job_id.into(),
            processing_id: processing_id.into(),
            overall_score: assessment.overall_score.round().clamp(0.0, 100.0) as u8,
            confidence: assessment.confidence.clamp(0.0, 1.0),
            matched_skills: assessment.matched_skills,
            missing_skills: assessment.missing_skills,
            reasoning: assessment.reasoning,
            degraded,
            scored_at: Utc::now(),
        }
    }
}

/// Document store key for records scoped to a resume and a job
pub fn pair_key(resume_id: &str, job_id: &str) -> String {
    format!("{}#{}", resume_id, job_id)
}
