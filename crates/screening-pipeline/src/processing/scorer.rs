//! Scorer stage: extracted skills against a job, to a match score

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::prompts::{parse_json_object, scoring_prompt};
use crate::providers::InferenceProvider;
use crate::retry::RetryPolicy;
use crate::storage::tables;
use crate::types::{
    pair_key, MatchScore, PipelineMessage, ProcessingStatus, ResumeState, ScoreAssessment,
    ScoreRequest, StatusUpdate,
};

use super::{FieldUpdate, RecordWrite, Stage, StageOutput};

/// Scores a candidate and finishes the run.
///
/// An unparsable score reply degrades to [`ScoreAssessment::fallback`]
/// instead of failing the item.
pub struct ScorerStage {
    inference: Arc<dyn InferenceProvider>,
    retry: RetryPolicy,
}

impl ScorerStage {
    pub fn new(inference: Arc<dyn InferenceProvider>, retry: RetryPolicy) -> Self {
        Self { inference, retry }
    }
}

fn parse_assessment(reply: &str) -> Result<ScoreAssessment> {
    let map = parse_json_object(reply)?;
    serde_json::from_value(Value::Object(map))
        .map_err(|e| Error::malformed(format!("score reply has the wrong shape: {}", e)))
}

#[async_trait]
impl Stage for ScorerStage {
    type Input = ScoreRequest;
    const NAME: &'static str = "scorer";
    const TAG: &'static str = PipelineMessage::SCORE;

    fn accept(message: PipelineMessage) -> std::result::Result<ScoreRequest, PipelineMessage> {
        match message {
            PipelineMessage::Score(request) => Ok(request),
            other => Err(other),
        }
    }

    fn processing_id(input: &ScoreRequest) -> &str {
        &input.processing_id
    }

    fn entry_status() -> ProcessingStatus {
        ProcessingStatus::Scoring
    }

    async fn process(&self, request: ScoreRequest) -> Result<StageOutput> {
        let prompt = scoring_prompt(&request.skills, &request.job);
        let reply = self
            .retry
            .invoke(|| self.inference.invoke(&prompt))
            .await?;

        let (assessment, degraded) = match parse_assessment(&reply) {
            Ok(assessment) => (assessment, false),
            Err(e) => {
                tracing::warn!("Using fallback score: {}", e);
                (
                    ScoreAssessment::fallback(format!("Score could not be determined: {}", e)),
                    true,
                )
            }
        };

        let score = MatchScore::from_assessment(
            &request.resume_id,
            &request.job_id,
            &request.processing_id,
            assessment,
            degraded,
        );

        tracing::info!(
            score = score.overall_score,
            confidence = score.confidence,
            degraded,
            "Scored resume"
        );

        let mut resume_fields = Map::new();
        resume_fields.insert("status".into(), serde_json::to_value(ResumeState::Scored)?);
        resume_fields.insert("lastScore".into(), score.overall_score.into());
        resume_fields.insert(
            "scoredProcessingId".into(),
            request.processing_id.clone().into(),
        );

        let status = StatusUpdate::to(ProcessingStatus::Completed)
            .with_field("overallScore", score.overall_score)
            .with_field("degraded", degraded);

        Ok(StageOutput::new(status)
            .with_record(RecordWrite::new(
                tables::MATCH_SCORES,
                pair_key(&request.resume_id, &request.job_id),
                &score,
            )?)
            .with_update(FieldUpdate {
                table: tables::RESUMES,
                id: request.resume_id,
                fields: resume_fields,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobSpec;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    struct FixedReply(&'static str);

    #[async_trait]
    impl InferenceProvider for FixedReply {
        async fn invoke(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "fixed"
        }

        fn model(&self) -> &str {
            "fixed"
        }
    }

    fn request() -> ScoreRequest {
        let mut skills = Map::new();
        skills.insert("programmingLanguages".into(), json!(["Go"]));
        ScoreRequest {
            processing_id: "p1".into(),
            resume_id: "r1".into(),
            job_id: "J1".into(),
            skills,
            job: JobSpec::new("J1", "Backend Engineer", vec!["Go".into(), "SQL".into()]),
            enqueued_at: Utc::now(),
        }
    }

    fn stage(reply: &'static str) -> ScorerStage {
        ScorerStage::new(
            Arc::new(FixedReply(reply)),
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_valid_score() {
        let reply = r#"{"overallScore": 64, "confidence": 0.8, "matchedSkills": ["Go"], "missingSkills": ["SQL"], "reasoning": "half"}"#;
        let output = stage(reply).process(request()).await.unwrap();

        assert_eq!(output.status.status, ProcessingStatus::Completed);
        let record = &output.records[0];
        assert_eq!(record.table, tables::MATCH_SCORES);
        assert_eq!(record.id, "r1#J1");
        assert_eq!(record.item["overallScore"], 64);
        assert_eq!(record.item["missingSkills"][0], "SQL");
        assert_eq!(record.item["degraded"], false);

        assert_eq!(output.updates[0].table, tables::RESUMES);
        assert_eq!(output.updates[0].fields["status"], "SCORED");
        assert!(output.forward.is_none());
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back() {
        let output = stage("The candidate looks decent.")
            .process(request())
            .await
            .unwrap();

        let record = &output.records[0];
        assert_eq!(record.item["overallScore"], 50);
        assert_eq!(record.item["confidence"], 0.3);
        assert_eq!(record.item["degraded"], true);
        assert_eq!(output.status.status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn test_wrong_shape_falls_back() {
        let output = stage(r#"{"score": "high"}"#).process(request()).await.unwrap();
        assert_eq!(output.records[0].item["overallScore"], 50);
    }
}
