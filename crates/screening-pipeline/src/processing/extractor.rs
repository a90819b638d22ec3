//! Extractor stage: resume text to structured skills

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::prompts::{extraction_prompt, parse_json_object, truncate_chars};
use crate::providers::InferenceProvider;
use crate::retry::RetryPolicy;
use crate::storage::{get_record, tables, DocumentStore};
use crate::types::{
    pair_key, ExtractRequest, ExtractedSkills, JobSpec, PipelineMessage, ProcessingStatus,
    ScoreRequest, StatusUpdate,
};

use super::{RecordWrite, Stage, StageOutput};

/// Asks the inference service for the candidate's skills.
///
/// An unparsable reply fails the item; it is not retried.
pub struct ExtractorStage {
    documents: Arc<dyn DocumentStore>,
    inference: Arc<dyn InferenceProvider>,
    retry: RetryPolicy,
    max_input_chars: usize,
}

impl ExtractorStage {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        inference: Arc<dyn InferenceProvider>,
        retry: RetryPolicy,
        max_input_chars: usize,
    ) -> Self {
        Self {
            documents,
            inference,
            retry,
            max_input_chars,
        }
    }

    async fn load_job(&self, job_id: &str) -> Result<JobSpec> {
        get_record(self.documents.as_ref(), tables::JOBS, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }
}

#[async_trait]
impl Stage for ExtractorStage {
    type Input = ExtractRequest;
    const NAME: &'static str = "extractor";
    const TAG: &'static str = PipelineMessage::EXTRACT;

    fn accept(message: PipelineMessage) -> std::result::Result<ExtractRequest, PipelineMessage> {
        match message {
            PipelineMessage::Extract(request) => Ok(request),
            other => Err(other),
        }
    }

    fn processing_id(input: &ExtractRequest) -> &str {
        &input.processing_id
    }

    fn entry_status() -> ProcessingStatus {
        ProcessingStatus::ExtractingSkills
    }

    async fn process(&self, request: ExtractRequest) -> Result<StageOutput> {
        let job = self.load_job(&request.job_id).await?;

        let text = truncate_chars(&request.text, self.max_input_chars);
        if text.len() < request.text.len() {
            tracing::debug!(limit = self.max_input_chars, "Truncated resume text");
        }
        let prompt = extraction_prompt(text, &job);

        let reply = self
            .retry
            .invoke(|| self.inference.invoke(&prompt))
            .await?;
        let skills = parse_json_object(&reply)?;

        tracing::info!(
            model = self.inference.model(),
            categories = skills.len(),
            "Extracted skills"
        );

        let extracted = ExtractedSkills {
            resume_id: request.resume_id.clone(),
            job_id: request.job_id.clone(),
            processing_id: request.processing_id.clone(),
            skills: skills.clone(),
            model: self.inference.model().to_string(),
            extracted_at: Utc::now(),
        };

        let status = StatusUpdate::to(ProcessingStatus::SkillsExtracted)
            .with_field("model", self.inference.model());

        Ok(StageOutput::new(status)
            .with_record(RecordWrite::new(
                tables::EXTRACTED_SKILLS,
                pair_key(&request.resume_id, &request.job_id),
                &extracted,
            )?)
            .forward(PipelineMessage::Score(ScoreRequest {
                processing_id: request.processing_id,
                resume_id: request.resume_id,
                job_id: request.job_id,
                skills,
                job,
                enqueued_at: Utc::now(),
            })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{put_record, PipelineDb};
    use crate::types::Contact;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Replies from a script, one entry per call
    struct ScriptedInference {
        replies: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedInference {
        fn new(mut replies: Vec<Result<String>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InferenceProvider for ScriptedInference {
        async fn invoke(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            self.replies
                .lock()
                .pop()
                .unwrap_or_else(|| Err(Error::inference("script exhausted")))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    async fn stage_with(
        replies: Vec<Result<String>>,
        max_chars: usize,
    ) -> (ExtractorStage, Arc<ScriptedInference>) {
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        let job = JobSpec::new("J1", "Backend Engineer", vec!["Go".into(), "SQL".into()]);
        put_record(db.as_ref(), tables::JOBS, "J1", &job).await.unwrap();

        let inference = Arc::new(ScriptedInference::new(replies));
        let stage = ExtractorStage::new(
            db,
            inference.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            max_chars,
        );
        (stage, inference)
    }

    fn request(text: &str) -> ExtractRequest {
        ExtractRequest {
            processing_id: "p1".into(),
            resume_id: "r1".into(),
            job_id: "J1".into(),
            text: text.into(),
            contact: Contact::default(),
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_extracts_and_forwards_with_job() {
        let (stage, inference) =
            stage_with(vec![Ok(r#"{"programmingLanguages":["Go"]}"#.into())], 10_000).await;

        let output = stage.process(request("Skills: Go, SQL")).await.unwrap();
        assert_eq!(inference.prompts.lock().len(), 1);
        assert_eq!(output.status.status, ProcessingStatus::SkillsExtracted);
        assert_eq!(output.records[0].id, "r1#J1");

        match output.forward {
            Some(PipelineMessage::Score(next)) => {
                assert_eq!(next.skills["programmingLanguages"][0], "Go");
                assert_eq!(next.job.requirements, vec!["Go".to_string(), "SQL".to_string()]);
            }
            other => panic!("unexpected forward {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (stage, inference) = stage_with(
            vec![
                Err(Error::inference("throttled")),
                Ok("```json\n{\"tools\":[\"git\"]}\n```".into()),
            ],
            10_000,
        )
        .await;

        let output = stage.process(request("git")).await.unwrap();
        assert_eq!(inference.prompts.lock().len(), 2);
        assert_eq!(output.records[0].item["skills"]["tools"][0], "git");
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_without_retry() {
        let (stage, inference) = stage_with(
            vec![Ok("Sorry, I can't help".into()), Ok("{}".into())],
            10_000,
        )
        .await;

        let err = stage.process(request("Skills: Go")).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
        assert_eq!(inference.prompts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_input_is_truncated() {
        let (stage, inference) = stage_with(vec![Ok("{}".into())], 5).await;
        stage.process(request("Skills: Go, SQL")).await.unwrap();

        let prompt = inference.prompts.lock()[0].clone();
        assert!(prompt.contains("Skill\n"));
        assert!(!prompt.contains("Skills: Go"));
    }

    #[tokio::test]
    async fn test_unknown_job_fails_item() {
        let (stage, _) = stage_with(vec![Ok("{}".into())], 10_000).await;
        let mut req = request("Skills: Go");
        req.job_id = "J404".into();

        let err = stage.process(req).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!err.is_systemic());
    }
}
