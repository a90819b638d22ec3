//! Pipeline coordinator
//!
//! Wires the three stage workers to their queues and stores, and exposes the
//! edge operations: registering jobs, submitting uploads and reading results.
//! Upload → parse queue → parser → extract queue → extractor → score queue → scorer.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::ingestion::FileKind;
use crate::processing::{
    BatchReport, ExtractorStage, ParserStage, ScorerStage, Stage, StageWorker,
};
use crate::providers::{InferenceProvider, LocalObjectStore, ObjectStore, OllamaInference};
use crate::queue::{send_message, InMemoryQueue, MessageQueue};
use crate::retry::RetryPolicy;
use crate::storage::{
    get_record, put_record, query_records, tables, DocumentStore, PipelineDb, StatusStore,
};
use crate::types::{
    pair_key, Contact, JobSpec, MatchScore, ParseRequest, PipelineMessage, ResumeRecord,
    ResumeState, StatusRecord,
};

/// External collaborators the pipeline is built from
#[derive(Clone)]
pub struct PipelineDeps {
    pub objects: Arc<dyn ObjectStore>,
    pub status: Arc<dyn StatusStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub inference: Arc<dyn InferenceProvider>,
    pub parse_queue: Arc<dyn MessageQueue>,
    pub extract_queue: Arc<dyn MessageQueue>,
    pub score_queue: Arc<dyn MessageQueue>,
}

/// Job specification as submitted by a client
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub requirements: Vec<String>,
}

/// A resume upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub job_id: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
    pub contact: Contact,
}

/// Identifiers of a newly started run
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub resume_id: String,
    pub processing_id: String,
}

/// Result of one pass over all three queues
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub parse: BatchReport,
    pub extract: BatchReport,
    pub score: BatchReport,
}

impl DrainReport {
    pub fn received(&self) -> usize {
        self.parse.received() + self.extract.received() + self.score.received()
    }
}

/// The resume screening pipeline
pub struct Pipeline {
    objects: Arc<dyn ObjectStore>,
    status: Arc<dyn StatusStore>,
    documents: Arc<dyn DocumentStore>,
    inference: Arc<dyn InferenceProvider>,
    parse_queue: Arc<dyn MessageQueue>,
    parser: Arc<StageWorker<ParserStage>>,
    extractor: Arc<StageWorker<ExtractorStage>>,
    scorer: Arc<StageWorker<ScorerStage>>,
}

impl Pipeline {
    /// Build the pipeline from explicit collaborators
    pub fn new(config: &PipelineConfig, deps: PipelineDeps) -> Result<Self> {
        config.validate()?;

        let retry = RetryPolicy::from_config(&config.retry);
        let batch_size = config.queues.batch_size;
        let wait = config.queues.wait();

        let parser = StageWorker::new(
            ParserStage::new(
                deps.objects.clone(),
                Duration::from_secs(config.parser.timeout_secs),
            ),
            deps.parse_queue.clone(),
            deps.status.clone(),
            deps.documents.clone(),
        )
        .with_output(deps.extract_queue.clone())
        .with_batch_size(batch_size)
        .with_wait(wait)
        .with_write_batch_size(config.parser.write_batch_size);

        let extractor = StageWorker::new(
            ExtractorStage::new(
                deps.documents.clone(),
                deps.inference.clone(),
                retry.clone(),
                config.extraction.max_input_chars,
            ),
            deps.extract_queue.clone(),
            deps.status.clone(),
            deps.documents.clone(),
        )
        .with_output(deps.score_queue.clone())
        .with_batch_size(batch_size)
        .with_wait(wait);

        let scorer = StageWorker::new(
            ScorerStage::new(deps.inference.clone(), retry),
            deps.score_queue.clone(),
            deps.status.clone(),
            deps.documents.clone(),
        )
        .with_batch_size(batch_size)
        .with_wait(wait);

        Ok(Self {
            objects: deps.objects,
            status: deps.status,
            documents: deps.documents,
            inference: deps.inference,
            parse_queue: deps.parse_queue,
            parser: Arc::new(parser),
            extractor: Arc::new(extractor),
            scorer: Arc::new(scorer),
        })
    }

    /// Single-process pipeline: filesystem objects, SQLite, in-memory queues, Ollama
    pub fn local(config: &PipelineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.data_dir)?;

        let db = Arc::new(PipelineDb::new(config.storage.database_path())?);
        let visibility = config.queues.visibility_timeout();

        tracing::info!(
            data_dir = %config.storage.data_dir.display(),
            model = %config.llm.model,
            "Building local pipeline"
        );

        let deps = PipelineDeps {
            objects: Arc::new(LocalObjectStore::new(config.storage.objects_dir())?),
            status: db.clone(),
            documents: db,
            inference: Arc::new(OllamaInference::new(&config.llm)?),
            parse_queue: Arc::new(InMemoryQueue::new("parse", visibility)),
            extract_queue: Arc::new(InMemoryQueue::new("extract", visibility)),
            score_queue: Arc::new(InMemoryQueue::new("score", visibility)),
        };

        Self::new(config, deps)
    }

    /// Register a job specification
    pub async fn create_job(&self, job: NewJob) -> Result<JobSpec> {
        let title = job.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("job title is required".into()));
        }
        let requirements: Vec<String> = job
            .requirements
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if requirements.is_empty() {
            return Err(Error::InvalidInput("at least one requirement is required".into()));
        }

        let id = job.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut spec = JobSpec::new(id, title, requirements);
        spec.description = job.description;

        put_record(self.documents.as_ref(), tables::JOBS, &spec.id, &spec).await?;
        tracing::info!(job_id = %spec.id, "Created job");
        Ok(spec)
    }

    pub async fn job(&self, job_id: &str) -> Result<JobSpec> {
        get_record(self.documents.as_ref(), tables::JOBS, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// Store an upload and start its first run
    pub async fn submit(&self, upload: Upload) -> Result<Submission> {
        self.job(&upload.job_id).await?;

        // Keep only the final path component of client-supplied names
        let file_name = Path::new(&upload.file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("invalid file name '{}'", upload.file_name)))?
            .to_string();
        FileKind::from_file_name(&file_name)?;

        let resume_id = Uuid::new_v4().to_string();
        let object_key = format!("resumes/{}/{}", resume_id, file_name);

        let content_type = upload
            .content_type
            .clone()
            .unwrap_or_else(|| mime_guess::from_path(&file_name).first_or_octet_stream().to_string());
        let mut metadata = HashMap::new();
        metadata.insert("resumeId".to_string(), resume_id.clone());
        metadata.insert("jobId".to_string(), upload.job_id.clone());
        self.objects
            .put_object(&object_key, &upload.data, Some(&content_type), metadata)
            .await?;

        let resume = ResumeRecord {
            id: resume_id,
            job_id: upload.job_id,
            file_name,
            object_key,
            contact: upload.contact,
            status: ResumeState::Uploaded,
            latest_processing_id: None,
            last_score: None,
            scored_processing_id: None,
            uploaded_at: Utc::now(),
        };

        tracing::info!(
            resume_id = %resume.id,
            job_id = %resume.job_id,
            bytes = upload.data.len(),
            "Stored upload"
        );
        self.start_run(resume).await
    }

    /// Run an existing resume through the pipeline again under a new processing id
    pub async fn reprocess(&self, resume_id: &str) -> Result<Submission> {
        let resume: ResumeRecord = get_record(self.documents.as_ref(), tables::RESUMES, resume_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("resume {}", resume_id)))?;
        self.start_run(resume).await
    }

    async fn start_run(&self, mut resume: ResumeRecord) -> Result<Submission> {
        let processing_id = Uuid::new_v4().to_string();

        resume.latest_processing_id = Some(processing_id.clone());
        put_record(self.documents.as_ref(), tables::RESUMES, &resume.id, &resume).await?;

        self.status
            .create(StatusRecord::pending(&processing_id, &resume.id, &resume.job_id))
            .await?;

        let message = PipelineMessage::Parse(ParseRequest {
            processing_id: processing_id.clone(),
            resume_id: resume.id.clone(),
            job_id: resume.job_id.clone(),
            object_key: resume.object_key,
            file_name: resume.file_name,
            contact: resume.contact,
            enqueued_at: Utc::now(),
        });
        send_message(self.parse_queue.as_ref(), &message).await?;

        tracing::info!(resume_id = %resume.id, processing_id = %processing_id, "Enqueued for parsing");
        Ok(Submission {
            resume_id: resume.id,
            processing_id,
        })
    }

    pub async fn status(&self, processing_id: &str) -> Result<StatusRecord> {
        self.status
            .get(processing_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("processing run {}", processing_id)))
    }

    pub async fn resume(&self, resume_id: &str) -> Result<ResumeRecord> {
        get_record(self.documents.as_ref(), tables::RESUMES, resume_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("resume {}", resume_id)))
    }

    pub async fn score(&self, resume_id: &str, job_id: &str) -> Result<MatchScore> {
        get_record(
            self.documents.as_ref(),
            tables::MATCH_SCORES,
            &pair_key(resume_id, job_id),
        )
        .await?
        .ok_or_else(|| Error::NotFound(format!("score for resume {} and job {}", resume_id, job_id)))
    }

    /// All scores for a job, best first
    pub async fn scores_for_job(&self, job_id: &str) -> Result<Vec<MatchScore>> {
        let mut scores: Vec<MatchScore> =
            query_records(self.documents.as_ref(), tables::MATCH_SCORES, "jobId", job_id).await?;
        scores.sort_by(|a, b| {
            b.overall_score
                .cmp(&a.overall_score)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });
        Ok(scores)
    }

    /// Poll each stage once, in pipeline order, without waiting
    pub async fn drain_once(&self) -> Result<DrainReport> {
        Ok(DrainReport {
            parse: self.parser.poll_once().await?,
            extract: self.extractor.poll_once().await?,
            score: self.scorer.poll_once().await?,
        })
    }

    /// Whether the inference service answers
    pub async fn inference_healthy(&self) -> bool {
        match self.inference.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::warn!(provider = self.inference.name(), "Health check failed: {}", e);
                false
            }
        }
    }

    /// Spawn the three worker loops; they stop when `shutdown` turns true
    pub fn run(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            spawn_worker(self.parser.clone(), shutdown.clone()),
            spawn_worker(self.extractor.clone(), shutdown.clone()),
            spawn_worker(self.scorer.clone(), shutdown),
        ]
    }
}

fn spawn_worker<S>(worker: Arc<StageWorker<S>>, shutdown: watch::Receiver<bool>) -> JoinHandle<()>
where
    S: Stage + 'static,
{
    tokio::spawn(async move { worker.run(shutdown).await })
}
