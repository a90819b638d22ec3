//! Generic batch worker shared by all stages

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::queue::{send_message, MessageQueue, ReceivedMessage};
use crate::storage::{DocumentStore, StatusStore, MAX_BATCH_WRITE};
use crate::types::{decode, Decoded, StatusUpdate};

use super::{RecordWrite, Stage};

/// Pause after a failed poll before trying again
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome of one stage invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    /// Messages for another stage; acknowledged without processing
    pub skipped: usize,
    /// Left unacknowledged so the queue redelivers them
    pub failed_message_ids: Vec<String>,
}

impl BatchReport {
    pub fn received(&self) -> usize {
        self.processed + self.failed + self.skipped
    }

    fn record_failure(&mut self, message_id: &str) {
        self.failed += 1;
        self.failed_message_ids.push(message_id.to_string());
    }
}

/// Record writes grouped per table, flushed in store-sized batches
struct WriteBuffer {
    limit: usize,
    pending: HashMap<&'static str, Vec<(String, Value)>>,
}

impl WriteBuffer {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.clamp(1, MAX_BATCH_WRITE),
            pending: HashMap::new(),
        }
    }

    async fn push(&mut self, write: RecordWrite, store: &dyn DocumentStore) -> Result<()> {
        let items = self.pending.entry(write.table).or_default();
        items.push((write.id, write.item));
        if items.len() >= self.limit {
            let batch = std::mem::take(items);
            store.batch_write(write.table, batch).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, store: &dyn DocumentStore) -> Result<()> {
        for (table, items) in self.pending.drain() {
            if !items.is_empty() {
                store.batch_write(table, items).await?;
            }
        }
        Ok(())
    }
}

/// Consumes one queue with one stage
pub struct StageWorker<S: Stage> {
    stage: S,
    input: Arc<dyn MessageQueue>,
    output: Option<Arc<dyn MessageQueue>>,
    status: Arc<dyn StatusStore>,
    documents: Arc<dyn DocumentStore>,
    batch_size: usize,
    wait: Duration,
    write_batch_size: usize,
}

impl<S: Stage> StageWorker<S> {
    /// Create a worker with default batch settings and no output queue
    pub fn new(
        stage: S,
        input: Arc<dyn MessageQueue>,
        status: Arc<dyn StatusStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            stage,
            input,
            output: None,
            status,
            documents,
            batch_size: 10,
            wait: Duration::from_secs(20),
            write_batch_size: MAX_BATCH_WRITE,
        }
    }

    /// Queue that forwarded messages are sent to
    pub fn with_output(mut self, output: Arc<dyn MessageQueue>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Long-poll wait used by [`StageWorker::run`]
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_write_batch_size(mut self, write_batch_size: usize) -> Self {
        self.write_batch_size = write_batch_size;
        self
    }

    /// Process a delivered batch, one message at a time.
    ///
    /// Item failures are marked `FAILED` and reported; they never abort the
    /// batch. A systemic error is returned as `Err` and nothing is acknowledged.
    pub async fn process_batch(&self, messages: &[ReceivedMessage]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut buffer = WriteBuffer::new(self.write_batch_size);

        for received in messages {
            let message = match decode(&received.body) {
                Decoded::Message(message) => message,
                Decoded::Unknown { tag } => {
                    tracing::debug!(
                        stage = S::NAME,
                        message_id = %received.message_id,
                        tag = %tag,
                        "Skipping message with unknown type"
                    );
                    report.skipped += 1;
                    continue;
                }
                Decoded::Invalid { tag: Some(tag), .. } if tag != S::TAG => {
                    tracing::debug!(
                        stage = S::NAME,
                        message_id = %received.message_id,
                        tag = %tag,
                        "Skipping undecodable message for another stage"
                    );
                    report.skipped += 1;
                    continue;
                }
                Decoded::Invalid {
                    processing_id,
                    error,
                    ..
                } => {
                    tracing::warn!(
                        stage = S::NAME,
                        message_id = %received.message_id,
                        processing_id = ?processing_id,
                        "Undecodable message: {}",
                        error
                    );
                    if let Some(id) = processing_id {
                        self.mark_failed(&id, &error).await?;
                    }
                    report.record_failure(&received.message_id);
                    continue;
                }
            };

            let input = match S::accept(message) {
                Ok(input) => input,
                Err(other) => {
                    tracing::debug!(
                        stage = S::NAME,
                        message_id = %received.message_id,
                        tag = other.tag(),
                        "Skipping message for another stage"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            let processing_id = S::processing_id(&input).to_string();
            let span = tracing::info_span!(
                "stage",
                stage = S::NAME,
                processing_id = %processing_id,
                message_id = %received.message_id,
                receive_count = received.receive_count,
            );

            let outcome = self
                .handle(&processing_id, input, &mut buffer)
                .instrument(span)
                .await;

            match outcome {
                Ok(()) => report.processed += 1,
                Err(e) if e.is_systemic() => {
                    tracing::error!(
                        stage = S::NAME,
                        processing_id = %processing_id,
                        "Aborting batch on infrastructure error: {}",
                        e
                    );
                    // Earlier items already forwarded; keep their records with them
                    if let Err(flush_error) = buffer.flush(self.documents.as_ref()).await {
                        tracing::error!(
                            stage = S::NAME,
                            "Failed to flush records of aborted batch: {}",
                            flush_error
                        );
                    }
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        stage = S::NAME,
                        processing_id = %processing_id,
                        message_id = %received.message_id,
                        "Item failed: {}",
                        e
                    );
                    self.mark_failed(&processing_id, &e.to_string()).await?;
                    report.record_failure(&received.message_id);
                }
            }
        }

        buffer.flush(self.documents.as_ref()).await?;
        Ok(report)
    }

    async fn handle(
        &self,
        processing_id: &str,
        input: S::Input,
        buffer: &mut WriteBuffer,
    ) -> Result<()> {
        if !self
            .status
            .update(processing_id, StatusUpdate::to(S::entry_status()))
            .await?
        {
            // Stale or duplicate delivery; processed anyway, downstream tolerates duplicates
            tracing::debug!("Entry status not applied");
        }

        let output = self.stage.process(input).await?;

        for record in output.records {
            buffer.push(record, self.documents.as_ref()).await?;
        }
        for update in output.updates {
            self.documents
                .update_item(update.table, &update.id, update.fields)
                .await?;
        }
        if let Some(message) = output.forward {
            let queue = self.output.as_ref().ok_or_else(|| {
                Error::Config(format!("stage {} has no output queue", S::NAME))
            })?;
            let message_id = send_message(queue.as_ref(), &message).await?;
            tracing::debug!(
                queue = queue.name(),
                forwarded = %message_id,
                "Forwarded {}",
                message.tag()
            );
        }

        let target = output.status.status;
        self.status.update(processing_id, output.status).await?;
        tracing::info!(status = %target, "Stage finished");
        Ok(())
    }

    async fn mark_failed(&self, processing_id: &str, error: &str) -> Result<()> {
        self.status
            .update(processing_id, StatusUpdate::failed(error))
            .await?;
        Ok(())
    }

    /// Acknowledge every message in the batch except the reported failures
    async fn acknowledge(&self, messages: &[ReceivedMessage], report: &BatchReport) -> Result<()> {
        let failed: HashSet<&str> = report
            .failed_message_ids
            .iter()
            .map(String::as_str)
            .collect();

        for received in messages {
            if !failed.contains(received.message_id.as_str()) {
                self.input.delete(&received.receipt_handle).await?;
            }
        }
        Ok(())
    }

    /// Receive one batch (waiting up to `wait`), process it and acknowledge it
    pub async fn poll(&self, wait: Duration) -> Result<BatchReport> {
        let messages = self.input.receive_batch(self.batch_size, wait).await?;
        self.process_received(messages).await
    }

    /// [`StageWorker::poll`] without waiting for messages to arrive
    pub async fn poll_once(&self) -> Result<BatchReport> {
        self.poll(Duration::ZERO).await
    }

    async fn process_received(&self, messages: Vec<ReceivedMessage>) -> Result<BatchReport> {
        if messages.is_empty() {
            return Ok(BatchReport::default());
        }

        let report = self.process_batch(&messages).await?;
        self.acknowledge(&messages, &report).await?;

        tracing::info!(
            stage = S::NAME,
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            "Batch done"
        );
        Ok(report)
    }

    /// Poll until the shutdown flag turns true or its sender is dropped.
    ///
    /// Shutdown interrupts the long-poll wait only; a batch in progress finishes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(stage = S::NAME, queue = self.input.name(), "Stage worker started");

        while !*shutdown.borrow() {
            let received = tokio::select! {
                received = self.input.receive_batch(self.batch_size, self.wait) => received,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let outcome = match received {
                Ok(messages) => self.process_received(messages).await,
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                tracing::error!(stage = S::NAME, "Stage invocation failed: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(stage = S::NAME, "Stage worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::storage::{MemoryStatusStore, PipelineDb};
    use crate::types::{
        Contact, ExtractRequest, ParseRequest, PipelineMessage, ProcessingStatus, StatusRecord,
    };
    use crate::processing::StageOutput;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Accepts parse requests; file names starting with "bad" fail the item,
    /// "outage" raises a storage error.
    struct EchoStage;

    #[async_trait]
    impl Stage for EchoStage {
        type Input = ParseRequest;
        const NAME: &'static str = "echo";
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

        async fn process(&self, input: ParseRequest) -> Result<StageOutput> {
            if input.file_name.starts_with("bad") {
                return Err(Error::text_extraction(&input.file_name, "corrupt"));
            }
            if input.file_name.starts_with("outage") {
                return Err(Error::storage("bucket unreachable"));
            }
            let record = RecordWrite::new("parsed_resumes", &input.resume_id, &input.file_name)?;
            Ok(StageOutput::new(StatusUpdate::to(ProcessingStatus::ExtractingSkills))
                .with_record(record)
                .forward(PipelineMessage::Extract(ExtractRequest {
                    processing_id: input.processing_id,
                    resume_id: input.resume_id,
                    job_id: input.job_id,
                    text: input.file_name,
                    contact: input.contact,
                    enqueued_at: Utc::now(),
                })))
        }
    }

    struct Harness {
        input: Arc<InMemoryQueue>,
        output: Arc<InMemoryQueue>,
        status: Arc<MemoryStatusStore>,
        documents: Arc<PipelineDb>,
        worker: StageWorker<EchoStage>,
    }

    fn harness() -> Harness {
        let input = Arc::new(InMemoryQueue::new("in", Duration::from_secs(60)));
        let output = Arc::new(InMemoryQueue::new("out", Duration::from_secs(60)));
        let status = Arc::new(MemoryStatusStore::new());
        let documents = Arc::new(PipelineDb::in_memory().unwrap());
        let worker = StageWorker::new(
            EchoStage,
            input.clone(),
            status.clone(),
            documents.clone(),
        )
        .with_output(output.clone())
        .with_batch_size(10)
        .with_write_batch_size(2);

        Harness {
            input,
            output,
            status,
            documents,
            worker,
        }
    }

    fn parse_message(n: usize, file_name: &str) -> PipelineMessage {
        PipelineMessage::Parse(ParseRequest {
            processing_id: format!("p{}", n),
            resume_id: format!("r{}", n),
            job_id: "j1".into(),
            object_key: format!("resumes/r{}/{}", n, file_name),
            file_name: file_name.into(),
            contact: Contact::default(),
            enqueued_at: Utc::now(),
        })
    }

    async fn enqueue(h: &Harness, n: usize, file_name: &str) {
        h.status
            .create(StatusRecord::pending(format!("p{}", n), format!("r{}", n), "j1"))
            .await
            .unwrap();
        send_message(h.input.as_ref(), &parse_message(n, file_name))
            .await
            .unwrap();
    }

    async fn status_of(h: &Harness, id: &str) -> ProcessingStatus {
        h.status.get(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let h = harness();
        let report = h.worker.poll_once().await.unwrap();
        assert_eq!(report, BatchReport::default());
    }

    #[tokio::test]
    async fn test_partial_failure_reports_exactly_failed_items() {
        let h = harness();
        for n in 0..5 {
            let name = if n == 1 || n == 3 { "bad.pdf" } else { "cv.txt" };
            enqueue(&h, n, name).await;
        }

        let report = h.worker.poll_once().await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.failed_message_ids.len(), 2);

        for n in [0, 2, 4] {
            assert_eq!(status_of(&h, &format!("p{}", n)).await, ProcessingStatus::ExtractingSkills);
        }
        for n in [1, 3] {
            let record = h.status.get(&format!("p{}", n)).await.unwrap().unwrap();
            assert_eq!(record.status, ProcessingStatus::Failed);
            assert!(record.error.unwrap().contains("corrupt"));
        }

        // only successes are forwarded; failures stay on the input queue
        assert_eq!(h.output.visible_len(), 3);
        assert_eq!(h.input.in_flight_len(), 2);

        // records were flushed, including the partial last batch
        for n in [0, 2, 4] {
            assert!(h
                .documents
                .get_item("parsed_resumes", &format!("r{}", n))
                .await
                .unwrap()
                .is_some());
        }
    }

    #[tokio::test]
    async fn test_mismatched_message_is_skipped_without_status_write() {
        let h = harness();
        let foreign = PipelineMessage::Extract(ExtractRequest {
            processing_id: "p9".into(),
            resume_id: "r9".into(),
            job_id: "j1".into(),
            text: "Skills: Go".into(),
            contact: Contact::default(),
            enqueued_at: Utc::now(),
        });
        send_message(h.input.as_ref(), &foreign).await.unwrap();
        h.input
            .send(r#"{"type":"RESIZE_IMAGE","processingId":"p8"}"#.into(), HashMap::new())
            .await
            .unwrap();

        let report = h.worker.poll_once().await.unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.processed, 0);
        assert_eq!(report.failed, 0);
        assert!(h.status.get("p9").await.unwrap().is_none());
        assert!(h.status.get("p8").await.unwrap().is_none());

        // skipped messages are acknowledged like any other
        assert_eq!(h.input.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_broken_payload_for_another_stage_is_skipped() {
        let h = harness();
        h.status
            .create(StatusRecord::pending("p5", "r5", "j1"))
            .await
            .unwrap();
        h.input
            .send(
                r#"{"type":"EXTRACT_SKILLS","processingId":"p5","resumeId":7}"#.into(),
                HashMap::new(),
            )
            .await
            .unwrap();

        let report = h.worker.poll_once().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.processed, 0);

        // the run belongs to the extractor; this stage must not touch it
        let record = h.status.get("p5").await.unwrap().unwrap();
        assert_eq!(record.status, ProcessingStatus::Pending);
        assert!(record.error.is_none());
        assert_eq!(h.input.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_message_fails_its_run() {
        let h = harness();
        h.input
            .send(
                r#"{"type":"PARSE_RESUME","processingId":"p7","resumeId":false}"#.into(),
                HashMap::new(),
            )
            .await
            .unwrap();
        h.input.send("{{{".into(), HashMap::new()).await.unwrap();

        let report = h.worker.poll_once().await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(status_of(&h, "p7").await, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_tolerated() {
        let h = harness();
        enqueue(&h, 1, "cv.txt").await;
        send_message(h.input.as_ref(), &parse_message(1, "cv.txt"))
            .await
            .unwrap();

        let report = h.worker.poll_once().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(h.output.visible_len(), 2);
        assert_eq!(status_of(&h, "p1").await, ProcessingStatus::ExtractingSkills);
        assert_eq!(
            h.documents.get_item("parsed_resumes", "r1").await.unwrap().unwrap(),
            Value::String("cv.txt".into())
        );
    }

    #[tokio::test]
    async fn test_systemic_error_aborts_without_acknowledging() {
        let h = harness();
        enqueue(&h, 1, "cv.txt").await;
        enqueue(&h, 2, "outage.txt").await;
        enqueue(&h, 3, "cv.txt").await;

        let err = h.worker.poll_once().await.unwrap_err();
        assert!(err.is_systemic());

        // nothing deleted: the whole batch will be redelivered
        assert_eq!(h.input.in_flight_len(), 3);
        assert_ne!(status_of(&h, "p2").await, ProcessingStatus::Failed);
        assert_eq!(status_of(&h, "p3").await, ProcessingStatus::Pending);

        // p1 was forwarded before the abort, so its buffered record is written too
        assert_eq!(h.output.visible_len(), 1);
        assert_eq!(status_of(&h, "p1").await, ProcessingStatus::ExtractingSkills);
        assert!(h
            .documents
            .get_item("parsed_resumes", "r1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness();
        let worker = Arc::new(h.worker);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(rx).await }
        });

        send_message(h.input.as_ref(), &parse_message(1, "cv.txt"))
            .await
            .unwrap();
        for _ in 0..100 {
            if h.output.visible_len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.output.visible_len(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
