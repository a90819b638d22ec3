//! Message channels connecting the pipeline stages
//!
//! Delivery is at-least-once: a received message stays hidden for the
//! queue's visibility window and becomes deliverable again unless it is
//! deleted with the receipt handle of that delivery.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::types::PipelineMessage;

pub use memory::InMemoryQueue;

/// Longest long-poll wait a receive honours
pub const MAX_WAIT: Duration = Duration::from_secs(20);

/// Longest time a received message stays hidden
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// One delivery of a queued message
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Stable across redeliveries
    pub message_id: String,
    /// Unique to this delivery; required to delete the message
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    /// 1 on first delivery
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
}

/// Trait for a managed message channel
///
/// Implementations:
/// - `InMemoryQueue`: process-local queue with visibility timeouts
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue a body, returning its message id
    async fn send(&self, body: String, attributes: HashMap<String, String>) -> Result<String>;

    /// Receive up to `max_messages`, waiting up to `wait` when none are visible.
    ///
    /// `wait` is capped at [`MAX_WAIT`]. An empty batch after the wait is a
    /// normal outcome.
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledge a delivery
    async fn delete(&self, receipt_handle: &str) -> Result<()>;

    /// Queue name for logging
    fn name(&self) -> &str;
}

/// Serialize and enqueue a pipeline message
pub async fn send_message(queue: &dyn MessageQueue, message: &PipelineMessage) -> Result<String> {
    let body = serde_json::to_string(message)?;
    let mut attributes = HashMap::new();
    attributes.insert("type".to_string(), message.tag().to_string());
    attributes.insert("processingId".to_string(), message.processing_id().to_string());
    queue.send(body, attributes).await
}
