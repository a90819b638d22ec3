//! Process-local queue with visibility timeouts and long polling

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{MessageQueue, ReceivedMessage, MAX_VISIBILITY_TIMEOUT, MAX_WAIT};
use crate::error::Result;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    attributes: HashMap<String, String>,
    sent_at: DateTime<Utc>,
    receive_count: u32,
}

struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    /// Keyed by receipt handle
    in_flight: HashMap<String, InFlight>,
}

impl QueueState {
    /// Move expired deliveries back to the ready list
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                tracing::debug!(
                    message_id = %flight.message.id,
                    "Visibility timeout expired, message is deliverable again"
                );
                self.ready.push_back(flight.message);
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|f| f.visible_at).min()
    }
}

/// In-memory message queue
pub struct InMemoryQueue {
    name: String,
    visibility_timeout: Duration,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryQueue {
    /// Create a new queue; the visibility timeout is capped at [`MAX_VISIBILITY_TIMEOUT`]
    pub fn new(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            visibility_timeout: visibility_timeout.min(MAX_VISIBILITY_TIMEOUT),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Messages waiting to be delivered (including expired in-flight ones)
    pub fn visible_len(&self) -> usize {
        let mut state = self.state.lock();
        state.release_expired(Instant::now());
        state.ready.len()
    }

    /// Messages received but not yet deleted
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    fn take_visible(&self, max_messages: usize) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.release_expired(now);

        let count = max_messages.min(state.ready.len());
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(mut message) = state.ready.pop_front() else {
                break;
            };
            message.receive_count += 1;
            let receipt_handle = Uuid::new_v4().to_string();

            batch.push(ReceivedMessage {
                message_id: message.id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: message.body.clone(),
                attributes: message.attributes.clone(),
                receive_count: message.receive_count,
                sent_at: message.sent_at,
            });
            state.in_flight.insert(
                receipt_handle,
                InFlight {
                    message,
                    visible_at: now + self.visibility_timeout,
                },
            );
        }
        batch
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send(&self, body: String, attributes: HashMap<String, String>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.state.lock().ready.push_back(StoredMessage {
            id: id.clone(),
            body,
            attributes,
            sent_at: Utc::now(),
            receive_count: 0,
        });
        self.notify.notify_one();
        Ok(id)
    }

    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }
        let deadline = Instant::now() + wait.min(MAX_WAIT);

        loop {
            let batch = self.take_visible(max_messages);
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            // Wake on a new send, an in-flight expiry, or the end of the wait
            let wake_at = match self.state.lock().next_expiry() {
                Some(expiry) => expiry.min(deadline),
                None => deadline,
            };
            let _ = tokio::time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        if self.state.lock().in_flight.remove(receipt_handle).is_none() {
            // Receipt from an expired delivery; the message was handed out again
            tracing::debug!(queue = %self.name, "Ignoring delete with stale receipt handle");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(visibility_ms: u64) -> InMemoryQueue {
        InMemoryQueue::new("test", Duration::from_millis(visibility_ms))
    }

    #[tokio::test]
    async fn test_empty_receive_is_not_an_error() {
        let q = queue(1000);
        let batch = q.receive_batch(10, Duration::from_millis(20)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_received_message_is_hidden_until_deleted() {
        let q = queue(60_000);
        q.send("a".into(), HashMap::new()).await.unwrap();

        let batch = q.receive_batch(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].receive_count, 1);
        assert_eq!(q.visible_len(), 0);
        assert_eq!(q.in_flight_len(), 1);

        q.delete(&batch[0].receipt_handle).await.unwrap();
        assert_eq!(q.in_flight_len(), 0);
        assert!(q.receive_batch(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undeleted_message_is_redelivered() {
        let q = queue(30);
        let id = q.send("a".into(), HashMap::new()).await.unwrap();

        let first = q.receive_batch(1, Duration::ZERO).await.unwrap();
        assert_eq!(first[0].message_id, id);

        let second = q.receive_batch(1, Duration::from_millis(500)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, id);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);

        // the first receipt is stale now
        q.delete(&first[0].receipt_handle).await.unwrap();
        assert_eq!(q.in_flight_len(), 1);
    }

    #[tokio::test]
    async fn test_batch_size_is_respected() {
        let q = queue(60_000);
        for i in 0..5 {
            q.send(format!("m{}", i), HashMap::new()).await.unwrap();
        }
        assert_eq!(q.receive_batch(3, Duration::ZERO).await.unwrap().len(), 3);
        assert_eq!(q.receive_batch(3, Duration::ZERO).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_durations_are_capped() {
        let q = InMemoryQueue::new("test", Duration::from_secs(u64::MAX));
        q.send("a".into(), HashMap::new()).await.unwrap();
        assert_eq!(q.receive_batch(10, Duration::from_secs(u64::MAX)).await.unwrap().len(), 1);
        assert_eq!(q.in_flight_len(), 1);
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_send() {
        let q = std::sync::Arc::new(queue(60_000));
        let producer = q.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.send("late".into(), HashMap::new()).await.unwrap();
        });

        let batch = q.receive_batch(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }
}
