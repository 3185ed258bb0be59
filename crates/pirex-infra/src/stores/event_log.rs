//! The event log (C1's "event log" capability set): append `Feedback`,
//! consume content-ingestion messages with at-least-once delivery and a
//! per-message retry count, per §4.1 and §6's topic list
//! (`content-ingestion`, `feedback-events`, `job-events`).
//!
//! `InMemoryEventLog` backs local running and tests: an `mpsc`-backed
//! bounded queue per topic. At-least-once delivery is modeled by requiring
//! an explicit `ack`; a message that is read but never acked is eligible
//! for redelivery with an incremented retry count, matching §4.4's
//! "the consumer's read cursor advances only after a worker acknowledges
//! the message."

use std::collections::VecDeque;
use std::sync::Arc;

use pirex_types::{ContentItem, FeedbackEvent, JobId, Result};
use tokio::sync::Mutex;

/// A content-ingestion message as it travels the `content-ingestion` topic:
/// the item, the delivery-count carried per §6, and the job this item's
/// ingestion is tracked under (so the pipeline's workers can report
/// per-item progress back to C3 without a side channel).
#[derive(Debug, Clone)]
pub struct IngestionMessage {
    pub item: ContentItem,
    pub retry_count: u32,
    pub job_id: JobId,
}

#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    async fn publish_feedback(&self, event: FeedbackEvent) -> Result<()>;
    async fn publish_ingestion(&self, item: ContentItem, job_id: JobId) -> Result<()>;
    /// Pop the next undelivered ingestion message, if any. The caller must
    /// call `ack_ingestion` or `nack_ingestion` exactly once for the
    /// returned message.
    async fn poll_ingestion(&self) -> Option<IngestionMessage>;
    async fn ack_ingestion(&self, item_id: pirex_types::ItemId);
    /// Return a message to the queue with its retry count incremented,
    /// modeling at-least-once redelivery after a transient failure.
    async fn nack_ingestion(&self, message: IngestionMessage);
}

struct InFlight {
    message: IngestionMessage,
}

#[derive(Default)]
pub struct InMemoryEventLog {
    feedback: Mutex<Vec<FeedbackEvent>>,
    ingestion_queue: Mutex<VecDeque<IngestionMessage>>,
    in_flight: Mutex<Vec<InFlight>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn feedback_log(&self) -> Vec<FeedbackEvent> {
        self.feedback.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl EventLog for InMemoryEventLog {
    async fn publish_feedback(&self, event: FeedbackEvent) -> Result<()> {
        self.feedback.lock().await.push(event);
        Ok(())
    }

    async fn publish_ingestion(&self, item: ContentItem, job_id: JobId) -> Result<()> {
        self.ingestion_queue.lock().await.push_back(IngestionMessage { item, retry_count: 0, job_id });
        Ok(())
    }

    async fn poll_ingestion(&self) -> Option<IngestionMessage> {
        let message = self.ingestion_queue.lock().await.pop_front()?;
        self.in_flight.lock().await.push(InFlight { message: message.clone() });
        Some(message)
    }

    async fn ack_ingestion(&self, item_id: pirex_types::ItemId) {
        self.in_flight.lock().await.retain(|f| f.message.item.id != item_id);
    }

    async fn nack_ingestion(&self, mut message: IngestionMessage) {
        self.in_flight.lock().await.retain(|f| f.message.item.id != message.item.id);
        message.retry_count += 1;
        self.ingestion_queue.lock().await.push_back(message);
    }
}

pub type SharedEventLog = Arc<dyn EventLog>;

#[cfg(test)]
mod tests {
    use super::*;
    use pirex_types::{new_id, now, ContentKind};

    fn item(id: pirex_types::ItemId) -> ContentItem {
        ContentItem {
            id,
            kind: ContentKind::Article,
            title: "t".into(),
            description: None,
            image_urls: vec![],
            categories: vec![],
            attributes: Default::default(),
            embedding: None,
            quality_score: 0.5,
            active: false,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_retry_count() {
        let log = InMemoryEventLog::new();
        let id = new_id();
        log.publish_ingestion(item(id), new_id()).await.unwrap();

        let first = log.poll_ingestion().await.unwrap();
        assert_eq!(first.retry_count, 0);
        log.nack_ingestion(first).await;

        let second = log.poll_ingestion().await.unwrap();
        assert_eq!(second.retry_count, 1);
    }

    #[tokio::test]
    async fn acked_message_is_not_redelivered() {
        let log = InMemoryEventLog::new();
        let id = new_id();
        log.publish_ingestion(item(id), new_id()).await.unwrap();
        let message = log.poll_ingestion().await.unwrap();
        log.ack_ingestion(message.item.id).await;
        assert!(log.poll_ingestion().await.is_none());
    }
}
