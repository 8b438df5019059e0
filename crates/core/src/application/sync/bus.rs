// Status Bus - the explicit event queue producers publish to

use crate::domain::{Job, JobDocument, OutcomeRecord, ReviewQueueItem, StatusMessage};
use crate::port::{DiscoveredBatch, RequeueRecord};
use tokio::sync::broadcast;
use tracing::trace;

/// Fan-out of status messages to every live subscriber
///
/// Publishing never blocks. A subscriber that falls more than the channel
/// capacity behind observes `RecvError::Lagged` and must catch up by polling.
#[derive(Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<StatusMessage>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusMessage> {
        self.tx.subscribe()
    }

    pub fn publish(&self, message: StatusMessage) {
        trace!(
            kind = ?message.kind(),
            entity_id = %message.entity_id(),
            updated_at = message.updated_at(),
            "publish status"
        );
        // No subscribers is not an error
        let _ = self.tx.send(message);
    }

    pub fn publish_job(&self, job: &Job) {
        self.publish(StatusMessage::job(job));
    }

    pub fn publish_document(&self, document: &JobDocument) {
        self.publish(StatusMessage::document(document));
    }

    pub fn publish_review(&self, item: &ReviewQueueItem) {
        self.publish(StatusMessage::review(item));
    }

    pub fn publish_outcome(&self, record: &OutcomeRecord) {
        self.publish_document(&record.document);
        if let Some(item) = &record.review {
            self.publish_review(item);
        }
        self.publish_job(&record.job);
    }

    pub fn publish_discovered(&self, batch: &DiscoveredBatch) {
        for document in &batch.documents {
            self.publish_document(document);
        }
        if !batch.documents.is_empty() {
            self.publish_job(&batch.job);
        }
    }

    pub fn publish_requeue(&self, record: &RequeueRecord) {
        for document in &record.documents {
            self.publish_document(document);
        }
        for item in &record.reviews {
            self.publish_review(item);
        }
        self.publish_job(&record.job);
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(crate::settings::EngineSettings::default().status_buffer)
    }
}
