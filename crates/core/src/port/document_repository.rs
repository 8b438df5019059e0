// Document Repository Port (Interface)

use crate::domain::{
    DocumentOutcome, DocumentStatus, Job, JobDocument, OutcomeRecord, Page, PageRequest,
    ReviewQueueItem, SyncScope,
};
use crate::error::Result;
use async_trait::async_trait;

/// Newly discovered documents and the job after its `total_items` grew
#[derive(Debug, Clone)]
pub struct DiscoveredBatch {
    pub documents: Vec<JobDocument>,
    pub job: Job,
}

/// Documents sent back to `pending` by an operator retry
#[derive(Debug, Clone)]
pub struct RequeueRecord {
    pub documents: Vec<JobDocument>,
    pub job: Job,
    /// Review items closed with resolution `retried`
    pub reviews: Vec<ReviewQueueItem>,
}

/// Repository interface for JobDocument persistence
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert candidates not yet known for the job (dedupe on `source_ref`)
    /// and grow `total_items` by the number actually inserted. Stopped and
    /// failed jobs accept nothing.
    async fn insert_discovered(
        &self,
        job_id: &str,
        documents: &[JobDocument],
        now: i64,
    ) -> Result<DiscoveredBatch>;

    /// Atomically claim the next due document (pending -> processing)
    ///
    /// Order: priority DESC, enqueued_at ASC, id ASC. Only documents whose
    /// `next_attempt_at <= now` qualify, and only while the job is running.
    async fn claim_next(&self, job_id: &str, now: i64) -> Result<Option<JobDocument>>;

    /// Apply a processing outcome in one transaction: document transition,
    /// counter increment, review item creation
    ///
    /// A retry recorded after the job was stopped becomes `cancelled`.
    async fn record_outcome(
        &self,
        document_id: &str,
        outcome: &DocumentOutcome,
        now: i64,
    ) -> Result<OutcomeRecord>;

    /// Mark every pending document of the job `cancelled`
    async fn cancel_pending(&self, job_id: &str, now: i64) -> Result<Vec<JobDocument>>;

    /// Requeue all failed/needs_review documents, resetting their retry count
    async fn requeue_failed(&self, job_id: &str, now: i64) -> Result<RequeueRecord>;

    /// Return interrupted `processing` documents to `pending` (crash recovery)
    async fn release_processing(&self, now: i64) -> Result<Vec<JobDocument>>;

    async fn find_document(&self, id: &str) -> Result<Option<JobDocument>>;

    async fn list_documents(
        &self,
        job_id: &str,
        status: Option<DocumentStatus>,
        page: &PageRequest,
    ) -> Result<Page<JobDocument>>;

    /// Pending + processing documents of the job
    async fn count_active(&self, job_id: &str) -> Result<i64>;

    /// Earliest `next_attempt_at` among pending documents
    async fn next_due_at(&self, job_id: &str) -> Result<Option<i64>>;

    async fn documents_updated_since(
        &self,
        scope: &SyncScope,
        since: i64,
        limit: u32,
    ) -> Result<Vec<JobDocument>>;
}
