// Review Repository Port (Interface)

use crate::domain::{Page, PageRequest, ReviewQueueItem, ReviewStatus, SyncScope};
use crate::error::Result;
use crate::port::RequeueRecord;
use async_trait::async_trait;

/// Repository interface for the review queue
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn find_review(&self, id: &str) -> Result<Option<ReviewQueueItem>>;

    /// Keyset-paginated review items, optionally scoped to one job
    async fn list_reviews(
        &self,
        job_id: Option<&str>,
        status: Option<ReviewStatus>,
        page: &PageRequest,
    ) -> Result<Page<ReviewQueueItem>>;

    async fn add_review_note(&self, id: &str, text: &str, now: i64) -> Result<ReviewQueueItem>;

    /// Close an open item without retrying
    async fn resolve_review(&self, id: &str, now: i64) -> Result<ReviewQueueItem>;

    /// Close an open item and requeue its document with a fresh retry budget
    async fn retry_review(&self, id: &str, now: i64) -> Result<RequeueRecord>;

    async fn reviews_updated_since(
        &self,
        scope: &SyncScope,
        since: i64,
        limit: u32,
    ) -> Result<Vec<ReviewQueueItem>>;
}
