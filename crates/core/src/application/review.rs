// Review Queue Use Cases - operator actions on escalated documents

use crate::application::job_service::{ensure_reopenable, JobManager};
use crate::domain::{
    FieldViolation, ListQuery, Page, ReviewQueueItem, ReviewStatus, ValidationError,
};
use crate::error::{AppError, Result};
use crate::port::RequeueRecord;
use std::sync::Arc;
use tracing::info;

pub struct ReviewService {
    manager: Arc<JobManager>,
}

impl ReviewService {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self { manager }
    }

    pub async fn get(&self, id: &str) -> Result<ReviewQueueItem> {
        self.manager
            .context()
            .store
            .find_review(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("review item {}", id)))
    }

    /// Paginated review items; `status = None` lists open and resolved items
    pub async fn list(
        &self,
        job_id: Option<&str>,
        status: Option<ReviewStatus>,
        query: &ListQuery,
    ) -> Result<Page<ReviewQueueItem>> {
        let page = self.manager.page_request(query)?;
        self.manager
            .context()
            .store
            .list_reviews(job_id, status, &page)
            .await
    }

    pub async fn add_note(&self, id: &str, text: &str) -> Result<ReviewQueueItem> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError {
                violations: vec![FieldViolation::new("text", "must not be empty")],
            }
            .into());
        }

        let ctx = self.manager.context();
        let item = ctx.store.add_review_note(id, text, ctx.now()).await?;
        ctx.bus.publish_review(&item);
        Ok(item)
    }

    /// Requeue the document with `retry_count = 0` and close the item as `retried`
    ///
    /// The document goes through the normal scheduler and retry path again,
    /// `max_retries` included.
    pub async fn retry(&self, id: &str) -> Result<RequeueRecord> {
        let item = self.get(id).await?;
        let job = self.manager.get_job(&item.job_id).await?;
        ensure_reopenable(&job)?;

        let ctx = self.manager.context();
        let record = ctx.store.retry_review(id, ctx.now()).await?;
        ctx.bus.publish_requeue(&record);

        info!(
            review_id = %id,
            job_id = %item.job_id,
            document_id = %item.document_id,
            "Review item retried"
        );
        self.manager.after_requeue(record.job.clone()).await?;
        Ok(record)
    }

    /// Close the item without retrying; the document stays terminal
    pub async fn resolve(&self, id: &str) -> Result<ReviewQueueItem> {
        let ctx = self.manager.context();
        let item = ctx.store.resolve_review(id, ctx.now()).await?;
        ctx.bus.publish_review(&item);
        info!(review_id = %id, job_id = %item.job_id, "Review item resolved");
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{folder_config, Harness};
    use crate::application::worker::RunnerExit;
    use crate::domain::{DocumentStatus, JobStatus, ProcessingMode, ReviewResolution};
    use crate::port::mocks::{MockBehavior, MockProcessingUnit, MockSourceConnector};

    async fn escalated_job(h: &Harness, manager: &Arc<JobManager>) -> String {
        let mut config = folder_config(ProcessingMode::Once, 10);
        config.options.max_retries = 2;
        config.options.retry_delay_seconds = 1;
        let job = manager.create_job(config).await.unwrap();
        manager.start_job(&job.id).await.unwrap();
        assert_eq!(manager.join(&job.id).await, Some(RunnerExit::Completed));
        assert_eq!(h.store.reviews_of(&job.id).len(), 1);
        job.id
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_note_and_resolve() {
        let h = Harness::new(MockSourceConnector::with_items(2), MockProcessingUnit::new_success());
        h.processor
            .set_behavior_for("/inbox/doc-0000.pdf", MockBehavior::Fail("blurred scan".into()));
        let manager = h.manager();
        let reviews = ReviewService::new(manager.clone());
        let job_id = escalated_job(&h, &manager).await;

        let open = reviews
            .list(Some(&job_id), Some(ReviewStatus::Open), &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(open.data.len(), 1);
        assert!(!open.has_more);
        let item = &open.data[0];
        assert_eq!(item.retry_count, 2);
        assert_eq!(item.max_retries, 2);
        assert_eq!(item.priority, 3);

        let noted = reviews.add_note(&item.id, "rescan requested").await.unwrap();
        assert_eq!(noted.notes.len(), 1);
        assert!(noted.updated_at > item.updated_at);
        assert!(matches!(
            reviews.add_note(&item.id, "   ").await,
            Err(AppError::Validation(_))
        ));

        let resolved = reviews.resolve(&item.id).await.unwrap();
        assert_eq!(resolved.status, ReviewStatus::Resolved);
        assert_eq!(resolved.resolution, Some(ReviewResolution::Closed));

        // Resolved items stay resolved
        assert!(matches!(
            reviews.resolve(&item.id).await,
            Err(AppError::InvalidState(_))
        ));
        tokio_test::assert_err!(reviews.retry(&item.id).await);

        let doc = h
            .store
            .documents_of(&job_id)
            .into_iter()
            .find(|d| d.id == item.document_id)
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::NeedsReview);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_requeues_with_fresh_budget() {
        let h = Harness::new(MockSourceConnector::with_items(1), MockProcessingUnit::new_fail("blurred scan"));
        let manager = h.manager();
        let reviews = ReviewService::new(manager.clone());
        let job_id = escalated_job(&h, &manager).await;
        let item = h.store.reviews_of(&job_id).remove(0);

        // Still failing: goes through the full retry budget again
        let record = reviews.retry(&item.id).await.unwrap();
        assert_eq!(record.documents[0].status, DocumentStatus::Pending);
        assert_eq!(record.documents[0].retry_count, 0);
        assert_eq!(record.reviews[0].resolution, Some(ReviewResolution::Retried));

        assert_eq!(manager.join(&job_id).await, Some(RunnerExit::Completed));
        assert_eq!(h.processor.call_count(), 4);

        let reviews_after = h.store.reviews_of(&job_id);
        assert_eq!(reviews_after.len(), 1, "re-escalation reuses the item");
        assert_eq!(reviews_after[0].id, item.id);
        assert!(reviews_after[0].is_open());

        let job = manager.get_job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.needs_review_items, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_item_is_not_found() {
        let h = Harness::default();
        let reviews = ReviewService::new(h.manager());
        let err = reviews.retry("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
