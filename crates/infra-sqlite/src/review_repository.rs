// SQLite ReviewRepository Implementation

use crate::document_repository::{requeue_documents, uncount_requeued};
use crate::error::map_sqlx_error;
use crate::rows::{convert, ReviewRow};
use crate::store::{fetch_review, invalid, push_keyset, push_updated_since, SqliteStore};
use async_trait::async_trait;
use docflow_core::domain::{
    Page, PageRequest, ReviewQueueItem, ReviewResolution, ReviewStatus, SyncScope,
};
use docflow_core::error::{AppError, Result};
use docflow_core::port::{RequeueRecord, ReviewRepository};
use sqlx::{QueryBuilder, SqliteConnection};

async fn save_review(conn: &mut SqliteConnection, item: &ReviewQueueItem) -> Result<()> {
    let notes = serde_json::to_string(&item.notes)?;
    sqlx::query(
        r#"
        UPDATE review_queue
        SET notes = ?, status = ?, resolution = ?, resolved_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(notes)
    .bind(item.status.as_str())
    .bind(item.resolution.map(|r| r.as_str()))
    .bind(item.resolved_at)
    .bind(item.updated_at)
    .bind(&item.id)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

#[async_trait]
impl ReviewRepository for SqliteStore {
    async fn find_review(&self, id: &str) -> Result<Option<ReviewQueueItem>> {
        sqlx::query_as::<_, ReviewRow>("SELECT * FROM review_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .map(ReviewQueueItem::try_from)
            .transpose()
    }

    async fn list_reviews(
        &self,
        job_id: Option<&str>,
        status: Option<ReviewStatus>,
        page: &PageRequest,
    ) -> Result<Page<ReviewQueueItem>> {
        let mut qb = QueryBuilder::new("SELECT * FROM review_queue WHERE 1 = 1");
        if let Some(job_id) = job_id {
            qb.push(" AND job_id = ");
            qb.push_bind(job_id.to_string());
        }
        if let Some(status) = status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        push_keyset(&mut qb, page);

        let rows: Vec<ReviewRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(Page::from_rows(convert(rows)?, page.page_size, page.sort_by))
    }

    async fn add_review_note(&self, id: &str, text: &str, now: i64) -> Result<ReviewQueueItem> {
        let (_writer, now) = self.writer(now).await;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let mut item = fetch_review(&mut tx, id).await?;
        item.add_note(text, now);
        save_review(&mut tx, &item).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(item)
    }

    async fn resolve_review(&self, id: &str, now: i64) -> Result<ReviewQueueItem> {
        let (_writer, now) = self.writer(now).await;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let mut item = fetch_review(&mut tx, id).await?;
        item.resolve(ReviewResolution::Closed, now)
            .map_err(invalid)?;
        save_review(&mut tx, &item).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(item)
    }

    async fn retry_review(&self, id: &str, now: i64) -> Result<RequeueRecord> {
        let (_writer, now) = self.writer(now).await;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let item = fetch_review(&mut tx, id).await?;
        if !item.is_open() {
            return Err(AppError::InvalidState(format!(
                "review item {} is already resolved",
                id
            )));
        }

        let requeued =
            requeue_documents(&mut tx, std::slice::from_ref(&item.document_id), now).await?;
        if requeued.documents.is_empty() {
            return Err(AppError::InvalidState(format!(
                "document {} is not awaiting review",
                item.document_id
            )));
        }
        let job = uncount_requeued(&mut tx, &item.job_id, &requeued, now).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(RequeueRecord {
            documents: requeued.documents,
            job,
            reviews: requeued.reviews,
        })
    }

    async fn reviews_updated_since(
        &self,
        scope: &SyncScope,
        since: i64,
        limit: u32,
    ) -> Result<Vec<ReviewQueueItem>> {
        let mut qb = QueryBuilder::new("SELECT * FROM review_queue");
        push_updated_since(&mut qb, scope, "job_id", since, limit);

        let rows: Vec<ReviewRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        convert(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::{document, job, store, T0};
    use docflow_core::domain::{
        DocumentOutcome, DocumentStatus, ErrorKind, JobStatus, OutcomeKind, ReviewReason,
    };
    use docflow_core::port::{DocumentRepository, JobRepository};

    /// One job with `count` documents, all escalated to review
    async fn escalated(store: &SqliteStore, count: usize) -> Vec<ReviewQueueItem> {
        let job = job("job-1", T0);
        store.insert_job(&job).await.unwrap();
        store
            .transition_job(&job.id, JobStatus::Running, None, T0 + 1)
            .await
            .unwrap();
        let docs: Vec<_> = (0..count)
            .map(|i| document(&format!("doc-{i}"), &job, &format!("/in/{i}.pdf"), T0 + 2))
            .collect();
        store.insert_discovered(&job.id, &docs, T0 + 2).await.unwrap();

        let mut items = Vec::new();
        for i in 0..count {
            let doc = store.claim_next(&job.id, T0 + 10).await.unwrap().unwrap();
            let outcome = DocumentOutcome {
                kind: OutcomeKind::NeedsReview {
                    review_id: format!("rev-{i}"),
                    reason: ReviewReason::TerminalError,
                    max_retries: 3,
                },
                retry_count: 0,
                last_error: Some("unsupported encoding".to_string()),
                error_kind: Some(ErrorKind::Terminal),
                processing_time_ms: 5,
            };
            let record = store
                .record_outcome(&doc.id, &outcome, T0 + 20 + i as i64)
                .await
                .unwrap();
            items.push(record.review.unwrap());
        }
        items
    }

    #[tokio::test]
    async fn test_notes_are_appended_in_order() {
        let store = store().await;
        let item = escalated(&store, 1).await.remove(0);
        assert!(item.notes.is_empty());

        store.add_review_note(&item.id, "scan is upside down", T0 + 100).await.unwrap();
        let noted = store.add_review_note(&item.id, "asked sender", T0 + 200).await.unwrap();
        assert_eq!(noted.notes.len(), 2);
        assert_eq!(noted.notes[0].text, "scan is upside down");
        assert_eq!(noted.notes[1].added_at, T0 + 200);

        let stored = store.find_review(&item.id).await.unwrap().unwrap();
        assert_eq!(stored, noted);

        let err = store.add_review_note("missing", "x", T0).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_closes_once() {
        let store = store().await;
        let item = escalated(&store, 1).await.remove(0);

        let resolved = store.resolve_review(&item.id, T0 + 100).await.unwrap();
        assert_eq!(resolved.status, ReviewStatus::Resolved);
        assert_eq!(resolved.resolution, Some(ReviewResolution::Closed));
        assert_eq!(resolved.resolved_at, Some(T0 + 100));

        tokio_test::assert_err!(store.resolve_review(&item.id, T0 + 101).await);
        tokio_test::assert_err!(store.retry_review(&item.id, T0 + 102).await);

        // The document stays where it was
        let doc = store.find_document(&item.document_id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::NeedsReview);
    }

    #[tokio::test]
    async fn test_retry_requeues_only_that_document() {
        let store = store().await;
        let items = escalated(&store, 2).await;

        let record = store.retry_review(&items[0].id, T0 + 100).await.unwrap();
        assert_eq!(record.documents.len(), 1);
        assert_eq!(record.documents[0].id, items[0].document_id);
        assert_eq!(record.documents[0].status, DocumentStatus::Pending);
        assert_eq!(record.reviews[0].resolution, Some(ReviewResolution::Retried));
        assert_eq!(record.job.needs_review_items, 1);

        let other = store.find_review(&items[1].id).await.unwrap().unwrap();
        assert!(other.is_open());
    }

    #[tokio::test]
    async fn test_list_reviews_by_job_and_status() {
        let store = store().await;
        let items = escalated(&store, 3).await;
        store.resolve_review(&items[1].id, T0 + 100).await.unwrap();

        let open = store
            .list_reviews(Some("job-1"), Some(ReviewStatus::Open), &PageRequest::first(10))
            .await
            .unwrap();
        assert_eq!(open.data.len(), 2);

        let all = store
            .list_reviews(None, None, &PageRequest::first(2))
            .await
            .unwrap();
        assert_eq!(all.data.len(), 2);
        assert!(all.has_more);

        let none = store
            .list_reviews(Some("job-2"), None, &PageRequest::first(10))
            .await
            .unwrap();
        assert!(none.data.is_empty());

        let changed = store
            .reviews_updated_since(&SyncScope::all(), T0 + 100, 10)
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, items[1].id);
    }
}
