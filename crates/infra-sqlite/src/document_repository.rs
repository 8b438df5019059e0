// SQLite DocumentRepository Implementation

use crate::error::map_sqlx_error;
use crate::rows::{convert, DocumentRow, JobRow, ReviewRow};
use crate::store::{
    fetch_document, fetch_job, invalid, push_keyset, push_updated_since, SqliteStore,
    BUMP_UPDATED_AT,
};
use async_trait::async_trait;
use docflow_core::domain::{
    DocumentOutcome, DocumentStatus, Job, JobDocument, JobStatus, OutcomeKind, OutcomeRecord,
    Page, PageRequest, ReviewQueueItem, SyncScope,
};
use docflow_core::error::Result;
use docflow_core::port::{DiscoveredBatch, DocumentRepository, RequeueRecord};
use sqlx::{QueryBuilder, SqliteConnection};

/// Persist every mutable column of a document
async fn save_document(conn: &mut SqliteConnection, doc: &JobDocument) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE job_documents
        SET status = ?, retry_count = ?, last_error = ?, error_kind = ?, processing_time_ms = ?,
            next_attempt_at = ?, enqueued_at = ?, updated_at = ?, started_at = ?, completed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(doc.status.as_str())
    .bind(i64::from(doc.retry_count))
    .bind(&doc.last_error)
    .bind(doc.error_kind.map(|k| k.as_str()))
    .bind(doc.processing_time_ms)
    .bind(doc.next_attempt_at)
    .bind(doc.enqueued_at)
    .bind(doc.updated_at)
    .bind(doc.started_at)
    .bind(doc.completed_at)
    .bind(&doc.id)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Documents requeued by an operator and what they took off the counters
pub(crate) struct Requeued {
    pub documents: Vec<JobDocument>,
    pub reviews: Vec<ReviewQueueItem>,
    pub failed: i64,
    pub needs_review: i64,
}

/// failed | needs_review -> pending with a fresh retry budget; the open
/// review item of each document is closed as `retried`
pub(crate) async fn requeue_documents(
    conn: &mut SqliteConnection,
    document_ids: &[String],
    now: i64,
) -> Result<Requeued> {
    let mut out = Requeued {
        documents: Vec::new(),
        reviews: Vec::new(),
        failed: 0,
        needs_review: 0,
    };

    for id in document_ids {
        let mut doc = fetch_document(&mut *conn, id).await?;
        match doc.status {
            DocumentStatus::Failed => out.failed += 1,
            DocumentStatus::NeedsReview => out.needs_review += 1,
            _ => continue,
        }
        doc.requeue(now).map_err(invalid)?;
        save_document(&mut *conn, &doc).await?;
        out.documents.push(doc);

        let closed = sqlx::query_as::<_, ReviewRow>(&format!(
            r#"
            UPDATE review_queue
            SET status = 'resolved', resolution = 'retried', resolved_at = ?, {}
            WHERE document_id = ? AND status = 'open'
            RETURNING *
            "#,
            BUMP_UPDATED_AT
        ))
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
        if let Some(row) = closed {
            out.reviews.push(row.try_into()?);
        }
    }
    Ok(out)
}

/// Take requeued documents off the job's failure counters
pub(crate) async fn uncount_requeued(
    conn: &mut SqliteConnection,
    job_id: &str,
    requeued: &Requeued,
    now: i64,
) -> Result<Job> {
    if requeued.documents.is_empty() {
        return fetch_job(conn, job_id).await;
    }

    sqlx::query_as::<_, JobRow>(&format!(
        r#"
        UPDATE jobs
        SET failed_items = failed_items - ?, needs_review_items = needs_review_items - ?, {}
        WHERE id = ?
        RETURNING *
        "#,
        BUMP_UPDATED_AT
    ))
    .bind(requeued.failed)
    .bind(requeued.needs_review)
    .bind(now)
    .bind(job_id)
    .fetch_one(conn)
    .await
    .map_err(map_sqlx_error)?
    .try_into()
}

#[async_trait]
impl DocumentRepository for SqliteStore {
    async fn insert_discovered(
        &self,
        job_id: &str,
        documents: &[JobDocument],
        now: i64,
    ) -> Result<DiscoveredBatch> {
        let (_writer, now) = self.writer(now).await;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let job = fetch_job(&mut tx, job_id).await?;
        if job.status.is_terminal() {
            return Ok(DiscoveredBatch {
                documents: Vec::new(),
                job,
            });
        }

        let mut inserted = Vec::new();
        for doc in documents {
            // (job_id, source_ref) is unique: already-known items are skipped
            let result = sqlx::query(
                r#"
                INSERT INTO job_documents (
                    id, job_id, source_ref, display_name, size_bytes,
                    status, priority, retry_count, last_error, error_kind, processing_time_ms,
                    next_attempt_at, enqueued_at, created_at, updated_at, started_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&doc.id)
            .bind(job_id)
            .bind(&doc.source_ref)
            .bind(&doc.display_name)
            .bind(doc.size_bytes)
            .bind(doc.status.as_str())
            .bind(i64::from(doc.priority))
            .bind(i64::from(doc.retry_count))
            .bind(&doc.last_error)
            .bind(doc.error_kind.map(|k| k.as_str()))
            .bind(doc.processing_time_ms)
            .bind(doc.next_attempt_at)
            .bind(doc.enqueued_at)
            .bind(doc.created_at)
            .bind(now)
            .bind(doc.started_at)
            .bind(doc.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            if result.rows_affected() == 1 {
                inserted.push(JobDocument {
                    updated_at: now,
                    ..doc.clone()
                });
            }
        }

        let job = if inserted.is_empty() {
            job
        } else {
            sqlx::query_as::<_, JobRow>(&format!(
                "UPDATE jobs SET total_items = total_items + ?, {} WHERE id = ? RETURNING *",
                BUMP_UPDATED_AT
            ))
            .bind(inserted.len() as i64)
            .bind(now)
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .try_into()?
        };

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(DiscoveredBatch {
            documents: inserted,
            job,
        })
    }

    async fn claim_next(&self, job_id: &str, now: i64) -> Result<Option<JobDocument>> {
        let (_writer, now) = self.writer(now).await;

        // Select and claim in one statement; the job must still be running
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            UPDATE job_documents
            SET status = 'processing', started_at = ?, {}
            WHERE id = (
                SELECT d.id FROM job_documents d
                JOIN jobs j ON j.id = d.job_id
                WHERE d.job_id = ?
                  AND d.status = 'pending'
                  AND d.next_attempt_at <= ?
                  AND j.status = 'running'
                ORDER BY d.priority DESC, d.enqueued_at ASC, d.id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
            BUMP_UPDATED_AT
        ))
        .bind(now)
        .bind(now)
        .bind(job_id)
        .bind(now)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobDocument::try_from).transpose()
    }

    async fn record_outcome(
        &self,
        document_id: &str,
        outcome: &DocumentOutcome,
        now: i64,
    ) -> Result<OutcomeRecord> {
        let (_writer, now) = self.writer(now).await;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let mut document = fetch_document(&mut tx, document_id).await?;
        let job = fetch_job(&mut tx, &document.job_id).await?;

        let mut effective = outcome.clone();
        if job.status == JobStatus::Stopped
            && matches!(outcome.kind, OutcomeKind::RetryScheduled { .. })
        {
            effective.kind = OutcomeKind::Cancelled;
        }

        document.apply_outcome(&effective, now).map_err(invalid)?;
        save_document(&mut tx, &document).await?;

        let review = match &effective.kind {
            OutcomeKind::NeedsReview {
                review_id,
                reason,
                max_retries,
            } => {
                // At most one item per document: re-escalation reopens it,
                // keeping id, notes and created_at
                let row = sqlx::query_as::<_, ReviewRow>(
                    r#"
                    INSERT INTO review_queue (
                        id, document_id, job_id, source_ref,
                        reason, error_kind, error_message, retry_count, max_retries, priority,
                        notes, status, resolution, created_at, updated_at, resolved_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '[]', 'open', NULL, ?, ?, NULL)
                    ON CONFLICT(document_id) DO UPDATE SET
                        reason = excluded.reason,
                        error_kind = excluded.error_kind,
                        error_message = excluded.error_message,
                        retry_count = excluded.retry_count,
                        max_retries = excluded.max_retries,
                        priority = excluded.priority,
                        status = 'open',
                        resolution = NULL,
                        resolved_at = NULL,
                        updated_at = MAX(excluded.updated_at, review_queue.updated_at + 1)
                    RETURNING *
                    "#,
                )
                .bind(review_id)
                .bind(&document.id)
                .bind(&document.job_id)
                .bind(&document.source_ref)
                .bind(reason.as_str())
                .bind(document.error_kind.map(|k| k.as_str()))
                .bind(&document.last_error)
                .bind(i64::from(document.retry_count))
                .bind(i64::from(*max_retries))
                .bind(i64::from(document.priority))
                .bind(now)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
                Some(ReviewQueueItem::try_from(row)?)
            }
            _ => None,
        };

        let counter = match effective.kind {
            OutcomeKind::Completed => Some("processed_items"),
            OutcomeKind::Failed => Some("failed_items"),
            OutcomeKind::NeedsReview { .. } => Some("needs_review_items"),
            OutcomeKind::RetryScheduled { .. } | OutcomeKind::Cancelled => None,
        };
        let job = match counter {
            Some(column) => sqlx::query_as::<_, JobRow>(&format!(
                "UPDATE jobs SET {col} = {col} + 1, {bump} WHERE id = ? RETURNING *",
                col = column,
                bump = BUMP_UPDATED_AT
            ))
            .bind(now)
            .bind(&document.job_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .try_into()?,
            None => job,
        };

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(OutcomeRecord {
            document,
            job,
            review,
        })
    }

    async fn cancel_pending(&self, job_id: &str, now: i64) -> Result<Vec<JobDocument>> {
        let (_writer, now) = self.writer(now).await;

        let rows: Vec<DocumentRow> = sqlx::query_as(&format!(
            r#"
            UPDATE job_documents
            SET status = 'cancelled', completed_at = ?, {}
            WHERE job_id = ? AND status = 'pending'
            RETURNING *
            "#,
            BUMP_UPDATED_AT
        ))
        .bind(now)
        .bind(now)
        .bind(job_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        convert(rows)
    }

    async fn requeue_failed(&self, job_id: &str, now: i64) -> Result<RequeueRecord> {
        let (_writer, now) = self.writer(now).await;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        fetch_job(&mut tx, job_id).await?;
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM job_documents
            WHERE job_id = ? AND status IN ('failed', 'needs_review')
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let requeued = requeue_documents(&mut tx, &ids, now).await?;
        let job = uncount_requeued(&mut tx, job_id, &requeued, now).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(RequeueRecord {
            documents: requeued.documents,
            job,
            reviews: requeued.reviews,
        })
    }

    async fn release_processing(&self, now: i64) -> Result<Vec<JobDocument>> {
        let (_writer, now) = self.writer(now).await;

        let rows: Vec<DocumentRow> = sqlx::query_as(&format!(
            r#"
            UPDATE job_documents
            SET status = 'pending', next_attempt_at = ?, started_at = NULL, {}
            WHERE status = 'processing'
            RETURNING *
            "#,
            BUMP_UPDATED_AT
        ))
        .bind(now)
        .bind(now)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        convert(rows)
    }

    async fn find_document(&self, id: &str) -> Result<Option<JobDocument>> {
        sqlx::query_as::<_, DocumentRow>("SELECT * FROM job_documents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .map(JobDocument::try_from)
            .transpose()
    }

    async fn list_documents(
        &self,
        job_id: &str,
        status: Option<DocumentStatus>,
        page: &PageRequest,
    ) -> Result<Page<JobDocument>> {
        let mut qb = QueryBuilder::new("SELECT * FROM job_documents WHERE job_id = ");
        qb.push_bind(job_id.to_string());
        if let Some(status) = status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        push_keyset(&mut qb, page);

        let rows: Vec<DocumentRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(Page::from_rows(convert(rows)?, page.page_size, page.sort_by))
    }

    async fn count_active(&self, job_id: &str) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_documents WHERE job_id = ? AND status IN ('pending', 'processing')",
        )
        .bind(job_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn next_due_at(&self, job_id: &str) -> Result<Option<i64>> {
        sqlx::query_scalar(
            "SELECT MIN(next_attempt_at) FROM job_documents WHERE job_id = ? AND status = 'pending'",
        )
        .bind(job_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn documents_updated_since(
        &self,
        scope: &SyncScope,
        since: i64,
        limit: u32,
    ) -> Result<Vec<JobDocument>> {
        let mut qb = QueryBuilder::new("SELECT * FROM job_documents");
        push_updated_since(&mut qb, scope, "job_id", since, limit);

        let rows: Vec<DocumentRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        convert(rows)
    }
}
