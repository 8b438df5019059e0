// SQLite JobRepository Implementation

use crate::error::map_sqlx_error;
use crate::rows::{convert, JobRow};
use crate::store::{fetch_job, invalid, push_keyset, push_updated_since, SqliteStore, BUMP_UPDATED_AT};
use async_trait::async_trait;
use docflow_core::domain::{Job, JobStatus, Page, PageRequest, SyncScope};
use docflow_core::error::Result;
use docflow_core::port::JobRepository;
use sqlx::QueryBuilder;

#[async_trait]
impl JobRepository for SqliteStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let config = serde_json::to_string(&job.config)?;
        let (_writer, stamp) = self.writer(job.updated_at).await;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, name, config, status, priority,
                total_items, processed_items, failed_items, needs_review_items,
                failure_reason, discovery_exhausted,
                created_at, updated_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&config)
        .bind(job.status.as_str())
        .bind(i64::from(job.priority))
        .bind(job.total_items)
        .bind(job.processed_items)
        .bind(job.failed_items)
        .bind(job.needs_review_items)
        .bind(&job.failure_reason)
        .bind(if job.discovery_exhausted { 1 } else { 0 })
        .bind(job.created_at)
        .bind(stamp)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_job(&self, id: &str) -> Result<Option<Job>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .map(Job::try_from)
            .transpose()
    }

    async fn transition_job(
        &self,
        id: &str,
        to: JobStatus,
        failure_reason: Option<&str>,
        now: i64,
    ) -> Result<Job> {
        let (_writer, now) = self.writer(now).await;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let mut job = fetch_job(&mut tx, id).await?;
        let from = job.status;
        job.transition(to, now).map_err(invalid)?;
        if to == JobStatus::Failed {
            job.failure_reason = failure_reason.map(str::to_string);
        }

        // Conditional on the status we validated against
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, failure_reason = ?, started_at = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(&job.failure_reason)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .bind(id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(job)
    }

    async fn mark_discovery_exhausted(&self, id: &str, now: i64) -> Result<Job> {
        let (_writer, now) = self.writer(now).await;
        let mut conn = self.pool().acquire().await.map_err(map_sqlx_error)?;

        sqlx::query(&format!(
            "UPDATE jobs SET discovery_exhausted = 1, {} WHERE id = ? AND discovery_exhausted = 0",
            BUMP_UPDATED_AT
        ))
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        fetch_job(&mut conn, id).await
    }

    async fn complete_if_drained(&self, id: &str, now: i64) -> Result<Option<Job>> {
        let (_writer, now) = self.writer(now).await;
        let mut conn = self.pool().acquire().await.map_err(map_sqlx_error)?;

        // Drain check and transition in one statement
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = ?, {}
            WHERE id = ?
              AND status = 'running'
              AND discovery_exhausted = 1
              AND NOT EXISTS (
                  SELECT 1 FROM job_documents
                  WHERE job_id = jobs.id AND status IN ('pending', 'processing')
              )
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

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => {
                // Distinguish "not drained" from "no such job"
                fetch_job(&mut conn, id).await?;
                Ok(None)
            }
        }
    }

    async fn list_jobs(&self, status: Option<JobStatus>, page: &PageRequest) -> Result<Page<Job>> {
        let mut qb = QueryBuilder::new("SELECT * FROM jobs WHERE 1 = 1");
        if let Some(status) = status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        push_keyset(&mut qb, page);

        let rows: Vec<JobRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(Page::from_rows(convert(rows)?, page.page_size, page.sort_by))
    }

    async fn find_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        convert(rows)
    }

    async fn jobs_updated_since(
        &self,
        scope: &SyncScope,
        since: i64,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let mut qb = QueryBuilder::new("SELECT * FROM jobs");
        push_updated_since(&mut qb, scope, "id", since, limit);

        let rows: Vec<JobRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        convert(rows)
    }
}
