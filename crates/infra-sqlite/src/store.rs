// SQLite Store - jobs, documents and the review queue behind one pool

use crate::error::map_sqlx_error;
use crate::rows::{DocumentRow, JobRow, ReviewRow};
use crate::{create_pool, run_migrations};
use docflow_core::domain::{DomainError, Job, JobDocument, PageRequest, ReviewQueueItem, SyncScope};
use docflow_core::error::{AppError, Result};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::{Mutex, MutexGuard};

/// `updated_at = max(now, updated_at + 1)`; `?` binds `now`
pub(crate) const BUMP_UPDATED_AT: &str = "updated_at = MAX(?, updated_at + 1)";

/// Implements `JobRepository`, `DocumentRepository` and `ReviewRepository`
///
/// SQLite admits one writer at a time. Writes are serialized in-process so a
/// read-then-write transaction never loses its snapshot to another writer.
///
/// The write lock also guards the last stamp handed out. Every write is
/// stamped strictly later than the one committed before it, so `updated_at`
/// follows commit order and an `updated_at >= since` poll never skips a
/// write that committed after it ran.
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<i64>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(i64::MIN),
        }
    }

    /// Create the pool and bring the schema up to date
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;

        // Stamps continue after the newest row written by a previous run
        let high_water: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(m) FROM (
                SELECT MAX(updated_at) AS m FROM jobs
                UNION ALL SELECT MAX(updated_at) FROM job_documents
                UNION ALL SELECT MAX(updated_at) FROM review_queue
            )
            "#,
        )
        .fetch_one(&pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut store = Self::new(pool);
        *store.write_lock.get_mut() = high_water.unwrap_or(i64::MIN);
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Take the write lock and the commit stamp for a write requested at `now`
    pub(crate) async fn writer(&self, now: i64) -> (MutexGuard<'_, i64>, i64) {
        let mut last = self.write_lock.lock().await;
        let stamp = now.max(last.saturating_add(1));
        *last = stamp;
        (last, stamp)
    }
}

pub(crate) fn invalid(err: DomainError) -> AppError {
    AppError::InvalidState(err.to_string())
}

pub(crate) async fn fetch_job(conn: &mut SqliteConnection, id: &str) -> Result<Job> {
    sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?
        .try_into()
}

pub(crate) async fn fetch_document(conn: &mut SqliteConnection, id: &str) -> Result<JobDocument> {
    sqlx::query_as::<_, DocumentRow>("SELECT * FROM job_documents WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?
        .try_into()
}

pub(crate) async fn fetch_review(conn: &mut SqliteConnection, id: &str) -> Result<ReviewQueueItem> {
    sqlx::query_as::<_, ReviewRow>("SELECT * FROM review_queue WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| AppError::NotFound(format!("review item {}", id)))?
        .try_into()
}

/// Append the keyset filter, ordering and `LIMIT page_size + 1`
///
/// The builder must already end inside a `WHERE` clause.
pub(crate) fn push_keyset(qb: &mut QueryBuilder<'_, Sqlite>, page: &PageRequest) {
    let column = page.sort_by.column();
    if let Some(cursor) = &page.cursor {
        qb.push(format!(
            " AND ({}, id) {} (",
            column,
            page.sort_order.after_operator()
        ));
        qb.push_bind(cursor.sort_value);
        qb.push(", ");
        qb.push_bind(cursor.id.clone());
        qb.push(")");
    }

    let order = page.sort_order.keyword();
    qb.push(format!(" ORDER BY {} {}, id {} LIMIT ", column, order, order));
    qb.push_bind(page.fetch_limit());
}

/// Append `updated_at >= since`, the scope filter on `job_column` and the
/// oldest-first ordering
pub(crate) fn push_updated_since(
    qb: &mut QueryBuilder<'_, Sqlite>,
    scope: &SyncScope,
    job_column: &str,
    since: i64,
    limit: u32,
) {
    qb.push(" WHERE updated_at >= ");
    qb.push_bind(since);
    if !scope.job_ids.is_empty() {
        qb.push(format!(" AND {} IN (", job_column));
        let mut ids = qb.separated(", ");
        for id in &scope.job_ids {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");
    }
    qb.push(" ORDER BY updated_at ASC, id ASC LIMIT ");
    qb.push_bind(i64::from(limit));
}
