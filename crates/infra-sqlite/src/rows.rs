// SQLite row representations and their conversion into domain entities

use docflow_core::domain::{
    DocumentStatus, ErrorKind, Job, JobDocument, JobStatus, ReviewNote, ReviewQueueItem,
    ReviewReason, ReviewResolution, ReviewStatus,
};
use docflow_core::error::{AppError, Result};
use std::str::FromStr;

fn parse<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(AppError::Database)
}

fn parse_opt<T: FromStr<Err = String>>(value: Option<&str>) -> Result<Option<T>> {
    value.map(parse).transpose()
}

fn narrow<T: TryFrom<i64>>(value: i64, column: &str) -> Result<T> {
    T::try_from(value)
        .map_err(|_| AppError::Database(format!("{} out of range: {}", column, value)))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    id: String,
    name: String,
    config: String, // JSON
    status: String,
    priority: i64,
    total_items: i64,
    processed_items: i64,
    failed_items: i64,
    needs_review_items: i64,
    failure_reason: Option<String>,
    discovery_exhausted: i64, // SQLite boolean as integer
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            config: serde_json::from_str(&row.config)?,
            status: parse::<JobStatus>(&row.status)?,
            priority: narrow(row.priority, "jobs.priority")?,
            id: row.id,
            name: row.name,
            total_items: row.total_items,
            processed_items: row.processed_items,
            failed_items: row.failed_items,
            needs_review_items: row.needs_review_items,
            failure_reason: row.failure_reason,
            discovery_exhausted: row.discovery_exhausted != 0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DocumentRow {
    id: String,
    job_id: String,
    source_ref: String,
    display_name: String,
    size_bytes: Option<i64>,
    status: String,
    priority: i64,
    retry_count: i64,
    last_error: Option<String>,
    error_kind: Option<String>,
    processing_time_ms: Option<i64>,
    next_attempt_at: i64,
    enqueued_at: i64,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl TryFrom<DocumentRow> for JobDocument {
    type Error = AppError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        Ok(JobDocument {
            status: parse::<DocumentStatus>(&row.status)?,
            error_kind: parse_opt::<ErrorKind>(row.error_kind.as_deref())?,
            priority: narrow(row.priority, "job_documents.priority")?,
            retry_count: narrow(row.retry_count, "job_documents.retry_count")?,
            id: row.id,
            job_id: row.job_id,
            source_ref: row.source_ref,
            display_name: row.display_name,
            size_bytes: row.size_bytes,
            last_error: row.last_error,
            processing_time_ms: row.processing_time_ms,
            next_attempt_at: row.next_attempt_at,
            enqueued_at: row.enqueued_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ReviewRow {
    id: String,
    document_id: String,
    job_id: String,
    source_ref: String,
    reason: String,
    error_kind: Option<String>,
    error_message: Option<String>,
    retry_count: i64,
    max_retries: i64,
    priority: i64,
    notes: String, // JSON array
    status: String,
    resolution: Option<String>,
    created_at: i64,
    updated_at: i64,
    resolved_at: Option<i64>,
}

impl TryFrom<ReviewRow> for ReviewQueueItem {
    type Error = AppError;

    fn try_from(row: ReviewRow) -> Result<Self> {
        let notes: Vec<ReviewNote> = serde_json::from_str(&row.notes)?;
        Ok(ReviewQueueItem {
            reason: parse::<ReviewReason>(&row.reason)?,
            error_kind: parse_opt::<ErrorKind>(row.error_kind.as_deref())?,
            status: parse::<ReviewStatus>(&row.status)?,
            resolution: parse_opt::<ReviewResolution>(row.resolution.as_deref())?,
            retry_count: narrow(row.retry_count, "review_queue.retry_count")?,
            max_retries: narrow(row.max_retries, "review_queue.max_retries")?,
            priority: narrow(row.priority, "review_queue.priority")?,
            notes,
            id: row.id,
            document_id: row.document_id,
            job_id: row.job_id,
            source_ref: row.source_ref,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            resolved_at: row.resolved_at,
        })
    }
}

/// Convert fetched rows, failing on the first undecodable one
pub(crate) fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_status_is_a_database_error() {
        let err = parse::<JobStatus>("QUEUED").unwrap_err();
        assert!(matches!(err, AppError::Database(msg) if msg.contains("QUEUED")));
    }

    #[test]
    fn test_narrow_rejects_out_of_range() {
        assert_eq!(narrow::<u8>(5, "priority").unwrap(), 5);
        assert!(narrow::<u8>(300, "priority").is_err());
        assert!(narrow::<u32>(-1, "retry_count").is_err());
    }
}
