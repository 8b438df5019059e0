// Job Repository Port (Interface)

use crate::domain::{Job, JobStatus, Page, PageRequest, SyncScope};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for Job persistence
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn insert_job(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_job(&self, id: &str) -> Result<Option<Job>>;

    /// Compare-and-set status change
    ///
    /// Succeeds only when the stored status is one of `to.allowed_sources()`.
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job does not exist
    /// - `AppError::InvalidState` if the transition is not allowed
    async fn transition_job(
        &self,
        id: &str,
        to: JobStatus,
        failure_reason: Option<&str>,
        now: i64,
    ) -> Result<Job>;

    /// Record that a `once` scan reached the end of the source
    async fn mark_discovery_exhausted(&self, id: &str, now: i64) -> Result<Job>;

    /// `running -> completed` iff discovery is exhausted and no document is
    /// pending/processing, checked atomically with the update
    async fn complete_if_drained(&self, id: &str, now: i64) -> Result<Option<Job>>;

    /// Keyset-paginated job list
    async fn list_jobs(&self, status: Option<JobStatus>, page: &PageRequest) -> Result<Page<Job>>;

    /// Find all jobs by status (for recovery)
    async fn find_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    /// Jobs in scope with `updated_at >= since`, oldest first
    async fn jobs_updated_since(
        &self,
        scope: &SyncScope,
        since: i64,
        limit: u32,
    ) -> Result<Vec<Job>>;
}
