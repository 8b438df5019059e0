//! RPC Request/Response Types
//!
//! Every method takes a single JSON object as its first positional
//! parameter. Entities (`Job`, `JobDocument`, `ReviewQueueItem`, `Page`) are
//! returned in their domain serialization.

use docflow_core::domain::{
    DocumentStatus, Job, JobConfig, JobDocument, JobId, JobStatus, ListQuery, ReviewQueueItem,
    ReviewStatus, StatusMessage, SyncScope,
};
use docflow_core::port::RequeueRecord;
use serde::{Deserialize, Serialize};

/// job.create.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub config: JobConfig,
    /// Start the job right after creating it
    #[serde(default)]
    pub start: bool,
}

/// job.start/pause/resume/cancel/retry_failed/get.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdRequest {
    pub job_id: JobId,
}

/// job.list.v1
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsRequest {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(flatten)]
    pub query: ListQuery,
}

/// document.list.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDocumentsRequest {
    pub job_id: JobId,
    #[serde(default)]
    pub status: Option<DocumentStatus>,
    #[serde(flatten)]
    pub query: ListQuery,
}

/// review.list.v1
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListReviewsRequest {
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub status: Option<ReviewStatus>,
    #[serde(flatten)]
    pub query: ListQuery,
}

/// review.retry/resolve.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIdRequest {
    pub review_id: String,
}

/// review.note.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewNoteRequest {
    pub review_id: String,
    pub text: String,
}

/// Result of job.retry_failed.v1 and review.retry.v1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequeueResponse {
    pub job: Job,
    pub documents: Vec<JobDocument>,
    /// Review items closed as `retried`
    pub reviews: Vec<ReviewQueueItem>,
}

impl From<RequeueRecord> for RequeueResponse {
    fn from(record: RequeueRecord) -> Self {
        Self {
            job: record.job,
            documents: record.documents,
            reviews: record.reviews,
        }
    }
}

/// status.poll.v1
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollRequest {
    #[serde(default)]
    pub scope: SyncScope,
    /// Epoch millis; entities with `updated_at >= since` are returned
    #[serde(default)]
    pub since: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub messages: Vec<StatusMessage>,
    /// Daemon clock at the time of the poll
    pub server_time: i64,
}

/// status.subscribe.v1
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub scope: SyncScope,
}
