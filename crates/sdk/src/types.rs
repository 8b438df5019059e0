//! SDK Request/Response Types
//!
//! Mirrors the JSON-RPC types from the api-rpc crate. Entities reuse the
//! domain types from `docflow-core`.

use docflow_core::domain::{
    DocumentStatus, Job, JobConfig, JobDocument, JobStatus, ListQuery, ReviewQueueItem,
    ReviewStatus, StatusMessage, SyncScope,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateJobRequest<'a> {
    pub config: &'a JobConfig,
    pub start: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobIdRequest<'a> {
    pub job_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ListJobsRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(flatten)]
    pub query: &'a ListQuery,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ListDocumentsRequest<'a> {
    pub job_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DocumentStatus>,
    #[serde(flatten)]
    pub query: &'a ListQuery,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ListReviewsRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReviewStatus>,
    #[serde(flatten)]
    pub query: &'a ListQuery,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReviewIdRequest<'a> {
    pub review_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReviewNoteRequest<'a> {
    pub review_id: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PollRequest<'a> {
    pub scope: &'a SyncScope,
    pub since: i64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SubscribeRequest<'a> {
    pub scope: &'a SyncScope,
}

/// Documents sent back to `pending` by `retry_failed` or a review retry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequeueResult {
    pub job: Job,
    pub documents: Vec<JobDocument>,
    /// Review items closed as `retried`
    pub reviews: Vec<ReviewQueueItem>,
}

/// status.poll.v1 result
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PollResponse {
    pub messages: Vec<StatusMessage>,
    pub server_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::domain::SortKey;

    #[test]
    fn test_list_request_shape() {
        let query = ListQuery {
            page_size: Some(25),
            sort_by: SortKey::UpdatedAt,
            ..ListQuery::default()
        };
        let value = serde_json::to_value(ListDocumentsRequest {
            job_id: "job-1",
            status: Some(DocumentStatus::Failed),
            query: &query,
        })
        .unwrap();

        assert_eq!(value["job_id"], "job-1");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["page_size"], 25);
        assert_eq!(value["sort_by"], "updated_at");
        assert!(value.get("query").is_none());
    }
}
