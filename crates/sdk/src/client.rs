//! Docflow Client Implementation

use crate::error::{Result, SdkError};
use crate::transport::{RpcPollSource, RpcPushTransport};
use crate::types::{
    CreateJobRequest, JobIdRequest, ListDocumentsRequest, ListJobsRequest, ListReviewsRequest,
    PollRequest, PollResponse, RequeueResult, ReviewIdRequest, ReviewNoteRequest,
};
use docflow_core::application::SyncSubscription;
use docflow_core::domain::{
    DocumentStatus, Job, JobConfig, JobDocument, JobStatus, ListQuery, Page, ReviewQueueItem,
    ReviewStatus, SyncScope,
};
use docflow_core::settings::SyncSettings;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Docflow daemon client
///
/// Calls go over HTTP; [`DocflowClient::watch`] opens a WebSocket to the same
/// host for status updates.
///
/// # Example
///
/// ```no_run
/// use docflow_sdk::DocflowClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = DocflowClient::connect("http://127.0.0.1:9527").await?;
/// let job = client.get_job("0b6e4c8e-4c39-4bd6-8f57-2f0f7c6c2b1a").await?;
/// println!("{}: {:?}", job.name, job.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DocflowClient {
    http: Arc<HttpClient>,
    ws_url: String,
}

impl DocflowClient {
    /// Connect to the Docflow daemon
    ///
    /// # Arguments
    ///
    /// * `url` - RPC endpoint URL (e.g., `http://127.0.0.1:9527`)
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();
        let ws_url = ws_url_for(url)?;

        let http = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .build(url)
            .map_err(|e| SdkError::Connection(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            http: Arc::new(http),
            ws_url,
        })
    }

    async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let mut array = ArrayParams::new();
        array.insert(params)?;
        let response: R = self.http.request(method, array).await?;
        Ok(response)
    }

    /// Create a job, optionally starting it right away
    ///
    /// A rejected configuration comes back as `SdkError::Rpc` with code 4000
    /// and the violated fields in `data`.
    pub async fn create_job(&self, config: &JobConfig, start: bool) -> Result<Job> {
        self.call("job.create.v1", CreateJobRequest { config, start })
            .await
    }

    pub async fn start_job(&self, job_id: &str) -> Result<Job> {
        self.call("job.start.v1", JobIdRequest { job_id }).await
    }

    pub async fn pause_job(&self, job_id: &str) -> Result<Job> {
        self.call("job.pause.v1", JobIdRequest { job_id }).await
    }

    pub async fn resume_job(&self, job_id: &str) -> Result<Job> {
        self.call("job.resume.v1", JobIdRequest { job_id }).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        self.call("job.cancel.v1", JobIdRequest { job_id }).await
    }

    /// Requeue every failed document of the job
    pub async fn retry_failed(&self, job_id: &str) -> Result<RequeueResult> {
        self.call("job.retry_failed.v1", JobIdRequest { job_id })
            .await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.call("job.get.v1", JobIdRequest { job_id }).await
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>, query: &ListQuery) -> Result<Page<Job>> {
        self.call("job.list.v1", ListJobsRequest { status, query })
            .await
    }

    pub async fn list_documents(
        &self,
        job_id: &str,
        status: Option<DocumentStatus>,
        query: &ListQuery,
    ) -> Result<Page<JobDocument>> {
        self.call(
            "document.list.v1",
            ListDocumentsRequest {
                job_id,
                status,
                query,
            },
        )
        .await
    }

    pub async fn list_reviews(
        &self,
        job_id: Option<&str>,
        status: Option<ReviewStatus>,
        query: &ListQuery,
    ) -> Result<Page<ReviewQueueItem>> {
        self.call(
            "review.list.v1",
            ListReviewsRequest {
                job_id,
                status,
                query,
            },
        )
        .await
    }

    pub async fn add_review_note(&self, review_id: &str, text: &str) -> Result<ReviewQueueItem> {
        self.call("review.note.v1", ReviewNoteRequest { review_id, text })
            .await
    }

    pub async fn retry_review(&self, review_id: &str) -> Result<RequeueResult> {
        self.call("review.retry.v1", ReviewIdRequest { review_id })
            .await
    }

    pub async fn resolve_review(&self, review_id: &str) -> Result<ReviewQueueItem> {
        self.call("review.resolve.v1", ReviewIdRequest { review_id })
            .await
    }

    /// Entities in `scope` with `updated_at >= since`, oldest first
    pub async fn poll(&self, scope: &SyncScope, since: i64) -> Result<PollResponse> {
        self.call("status.poll.v1", PollRequest { scope, since })
            .await
    }

    pub fn push_transport(&self) -> RpcPushTransport {
        RpcPushTransport::new(self.ws_url.clone())
    }

    pub fn poll_source(&self) -> RpcPollSource {
        RpcPollSource::new(self.clone())
    }

    /// Live status updates over WebSocket, falling back to polling
    ///
    /// # Arguments
    ///
    /// * `since` - Epoch millis the caller is already up to date with
    pub fn watch(&self, scope: SyncScope, settings: SyncSettings, since: i64) -> SyncSubscription {
        SyncSubscription::spawn(
            Arc::new(self.push_transport()),
            Arc::new(self.poll_source()),
            scope,
            settings,
            since,
        )
    }
}

/// `http(s)://host:port` -> `ws(s)://host:port`
fn ws_url_for(url: &str) -> Result<String> {
    if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else {
        Err(SdkError::InvalidUrl(format!(
            "expected an http:// or https:// URL, got '{}'",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_for() {
        assert_eq!(ws_url_for("http://127.0.0.1:9527").unwrap(), "ws://127.0.0.1:9527");
        assert_eq!(
            ws_url_for("https://docflow.internal").unwrap(),
            "wss://docflow.internal"
        );
        assert!(matches!(
            ws_url_for("127.0.0.1:9527"),
            Err(SdkError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        assert!(DocflowClient::connect("ftp://host").await.is_err());
    }
}
