//! RPC Method Handlers
//!
//! Thin adapters from request types to the application services.

use crate::error::to_rpc_error;
use crate::types::{
    CreateJobRequest, JobIdRequest, ListDocumentsRequest, ListJobsRequest, ListReviewsRequest,
    PollRequest, PollResponse, RequeueResponse, ReviewIdRequest, ReviewNoteRequest,
};
use docflow_core::application::{BusPushTransport, JobManager, ReviewService, StorePollSource};
use docflow_core::domain::{Job, JobDocument, Page, ReviewQueueItem, SyncScope};
use docflow_core::error::AppError;
use docflow_core::port::{PushStream, PushTransport};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::debug;

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    manager: Arc<JobManager>,
    reviews: ReviewService,
    poll: StorePollSource,
    push: BusPushTransport,
}

impl RpcHandler {
    pub fn new(manager: Arc<JobManager>) -> Self {
        let ctx = manager.context().clone();
        let sync = &ctx.settings.sync;
        Self {
            reviews: ReviewService::new(manager.clone()),
            poll: StorePollSource::new(ctx.store.clone(), sync.poll_batch_limit),
            push: BusPushTransport::new(
                ctx.bus.clone(),
                ctx.time.clone(),
                sync.heartbeat_interval(),
            ),
            manager,
        }
    }

    /// job.create.v1
    pub async fn create_job(&self, req: CreateJobRequest) -> RpcResult<Job> {
        let job = self
            .manager
            .create_job(req.config)
            .await
            .map_err(to_rpc_error)?;
        if req.start {
            return self.manager.start_job(&job.id).await.map_err(to_rpc_error);
        }
        Ok(job)
    }

    /// job.start.v1
    pub async fn start_job(&self, req: JobIdRequest) -> RpcResult<Job> {
        self.manager
            .start_job(&req.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// job.pause.v1
    pub async fn pause_job(&self, req: JobIdRequest) -> RpcResult<Job> {
        self.manager
            .pause_job(&req.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// job.resume.v1
    pub async fn resume_job(&self, req: JobIdRequest) -> RpcResult<Job> {
        self.manager
            .resume_job(&req.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// job.cancel.v1
    pub async fn cancel_job(&self, req: JobIdRequest) -> RpcResult<Job> {
        self.manager
            .cancel_job(&req.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// job.retry_failed.v1
    pub async fn retry_failed(&self, req: JobIdRequest) -> RpcResult<RequeueResponse> {
        self.manager
            .retry_failed(&req.job_id)
            .await
            .map(RequeueResponse::from)
            .map_err(to_rpc_error)
    }

    /// job.get.v1
    pub async fn get_job(&self, req: JobIdRequest) -> RpcResult<Job> {
        self.manager
            .get_job(&req.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// job.list.v1
    pub async fn list_jobs(&self, req: ListJobsRequest) -> RpcResult<Page<Job>> {
        self.manager
            .list_jobs(req.status, &req.query)
            .await
            .map_err(to_rpc_error)
    }

    /// document.list.v1
    pub async fn list_documents(&self, req: ListDocumentsRequest) -> RpcResult<Page<JobDocument>> {
        self.manager
            .list_documents(&req.job_id, req.status, &req.query)
            .await
            .map_err(to_rpc_error)
    }

    /// review.list.v1
    pub async fn list_reviews(&self, req: ListReviewsRequest) -> RpcResult<Page<ReviewQueueItem>> {
        self.reviews
            .list(req.job_id.as_deref(), req.status, &req.query)
            .await
            .map_err(to_rpc_error)
    }

    /// review.note.v1
    pub async fn add_review_note(&self, req: ReviewNoteRequest) -> RpcResult<ReviewQueueItem> {
        self.reviews
            .add_note(&req.review_id, &req.text)
            .await
            .map_err(to_rpc_error)
    }

    /// review.retry.v1
    pub async fn retry_review(&self, req: ReviewIdRequest) -> RpcResult<RequeueResponse> {
        self.reviews
            .retry(&req.review_id)
            .await
            .map(RequeueResponse::from)
            .map_err(to_rpc_error)
    }

    /// review.resolve.v1
    pub async fn resolve_review(&self, req: ReviewIdRequest) -> RpcResult<ReviewQueueItem> {
        self.reviews
            .resolve(&req.review_id)
            .await
            .map_err(to_rpc_error)
    }

    /// status.poll.v1
    pub async fn poll(&self, req: PollRequest) -> RpcResult<PollResponse> {
        let server_time = self.manager.context().now();
        let messages = self
            .poll
            .collect(&req.scope, req.since)
            .await
            .map_err(to_rpc_error)?;
        debug!(count = messages.len(), since = req.since, "Status poll served");
        Ok(PollResponse {
            messages,
            server_time,
        })
    }

    /// Event stream behind status.subscribe.v1
    pub async fn subscribe(&self, scope: &SyncScope) -> RpcResult<PushStream> {
        self.push
            .connect(scope)
            .await
            .map_err(|e| to_rpc_error(AppError::Internal(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use docflow_core::application::EngineContext;
    use docflow_core::application::StatusBus;
    use docflow_core::domain::{JobStatus, ListQuery, PushEvent, StatusMessage};
    use docflow_core::port::mocks::{
        InMemoryStore, MockProcessingUnit, MockSourceConnector, SequentialIdProvider,
        TokioTimeProvider,
    };
    use docflow_core::EngineSettings;
    use futures::StreamExt;

    fn handler() -> RpcHandler {
        let settings = EngineSettings::default();
        let ctx = Arc::new(EngineContext {
            store: Arc::new(InMemoryStore::new()),
            connector: Arc::new(MockSourceConnector::with_items(0)),
            processor: Arc::new(MockProcessingUnit::new_success()),
            time: Arc::new(TokioTimeProvider::new(1_700_000_000_000)),
            ids: Arc::new(SequentialIdProvider::new()),
            bus: StatusBus::new(settings.status_buffer),
            settings,
        });
        RpcHandler::new(Arc::new(JobManager::new(ctx)))
    }

    fn create_request(batch_size: u32) -> CreateJobRequest {
        serde_json::from_value(serde_json::json!({
            "config": {
                "name": "invoices",
                "source": { "type": "folder", "path": "/inbox" },
                "processing": { "mode": "once", "batch_size": batch_size }
            }
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_get_and_list() {
        let handler = handler();
        let job = handler.create_job(create_request(10)).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let fetched = handler
            .get_job(JobIdRequest {
                job_id: job.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(fetched, job);

        let page = handler.list_jobs(ListJobsRequest::default()).await.unwrap();
        assert_eq!(page.data.len(), 1);
        assert!(!page.has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_maps_to_validation_code() {
        let err = handler().create_job(create_request(0)).await.unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
        assert!(err.data().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_job_and_bad_transition() {
        let handler = handler();
        let err = handler
            .start_job(JobIdRequest {
                job_id: "missing".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);

        let job = handler.create_job(create_request(10)).await.unwrap();
        let err = handler
            .pause_job(JobIdRequest { job_id: job.id })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::CONFLICT);

        let err = handler
            .list_jobs(ListJobsRequest {
                status: None,
                query: ListQuery {
                    cursor: Some("not-hex".into()),
                    ..ListQuery::default()
                },
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_and_subscribe() {
        let handler = handler();
        let mut events = handler.subscribe(&SyncScope::all()).await.unwrap();

        let job = handler.create_job(create_request(10)).await.unwrap();

        let polled = handler.poll(PollRequest::default()).await.unwrap();
        assert_eq!(polled.messages.len(), 1);
        assert!(polled.server_time >= job.updated_at);

        match events.next().await {
            Some(Ok(PushEvent::Message(StatusMessage::Job { entity, .. }))) => {
                assert_eq!(entity.id, job.id)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
