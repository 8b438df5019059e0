//! JSON-RPC Server
//!
//! One listener serves HTTP calls and WebSocket subscriptions. Binds to
//! localhost unless configured otherwise.

use crate::handler::RpcHandler;
use crate::types::{
    CreateJobRequest, JobIdRequest, ListDocumentsRequest, ListJobsRequest, ListReviewsRequest,
    PollRequest, ReviewIdRequest, ReviewNoteRequest, SubscribeRequest,
};
use docflow_core::application::JobManager;
use futures::StreamExt;
use jsonrpsee::core::RegisterMethodError;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::{PendingSubscriptionSink, RpcModule, SubscriptionMessage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9527;

pub const SUBSCRIBE_METHOD: &str = "status.subscribe.v1";
pub const NOTIFICATION_METHOD: &str = "status.event";
pub const UNSUBSCRIBE_METHOD: &str = "status.unsubscribe.v1";

/// `[rpc]` settings section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcServerConfig {
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, manager: Arc<JobManager>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(manager)),
        }
    }

    /// Build the method table
    pub fn module(&self) -> Result<RpcModule<()>, RegisterMethodError> {
        let mut module = RpcModule::new(());
        let h = &self.handler;

        register(&mut module, "job.create.v1", h, |h, req: CreateJobRequest| async move {
            h.create_job(req).await
        })?;
        register(&mut module, "job.start.v1", h, |h, req: JobIdRequest| async move {
            h.start_job(req).await
        })?;
        register(&mut module, "job.pause.v1", h, |h, req: JobIdRequest| async move {
            h.pause_job(req).await
        })?;
        register(&mut module, "job.resume.v1", h, |h, req: JobIdRequest| async move {
            h.resume_job(req).await
        })?;
        register(&mut module, "job.cancel.v1", h, |h, req: JobIdRequest| async move {
            h.cancel_job(req).await
        })?;
        register(&mut module, "job.retry_failed.v1", h, |h, req: JobIdRequest| async move {
            h.retry_failed(req).await
        })?;
        register(&mut module, "job.get.v1", h, |h, req: JobIdRequest| async move {
            h.get_job(req).await
        })?;
        register(&mut module, "job.list.v1", h, |h, req: ListJobsRequest| async move {
            h.list_jobs(req).await
        })?;
        register(&mut module, "document.list.v1", h, |h, req: ListDocumentsRequest| async move {
            h.list_documents(req).await
        })?;
        register(&mut module, "review.list.v1", h, |h, req: ListReviewsRequest| async move {
            h.list_reviews(req).await
        })?;
        register(&mut module, "review.note.v1", h, |h, req: ReviewNoteRequest| async move {
            h.add_review_note(req).await
        })?;
        register(&mut module, "review.retry.v1", h, |h, req: ReviewIdRequest| async move {
            h.retry_review(req).await
        })?;
        register(&mut module, "review.resolve.v1", h, |h, req: ReviewIdRequest| async move {
            h.resolve_review(req).await
        })?;
        register(&mut module, "status.poll.v1", h, |h, req: PollRequest| async move {
            h.poll(req).await
        })?;

        let handler = self.handler.clone();
        module.register_subscription(
            SUBSCRIBE_METHOD,
            NOTIFICATION_METHOD,
            UNSUBSCRIBE_METHOD,
            move |params, pending, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SubscribeRequest = match params.one() {
                        Ok(req) => req,
                        Err(e) => {
                            pending.reject(e).await;
                            return Ok(());
                        }
                    };
                    forward_events(handler, req, pending).await
                }
            },
        )?;

        Ok(module)
    }

    /// Start the JSON-RPC server, returning the bound address and its handle
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.module().map_err(|e| e.to_string())?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, handle))
    }
}

/// Register a method whose params are a single request object
fn register<Req, Resp, F, Fut>(
    module: &mut RpcModule<()>,
    name: &'static str,
    handler: &Arc<RpcHandler>,
    call: F,
) -> Result<(), RegisterMethodError>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Clone + Send + 'static,
    F: Fn(Arc<RpcHandler>, Req) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, ErrorObjectOwned>> + Send + 'static,
{
    let handler = handler.clone();
    module.register_async_method(name, move |params, _, _| {
        let handler = handler.clone();
        let call = call.clone();
        async move {
            let req: Req = params.one()?;
            call(handler, req).await
        }
    })?;
    Ok(())
}

/// Relay bus events to one WebSocket subscriber until either side goes away
///
/// A lagged subscriber is dropped; the client repairs the gap by polling.
async fn forward_events(
    handler: Arc<RpcHandler>,
    req: SubscribeRequest,
    pending: PendingSubscriptionSink,
) -> jsonrpsee::core::SubscriptionResult {
    let mut events = match handler.subscribe(&req.scope).await {
        Ok(events) => events,
        Err(e) => {
            pending.reject(e).await;
            return Ok(());
        }
    };
    let sink = pending.accept().await?;
    debug!(jobs = req.scope.job_ids.len(), "Status subscriber connected");

    loop {
        tokio::select! {
            _ = sink.closed() => break,
            next = events.next() => match next {
                Some(Ok(event)) => {
                    let message = SubscriptionMessage::from_json(&event)?;
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Closing status subscription");
                    break;
                }
                None => break,
            },
        }
    }

    debug!("Status subscriber disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::application::{EngineContext, StatusBus};
    use docflow_core::domain::{Job, JobStatus, Page, PushEvent, StatusMessage};
    use docflow_core::port::mocks::{
        InMemoryStore, MockProcessingUnit, MockSourceConnector, SequentialIdProvider,
    };
    use docflow_core::port::SystemTimeProvider;
    use docflow_core::EngineSettings;
    use jsonrpsee::core::client::{ClientT, SubscriptionClientT};
    use jsonrpsee::http_client::HttpClientBuilder;
    use jsonrpsee::rpc_params;
    use jsonrpsee::ws_client::WsClientBuilder;
    use serde_json::json;

    async fn start_server() -> (SocketAddr, ServerHandle) {
        let settings = EngineSettings::default();
        let ctx = Arc::new(EngineContext {
            store: Arc::new(InMemoryStore::new()),
            connector: Arc::new(MockSourceConnector::with_items(0)),
            processor: Arc::new(MockProcessingUnit::new_success()),
            time: Arc::new(SystemTimeProvider),
            ids: Arc::new(SequentialIdProvider::new()),
            bus: StatusBus::new(settings.status_buffer),
            settings,
        });
        let config = RpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        RpcServer::new(config, Arc::new(JobManager::new(ctx)))
            .start()
            .await
            .unwrap()
    }

    fn create_params() -> serde_json::Value {
        json!({
            "config": {
                "name": "invoices",
                "source": { "type": "folder", "path": "/inbox" },
                "processing": { "mode": "once", "batch_size": 10 }
            }
        })
    }

    #[test]
    fn test_all_methods_registered() {
        let server = RpcServer::new(RpcServerConfig::default(), {
            let settings = EngineSettings::default();
            Arc::new(JobManager::new(Arc::new(EngineContext {
                store: Arc::new(InMemoryStore::new()),
                connector: Arc::new(MockSourceConnector::with_items(0)),
                processor: Arc::new(MockProcessingUnit::new_success()),
                time: Arc::new(SystemTimeProvider),
                ids: Arc::new(SequentialIdProvider::new()),
                bus: StatusBus::new(settings.status_buffer),
                settings,
            })))
        });
        let module = server.module().unwrap();
        let names: Vec<&str> = module.method_names().collect();
        for method in [
            "job.create.v1",
            "job.retry_failed.v1",
            "document.list.v1",
            "review.resolve.v1",
            "status.poll.v1",
            SUBSCRIBE_METHOD,
            UNSUBSCRIBE_METHOD,
        ] {
            assert!(names.contains(&method), "{method} missing");
        }
    }

    #[tokio::test]
    async fn test_http_round_trip() {
        let (addr, handle) = start_server().await;
        let client = HttpClientBuilder::default()
            .build(format!("http://{}", addr))
            .unwrap();

        let job: Job = client
            .request("job.create.v1", rpc_params![create_params()])
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let page: Page<Job> = client
            .request("job.list.v1", rpc_params![json!({ "page_size": 5 })])
            .await
            .unwrap();
        assert_eq!(page.data, vec![job.clone()]);

        let err = client
            .request::<Job, _>("job.get.v1", rpc_params![json!({ "job_id": "missing" })])
            .await
            .unwrap_err();
        match err {
            jsonrpsee::core::ClientError::Call(e) => {
                assert_eq!(e.code(), crate::error::code::NOT_FOUND)
            }
            other => panic!("unexpected {other:?}"),
        }

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_subscription_pushes_job_updates() {
        let (addr, handle) = start_server().await;
        let ws = WsClientBuilder::default()
            .build(format!("ws://{}", addr))
            .await
            .unwrap();

        let mut sub = ws
            .subscribe::<PushEvent, _>(
                SUBSCRIBE_METHOD,
                rpc_params![json!({ "scope": {} })],
                UNSUBSCRIBE_METHOD,
            )
            .await
            .unwrap();

        let job: Job = ws
            .request("job.create.v1", rpc_params![create_params()])
            .await
            .unwrap();

        match sub.next().await {
            Some(Ok(PushEvent::Message(StatusMessage::Job { entity, .. }))) => {
                assert_eq!(entity.id, job.id)
            }
            other => panic!("unexpected {other:?}"),
        }

        sub.unsubscribe().await.unwrap();
        handle.stop().unwrap();
    }
}
