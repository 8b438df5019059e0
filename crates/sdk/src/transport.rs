//! Remote status transports
//!
//! Implement the core `PushTransport` / `PollSource` ports over the daemon's
//! WebSocket subscription and `status.poll.v1`.

use crate::client::DocflowClient;
use crate::error::SdkError;
use crate::types::SubscribeRequest;
use async_trait::async_trait;
use docflow_core::domain::{PushEvent, StatusMessage, SyncScope};
use docflow_core::port::{PollSource, PushStream, PushTransport, TransportError};
use futures::StreamExt;
use jsonrpsee::core::client::{Subscription, SubscriptionClientT};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use tracing::debug;

const SUBSCRIBE_METHOD: &str = "status.subscribe.v1";
const UNSUBSCRIBE_METHOD: &str = "status.unsubscribe.v1";

/// One WebSocket connection per `connect`
pub struct RpcPushTransport {
    ws_url: String,
}

impl RpcPushTransport {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

/// The client must outlive the subscription, its background task drives the socket
struct Connection {
    _client: WsClient,
    subscription: Subscription<PushEvent>,
}

#[async_trait]
impl PushTransport for RpcPushTransport {
    async fn connect(&self, scope: &SyncScope) -> Result<PushStream, TransportError> {
        let client = WsClientBuilder::default()
            .build(&self.ws_url)
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let mut params = ArrayParams::new();
        params
            .insert(SubscribeRequest { scope })
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let subscription = client
            .subscribe::<PushEvent, _>(SUBSCRIBE_METHOD, params, UNSUBSCRIBE_METHOD)
            .await
            .map_err(|e| TransportError::from(SdkError::from(e)))?;
        debug!(url = %self.ws_url, "Status subscription established");

        let connection = Connection {
            _client: client,
            subscription,
        };

        // Ends after the first malformed frame or when the server closes
        Ok(futures::stream::unfold(Some(connection), |state| async move {
            let mut connection = state?;
            match connection.subscription.next().await? {
                Ok(event) => Some((Ok(event), Some(connection))),
                Err(e) => Some((Err(TransportError::Protocol(e.to_string())), None)),
            }
        })
        .boxed())
    }
}

/// `status.poll.v1` over the client's HTTP connection
pub struct RpcPollSource {
    client: DocflowClient,
}

impl RpcPollSource {
    pub fn new(client: DocflowClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PollSource for RpcPollSource {
    async fn poll(
        &self,
        scope: &SyncScope,
        since: i64,
    ) -> Result<Vec<StatusMessage>, TransportError> {
        let response = self.client.poll(scope, since).await?;
        Ok(response.messages)
    }
}
