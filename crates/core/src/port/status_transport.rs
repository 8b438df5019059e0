// Status Transport Ports
// Two interchangeable ways of receiving status messages: a persistent push
// stream and a periodic pull

use crate::domain::{PushEvent, StatusMessage, SyncScope};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Push/poll transport failures. Handled inside the sync channel, never
/// surfaced as job errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport disconnected: {0}")]
    Disconnected(String),

    #[error("no heartbeat within {0:?}")]
    HeartbeatTimeout(std::time::Duration),

    #[error("subscriber lagged, {0} messages dropped")]
    Lagged(u64),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("malformed frame: {0}")]
    Protocol(String),
}

pub type PushStream = BoxStream<'static, Result<PushEvent, TransportError>>;

/// Persistent event-driven subscription
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, scope: &SyncScope) -> Result<PushStream, TransportError>;
}

/// Periodic pull of the three resources
#[async_trait]
pub trait PollSource: Send + Sync {
    /// Messages for entities with `updated_at >= since`, oldest first
    async fn poll(&self, scope: &SyncScope, since: i64)
        -> Result<Vec<StatusMessage>, TransportError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Push transport driven by the test through per-connection senders
    #[derive(Default)]
    pub struct ScriptedPushTransport {
        refuse: AtomicBool,
        attempts: AtomicUsize,
        senders: Mutex<Vec<mpsc::UnboundedSender<Result<PushEvent, TransportError>>>>,
    }

    impl ScriptedPushTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent `connect` calls fail
        pub fn refuse_connections(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }

        pub fn connect_attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        /// Deliver an event on the most recent connection
        pub fn emit(&self, event: Result<PushEvent, TransportError>) -> bool {
            self.senders
                .lock()
                .unwrap()
                .last()
                .map(|tx| tx.send(event).is_ok())
                .unwrap_or(false)
        }

        /// Close every open connection (stream ends)
        pub fn drop_connections(&self) {
            self.senders.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedPushTransport {
        async fn connect(&self, _scope: &SyncScope) -> Result<PushStream, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Unavailable("connection refused".to_string()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().push(tx);
            Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed())
        }
    }

    /// Poll source returning queued responses, then empty results
    #[derive(Default)]
    pub struct ScriptedPollSource {
        responses: Mutex<VecDeque<Vec<StatusMessage>>>,
        calls: Mutex<Vec<i64>>,
    }

    impl ScriptedPollSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue(&self, messages: Vec<StatusMessage>) {
            self.responses.lock().unwrap().push_back(messages);
        }

        pub fn poll_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// `since` values passed to each poll
        pub fn since_values(&self) -> Vec<i64> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PollSource for ScriptedPollSource {
        async fn poll(
            &self,
            _scope: &SyncScope,
            since: i64,
        ) -> Result<Vec<StatusMessage>, TransportError> {
            self.calls.lock().unwrap().push(since);
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }
    }
}
