// Source Connector Port
// Yields candidate items for a source configuration, one bounded batch at a time

use crate::domain::{Candidate, SourceConfig, SourceKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// One scan cycle's worth of candidates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanBatch {
    pub candidates: Vec<Candidate>,
    /// Continuation token for the next cycle
    pub next_token: Option<String>,
    /// No more items after this batch (for now)
    pub exhausted: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Cannot authenticate against the source; retrying items cannot help
    #[error("source authentication failed: {0}")]
    Auth(String),

    #[error("source misconfigured: {0}")]
    Config(String),

    /// Temporary outage, the next scan cycle tries again
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Errors that fail the whole job
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, SourceError::Auth(_) | SourceError::Config(_))
    }
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Request up to `limit` candidates following `token`
    async fn scan(
        &self,
        source: &SourceConfig,
        token: Option<&str>,
        limit: u32,
    ) -> Result<ScanBatch, SourceError>;
}

/// Routes each source kind to its registered connector
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<SourceKind, Arc<dyn SourceConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: SourceKind, connector: Arc<dyn SourceConnector>) -> Self {
        self.connectors.insert(kind, connector);
        self
    }
}

#[async_trait]
impl SourceConnector for ConnectorRegistry {
    async fn scan(
        &self,
        source: &SourceConfig,
        token: Option<&str>,
        limit: u32,
    ) -> Result<ScanBatch, SourceError> {
        let kind = source.kind();
        let connector = self.connectors.get(&kind).ok_or_else(|| {
            SourceError::Config(format!("no connector registered for '{}' sources", kind))
        })?;
        connector.scan(source, token, limit).await
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves a fixed list of refs in pages, tokens are offsets
    pub struct MockSourceConnector {
        items: Mutex<Vec<String>>,
        failure: Mutex<Option<SourceError>>,
        scan_delay: Mutex<Option<Duration>>,
        scans: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl MockSourceConnector {
        pub fn with_items(count: usize) -> Self {
            Self::with_refs((0..count).map(|i| format!("/inbox/doc-{:04}.pdf", i)))
        }

        pub fn with_refs<I, S>(refs: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                items: Mutex::new(refs.into_iter().map(Into::into).collect()),
                failure: Mutex::new(None),
                scan_delay: Mutex::new(None),
                scans: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(error: SourceError) -> Self {
            let connector = Self::with_items(0);
            connector.fail_with(Some(error));
            connector
        }

        /// Items appearing later, for continuous mode
        pub fn push_item(&self, source_ref: impl Into<String>) {
            self.items.lock().unwrap().push(source_ref.into());
        }

        pub fn fail_with(&self, error: Option<SourceError>) {
            *self.failure.lock().unwrap() = error;
        }

        /// Every scan takes `delay` before answering
        pub fn delay_scans(&self, delay: Duration) {
            *self.scan_delay.lock().unwrap() = Some(delay);
        }

        pub fn scan_count(&self) -> usize {
            self.scans.load(Ordering::SeqCst)
        }

        /// Number of candidates returned by each successful scan
        pub fn batch_sizes(&self) -> Vec<usize> {
            self.batch_sizes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceConnector for MockSourceConnector {
        async fn scan(
            &self,
            _source: &SourceConfig,
            token: Option<&str>,
            limit: u32,
        ) -> Result<ScanBatch, SourceError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            let delay = *self.scan_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = self.failure.lock().unwrap().clone() {
                return Err(error);
            }

            let items = self.items.lock().unwrap();
            let offset = token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
            let end = (offset + limit as usize).min(items.len());
            let candidates: Vec<Candidate> = items[offset.min(end)..end]
                .iter()
                .map(Candidate::new)
                .collect();
            self.batch_sizes.lock().unwrap().push(candidates.len());

            Ok(ScanBatch {
                candidates,
                next_token: Some(end.to_string()),
                exhausted: end >= items.len(),
            })
        }
    }
}
