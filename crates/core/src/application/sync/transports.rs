// In-process status transports over the bus and the store
//
// Used directly by embedded consumers and by the RPC server, which relays
// them to remote dashboards.

use crate::application::sync::StatusBus;
use crate::domain::{Job, JobDocument, PushEvent, ReviewQueueItem, StatusMessage, SyncScope};
use crate::port::{PollSource, PushStream, PushTransport, Store, TimeProvider, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, Interval};

/// Push transport reading the status bus, with periodic heartbeats
pub struct BusPushTransport {
    bus: StatusBus,
    time: Arc<dyn TimeProvider>,
    heartbeat_interval: Duration,
}

impl BusPushTransport {
    pub fn new(bus: StatusBus, time: Arc<dyn TimeProvider>, heartbeat_interval: Duration) -> Self {
        Self {
            bus,
            time,
            heartbeat_interval,
        }
    }
}

struct BusStream {
    rx: broadcast::Receiver<StatusMessage>,
    ticker: Interval,
    scope: SyncScope,
    time: Arc<dyn TimeProvider>,
}

impl BusStream {
    async fn next_event(&mut self) -> Result<PushEvent, TransportError> {
        loop {
            tokio::select! {
                _ = self.ticker.tick() => {
                    return Ok(PushEvent::Heartbeat { at: self.time.now_millis() });
                }
                received = self.rx.recv() => match received {
                    Ok(message) if self.scope.matches(&message) => {
                        return Ok(PushEvent::Message(message));
                    }
                    Ok(_) => {}
                    // The consumer repairs the gap by polling
                    Err(RecvError::Lagged(skipped)) => return Err(TransportError::Lagged(skipped)),
                    Err(RecvError::Closed) => {
                        return Err(TransportError::Disconnected("status bus closed".to_string()))
                    }
                },
            }
        }
    }
}

#[async_trait]
impl PushTransport for BusPushTransport {
    async fn connect(&self, scope: &SyncScope) -> Result<PushStream, TransportError> {
        let start = Instant::now() + self.heartbeat_interval;
        let state = BusStream {
            rx: self.bus.subscribe(),
            ticker: tokio::time::interval_at(start, self.heartbeat_interval),
            scope: scope.clone(),
            time: Arc::clone(&self.time),
        };

        // The stream ends after the first error
        Ok(futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            match state.next_event().await {
                Ok(event) => Some((Ok(event), Some(state))),
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed())
    }
}

/// Poll source reading the three resources from the store
///
/// Each resource is read oldest first and capped separately. When a cap cuts
/// a resource short, the merged result stops at that resource's last
/// timestamp so the consumer's next `since` cannot jump past unread rows.
pub struct StorePollSource {
    store: Arc<dyn Store>,
    limit: u32,
}

impl StorePollSource {
    /// `limit` caps each resource per poll
    pub fn new(store: Arc<dyn Store>, limit: u32) -> Self {
        Self {
            store,
            limit: limit.max(1),
        }
    }

    pub async fn collect(
        &self,
        scope: &SyncScope,
        since: i64,
    ) -> crate::error::Result<Vec<StatusMessage>> {
        let (jobs, jobs_cut) = window(
            self.limit,
            |j: &Job| j.updated_at,
            |limit| self.store.jobs_updated_since(scope, since, limit),
        )
        .await?;
        let (documents, documents_cut) = window(
            self.limit,
            |d: &JobDocument| d.updated_at,
            |limit| self.store.documents_updated_since(scope, since, limit),
        )
        .await?;
        let (reviews, reviews_cut) = window(
            self.limit,
            |r: &ReviewQueueItem| r.updated_at,
            |limit| self.store.reviews_updated_since(scope, since, limit),
        )
        .await?;

        let horizon = [jobs_cut, documents_cut, reviews_cut]
            .into_iter()
            .flatten()
            .min();

        let mut messages: Vec<StatusMessage> = jobs
            .iter()
            .map(StatusMessage::job)
            .chain(documents.iter().map(StatusMessage::document))
            .chain(reviews.iter().map(StatusMessage::review))
            .filter(|m| horizon.map_or(true, |h| m.updated_at() <= h))
            .collect();
        messages.sort_by_key(|m| m.updated_at());
        Ok(messages)
    }
}

/// Fetch up to `limit` rows and report the timestamp the batch is complete
/// up to when the cap cut it short.
///
/// Rows sharing the cut timestamp are re-read on the next poll (`>= since`).
/// A full batch on one timestamp would never advance, so it is widened.
async fn window<T, F, Fut>(
    limit: u32,
    updated_at: fn(&T) -> i64,
    fetch: F,
) -> crate::error::Result<(Vec<T>, Option<i64>)>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = crate::error::Result<Vec<T>>>,
{
    let mut limit = limit;
    loop {
        let rows = fetch(limit).await?;
        if rows.len() < limit as usize {
            return Ok((rows, None));
        }
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            return Ok((rows, None));
        };
        let (first, last) = (updated_at(first), updated_at(last));
        if first < last || limit == u32::MAX {
            return Ok((rows, Some(last)));
        }
        limit = limit.saturating_mul(2);
    }
}

#[async_trait]
impl PollSource for StorePollSource {
    async fn poll(
        &self,
        scope: &SyncScope,
        since: i64,
    ) -> Result<Vec<StatusMessage>, TransportError> {
        self.collect(scope, since)
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::sync::SyncSubscription;
    use crate::application::test_support::{folder_config, Harness};
    use crate::domain::{DocumentStatus, EntityKind, JobStatus, ProcessingMode};
    use crate::port::mocks::{
        ManualTimeProvider, MockBehavior, MockProcessingUnit, MockSourceConnector,
        ScriptedPushTransport,
    };
    use crate::settings::SyncSettings;
    use std::collections::HashMap;

    /// Run a six-document job to completion on one worker
    async fn drained_job(behavior: MockBehavior) -> (Harness, Job) {
        let h = Harness::new(
            MockSourceConnector::with_items(6),
            MockProcessingUnit::new(behavior),
        );
        let manager = h.manager();
        let mut config = folder_config(ProcessingMode::Once, 10);
        config.options.parallel_workers = 1;
        let job = manager.create_job(config).await.unwrap();
        manager.start_job(&job.id).await.unwrap();
        manager.join(&job.id).await;
        let job = manager.get_job(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        (h, job)
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_stream_scopes_and_heartbeats() {
        let h = Harness::default();
        let manager = h.manager();
        let transport = BusPushTransport::new(
            h.ctx.bus.clone(),
            Arc::new(ManualTimeProvider::new(77)),
            Duration::from_secs(15),
        );

        let mine = manager
            .create_job(folder_config(ProcessingMode::Once, 5))
            .await
            .unwrap();
        let mut stream = transport
            .connect(&SyncScope::jobs([mine.id.clone()]))
            .await
            .unwrap();

        manager
            .create_job(folder_config(ProcessingMode::Once, 5))
            .await
            .unwrap();
        manager.cancel_job(&mine.id).await.unwrap();

        match stream.next().await {
            Some(Ok(PushEvent::Message(message))) => {
                assert_eq!(message.entity_id(), mine.id);
                assert_eq!(message.kind(), EntityKind::Job);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            stream.next().await,
            Some(Ok(PushEvent::Heartbeat { at: 77 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagged_subscriber_gets_error_then_end() {
        let bus = StatusBus::new(2);
        let transport = BusPushTransport::new(
            bus.clone(),
            Arc::new(ManualTimeProvider::new(0)),
            Duration::from_secs(15),
        );
        let mut stream = transport.connect(&SyncScope::all()).await.unwrap();

        let h = Harness::default();
        let job = h
            .manager()
            .create_job(folder_config(ProcessingMode::Once, 5))
            .await
            .unwrap();
        for _ in 0..5 {
            bus.publish_job(&job);
        }

        assert!(matches!(
            stream.next().await,
            Some(Err(TransportError::Lagged(3)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_poll_merges_resources_oldest_first() {
        let h = Harness::default();
        let manager = h.manager();
        let first = manager
            .create_job(folder_config(ProcessingMode::Once, 5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = manager
            .create_job(folder_config(ProcessingMode::Once, 5))
            .await
            .unwrap();

        let source = StorePollSource::new(h.ctx.store.clone(), 100);
        let all = source.poll(&SyncScope::all(), 0).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|m| m.entity_id()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);

        let newer = source
            .poll(&SyncScope::all(), second.updated_at)
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);

        let scoped = source
            .poll(&SyncScope::jobs([first.id.clone()]), 0)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_poll_stops_at_a_truncated_resource() {
        let (h, job) = drained_job(MockBehavior::Delay(Duration::from_millis(5))).await;
        let source = StorePollSource::new(h.ctx.store.clone(), 2);

        // The job row is newer than the two oldest documents and must wait
        let first = source.collect(&SyncScope::all(), 0).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|m| m.kind() == EntityKind::Document));
        assert!(first.iter().all(|m| m.updated_at() < job.updated_at));

        let since = first.iter().map(|m| m.updated_at()).max().unwrap();
        let next = source.collect(&SyncScope::all(), since).await.unwrap();
        assert!(next.iter().all(|m| m.updated_at() >= since));
        assert!(next.iter().any(|m| !first.contains(m)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_delivers_a_backlog_larger_than_the_limit() {
        // Distinct timestamps, then every document on the same millisecond
        for behavior in [
            MockBehavior::Delay(Duration::from_millis(5)),
            MockBehavior::Success,
        ] {
            let (h, job) = drained_job(behavior).await;
            let push = Arc::new(ScriptedPushTransport::new());
            push.refuse_connections(true);
            let mut updates = SyncSubscription::spawn(
                push,
                Arc::new(StorePollSource::new(h.ctx.store.clone(), 2)),
                SyncScope::jobs([job.id.clone()]),
                SyncSettings::default(),
                0,
            );
            tokio::time::sleep(Duration::from_secs(60)).await;

            let mut documents = HashMap::new();
            let mut job_status = None;
            while let Some(message) = updates.try_recv() {
                match message {
                    StatusMessage::Document { entity, .. } => {
                        documents.insert(entity.id.clone(), entity.status);
                    }
                    StatusMessage::Job { entity, .. } => job_status = Some(entity.status),
                    _ => {}
                }
            }
            assert_eq!(documents.len(), 6);
            assert!(documents.values().all(|s| *s == DocumentStatus::Completed));
            assert_eq!(job_status, Some(JobStatus::Completed));
            updates.close();
        }
    }
}
