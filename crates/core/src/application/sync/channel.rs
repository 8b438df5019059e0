// Sync Channel - push subscription with automatic polling fallback
//
// Exactly one transport is active at a time. A push error, a closed stream
// or a missed heartbeat degrades to polling; after the cooldown the push
// transport is tried again.

use crate::domain::{EntityKey, PushEvent, StatusMessage, SyncScope};
use crate::port::{PollSource, PushStream, PushTransport, TransportError};
use crate::settings::SyncSettings;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const OUTBOX_CAPACITY: usize = 256;

/// Transport currently delivering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Connecting,
    Push,
    Polling,
    /// Push forced but unreachable; waiting for the next reconnect attempt
    Offline,
}

/// Manual transport selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportOverride {
    /// Push with polling fallback
    #[default]
    Auto,
    /// Push only; never polls
    ForcePush,
    /// Polling only; never attempts push
    ForcePolling,
}

/// Consumer side of the synchronization channel
///
/// Messages arrive deduplicated: each `(kind, id)` is forwarded only when its
/// `updated_at` is strictly newer than the last one forwarded.
pub struct SyncSubscription {
    messages: mpsc::Receiver<StatusMessage>,
    mode: watch::Receiver<TransportMode>,
    overrides: watch::Sender<TransportOverride>,
    task: JoinHandle<()>,
}

impl SyncSubscription {
    /// Start the channel driver
    ///
    /// # Arguments
    /// * `since` - Epoch millis the consumer is already up to date with
    pub fn spawn(
        push: Arc<dyn PushTransport>,
        poll: Arc<dyn PollSource>,
        scope: SyncScope,
        settings: SyncSettings,
        since: i64,
    ) -> Self {
        let (out, messages) = mpsc::channel(OUTBOX_CAPACITY);
        let (mode_tx, mode) = watch::channel(TransportMode::Connecting);
        let (overrides, override_rx) = watch::channel(TransportOverride::Auto);

        let driver = Driver {
            push,
            poll,
            scope,
            settings,
            out,
            mode: mode_tx,
            overrides: override_rx,
            last_seen: HashMap::new(),
            since,
            next_poll: Instant::now(),
        };
        let task = tokio::spawn(driver.run());

        Self {
            messages,
            mode,
            overrides,
            task,
        }
    }

    /// Next message; `None` once the driver has stopped
    pub async fn recv(&mut self) -> Option<StatusMessage> {
        self.messages.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StatusMessage> {
        self.messages.try_recv().ok()
    }

    pub fn mode(&self) -> TransportMode {
        *self.mode.borrow()
    }

    /// Watch transport switches
    pub fn mode_changes(&self) -> watch::Receiver<TransportMode> {
        self.mode.clone()
    }

    pub fn set_override(&self, value: TransportOverride) {
        self.overrides.send_replace(value);
    }

    pub fn force_push(&self) {
        self.set_override(TransportOverride::ForcePush);
    }

    pub fn force_polling(&self) {
        self.set_override(TransportOverride::ForcePolling);
    }

    /// Back to automatic failover
    pub fn auto(&self) {
        self.set_override(TransportOverride::Auto);
    }

    pub fn close(self) {
        self.task.abort();
    }
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum PushEnd {
    Failed(TransportError),
    Overridden,
    ConsumerGone,
}

enum PollEnd {
    /// Cooldown elapsed, try push again
    Reconnect,
    Overridden,
    ConsumerGone,
}

struct Driver {
    push: Arc<dyn PushTransport>,
    poll: Arc<dyn PollSource>,
    scope: SyncScope,
    settings: SyncSettings,
    out: mpsc::Sender<StatusMessage>,
    mode: watch::Sender<TransportMode>,
    overrides: watch::Receiver<TransportOverride>,
    last_seen: HashMap<EntityKey, i64>,
    /// High-water mark handed to the poll source
    since: i64,
    next_poll: Instant,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let selected = *self.overrides.borrow_and_update();

            let end = match selected {
                TransportOverride::ForcePolling => self.run_polling(None).await,
                TransportOverride::Auto | TransportOverride::ForcePush => {
                    match self.connect().await {
                        Ok(stream) => match self.run_push(stream).await {
                            PushEnd::Failed(e) => {
                                warn!(error = %e, "Push channel lost");
                            }
                            PushEnd::Overridden => continue,
                            PushEnd::ConsumerGone => return,
                        },
                        Err(e) => warn!(error = %e, "Push connect failed"),
                    }

                    let cooldown = Instant::now() + self.settings.reconnect_cooldown();
                    if selected == TransportOverride::ForcePush {
                        self.wait_offline(cooldown).await
                    } else {
                        self.run_polling(Some(cooldown)).await
                    }
                }
            };

            match end {
                PollEnd::Reconnect | PollEnd::Overridden => {}
                PollEnd::ConsumerGone => return,
            }
        }
    }

    fn set_mode(&self, mode: TransportMode) {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            info!(from = ?previous, to = ?mode, "Sync transport switched");
        }
    }

    async fn connect(&mut self) -> Result<PushStream, TransportError> {
        if *self.mode.borrow() != TransportMode::Polling {
            self.set_mode(TransportMode::Connecting);
        }
        self.push.connect(&self.scope).await
    }

    /// Forward push events until the stream fails, the heartbeat lapses or
    /// the override moves away from push
    async fn run_push(&mut self, mut stream: PushStream) -> PushEnd {
        self.set_mode(TransportMode::Push);
        let timeout = self.settings.heartbeat_timeout();

        loop {
            tokio::select! {
                _ = self.out.closed() => return PushEnd::ConsumerGone,
                changed = self.overrides.changed() => {
                    if changed.is_err() {
                        return PushEnd::ConsumerGone;
                    }
                    if *self.overrides.borrow_and_update() == TransportOverride::ForcePolling {
                        return PushEnd::Overridden;
                    }
                }
                next = tokio::time::timeout(timeout, stream.next()) => match next {
                    Err(_) => return PushEnd::Failed(TransportError::HeartbeatTimeout(timeout)),
                    Ok(None) => {
                        return PushEnd::Failed(TransportError::Disconnected("stream ended".to_string()))
                    }
                    Ok(Some(Err(e))) => return PushEnd::Failed(e),
                    Ok(Some(Ok(PushEvent::Heartbeat { .. }))) => {}
                    Ok(Some(Ok(PushEvent::Message(message)))) => {
                        if !self.forward(message).await {
                            return PushEnd::ConsumerGone;
                        }
                    }
                },
            }
        }
    }

    /// Poll on a fixed interval
    ///
    /// `reconnect_at = None` polls until the override changes.
    async fn run_polling(&mut self, reconnect_at: Option<Instant>) -> PollEnd {
        if *self.mode.borrow() != TransportMode::Polling {
            // Entering polling mode: catch up right away
            self.next_poll = Instant::now();
            self.set_mode(TransportMode::Polling);
        }
        let started_as = *self.overrides.borrow();

        loop {
            let reconnect = async {
                match reconnect_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.out.closed() => return PollEnd::ConsumerGone,
                changed = self.overrides.changed() => {
                    if changed.is_err() {
                        return PollEnd::ConsumerGone;
                    }
                    if *self.overrides.borrow_and_update() != started_as {
                        return PollEnd::Overridden;
                    }
                }
                _ = reconnect => {
                    debug!("Reconnect cooldown elapsed");
                    return PollEnd::Reconnect;
                }
                _ = tokio::time::sleep_until(self.next_poll) => {
                    self.next_poll = Instant::now() + self.settings.poll_interval();
                    if !self.poll_once().await {
                        return PollEnd::ConsumerGone;
                    }
                }
            }
        }
    }

    /// Forced push with the transport down: no messages until the cooldown
    async fn wait_offline(&mut self, reconnect_at: Instant) -> PollEnd {
        self.set_mode(TransportMode::Offline);
        loop {
            tokio::select! {
                _ = self.out.closed() => return PollEnd::ConsumerGone,
                changed = self.overrides.changed() => {
                    if changed.is_err() {
                        return PollEnd::ConsumerGone;
                    }
                    if *self.overrides.borrow_and_update() != TransportOverride::ForcePush {
                        return PollEnd::Overridden;
                    }
                }
                _ = tokio::time::sleep_until(reconnect_at) => return PollEnd::Reconnect,
            }
        }
    }

    async fn poll_once(&mut self) -> bool {
        match self.poll.poll(&self.scope, self.since).await {
            Ok(messages) => {
                debug!(count = messages.len(), since = self.since, "Polled status");
                for message in messages {
                    if !self.forward(message).await {
                        return false;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Status poll failed"),
        }
        true
    }

    /// Deliver a message unless an equal or newer version was already
    /// delivered. Returns `false` when the consumer is gone.
    async fn forward(&mut self, message: StatusMessage) -> bool {
        if !self.scope.matches(&message) {
            return true;
        }
        let updated_at = message.updated_at();
        let key = message.key();
        if self
            .last_seen
            .get(&key)
            .is_some_and(|seen| *seen >= updated_at)
        {
            return true;
        }

        self.last_seen.insert(key, updated_at);
        self.since = self.since.max(updated_at);
        self.out.send(message).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        JobConfig, JobOptions, NotificationConfig, ProcessingConfig, ProcessingMode, SourceConfig,
    };
    use crate::domain::Job;
    use crate::port::mocks::{ScriptedPollSource, ScriptedPushTransport};
    use std::time::Duration;

    fn job(id: &str, updated_at: i64) -> Job {
        let config = JobConfig {
            name: "scans".to_string(),
            source: SourceConfig::Folder {
                path: "/scans".to_string(),
                recursive: true,
                file_types: vec![],
            },
            processing: ProcessingConfig {
                mode: ProcessingMode::Once,
                batch_size: 10,
            },
            options: JobOptions::default(),
            notifications: NotificationConfig::default(),
        };
        let mut job = Job::new(id, 0, config);
        job.updated_at = updated_at;
        job
    }

    fn message(id: &str, updated_at: i64) -> StatusMessage {
        StatusMessage::job(&job(id, updated_at))
    }

    struct Fixture {
        push: Arc<ScriptedPushTransport>,
        poll: Arc<ScriptedPollSource>,
        subscription: SyncSubscription,
    }

    fn fixture(scope: SyncScope) -> Fixture {
        let push = Arc::new(ScriptedPushTransport::new());
        let poll = Arc::new(ScriptedPollSource::new());
        let subscription = SyncSubscription::spawn(
            push.clone(),
            poll.clone(),
            scope,
            SyncSettings::default(),
            0,
        );
        Fixture {
            push,
            poll,
            subscription,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_delivers_and_dedupes() {
        let mut f = fixture(SyncScope::all());
        settle().await;
        assert_eq!(f.subscription.mode(), TransportMode::Push);

        f.push.emit(Ok(PushEvent::Message(message("job-1", 10))));
        f.push.emit(Ok(PushEvent::Message(message("job-1", 10))));
        f.push.emit(Ok(PushEvent::Message(message("job-1", 9))));
        f.push.emit(Ok(PushEvent::Message(message("job-1", 11))));
        settle().await;

        assert_eq!(f.subscription.try_recv().map(|m| m.updated_at()), Some(10));
        assert_eq!(f.subscription.try_recv().map(|m| m.updated_at()), Some(11));
        assert!(f.subscription.try_recv().is_none());
        assert_eq!(f.poll.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_error_switches_to_polling_before_next_heartbeat() {
        let mut f = fixture(SyncScope::all());
        settle().await;
        f.push.emit(Ok(PushEvent::Message(message("job-1", 10))));
        settle().await;
        assert!(f.subscription.try_recv().is_some());

        f.push.refuse_connections(true);
        f.poll.queue(vec![message("job-1", 10), message("job-1", 12)]);
        f.push
            .emit(Err(TransportError::Disconnected("socket reset".to_string())));
        settle().await;

        let settings = SyncSettings::default();
        assert_eq!(f.subscription.mode(), TransportMode::Polling);
        assert_eq!(f.poll.poll_count(), 1, "polls immediately on degrade");
        assert_eq!(f.poll.since_values(), vec![10]);
        assert!(Duration::from_millis(1) < settings.heartbeat_interval());

        // Switchover duplicate (10) is dropped, the newer version passes
        assert_eq!(f.subscription.try_recv().map(|m| m.updated_at()), Some(12));
        assert!(f.subscription.try_recv().is_none());

        // Then every poll interval
        tokio::time::sleep(settings.poll_interval()).await;
        assert_eq!(f.poll.poll_count(), 2);
        assert_eq!(f.push.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_only_after_cooldown() {
        let f = fixture(SyncScope::all());
        settle().await;
        let cooldown = SyncSettings::default().reconnect_cooldown();

        f.push.refuse_connections(true);
        f.push.drop_connections();
        settle().await;
        assert_eq!(f.subscription.mode(), TransportMode::Polling);

        tokio::time::sleep(cooldown - Duration::from_secs(2)).await;
        assert_eq!(f.push.connect_attempts(), 1);

        // Refused: stays polling and waits another full cooldown
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(f.push.connect_attempts(), 2);
        assert_eq!(f.subscription.mode(), TransportMode::Polling);

        f.push.refuse_connections(false);
        tokio::time::sleep(cooldown - Duration::from_secs(2)).await;
        assert_eq!(f.push.connect_attempts(), 2);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(f.push.connect_attempts(), 3);
        assert_eq!(f.subscription.mode(), TransportMode::Push);

        // Polling stopped once push is back
        let polls = f.poll.poll_count();
        tokio::time::sleep(SyncSettings::default().poll_interval() * 3).await;
        assert_eq!(f.poll.poll_count(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_heartbeat_counts_as_disconnect() {
        let f = fixture(SyncScope::all());
        settle().await;
        let settings = SyncSettings::default();

        tokio::time::sleep(settings.heartbeat_timeout() - Duration::from_secs(1)).await;
        f.push.emit(Ok(PushEvent::Heartbeat { at: 1 }));
        tokio::time::sleep(settings.heartbeat_timeout() - Duration::from_secs(1)).await;
        assert_eq!(f.subscription.mode(), TransportMode::Push);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.subscription.mode(), TransportMode::Polling);
        assert_eq!(f.poll.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_polling_never_connects() {
        let f = fixture(SyncScope::all());
        settle().await;
        assert_eq!(f.push.connect_attempts(), 1);

        f.subscription.force_polling();
        settle().await;
        assert_eq!(f.subscription.mode(), TransportMode::Polling);

        tokio::time::sleep(SyncSettings::default().reconnect_cooldown() * 3).await;
        assert_eq!(f.push.connect_attempts(), 1);
        assert!(f.poll.poll_count() > 30);

        f.subscription.auto();
        settle().await;
        assert_eq!(f.push.connect_attempts(), 2);
        assert_eq!(f.subscription.mode(), TransportMode::Push);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_push_never_polls() {
        let f = fixture(SyncScope::all());
        f.subscription.force_push();
        settle().await;

        f.push.refuse_connections(true);
        f.push.drop_connections();
        settle().await;
        assert_eq!(f.subscription.mode(), TransportMode::Offline);

        tokio::time::sleep(SyncSettings::default().reconnect_cooldown() + Duration::from_secs(1))
            .await;
        assert_eq!(f.poll.poll_count(), 0);
        assert_eq!(f.push.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_filters_other_jobs() {
        let mut f = fixture(SyncScope::jobs(["job-1"]));
        settle().await;
        f.push.emit(Ok(PushEvent::Message(message("job-2", 5))));
        f.push.emit(Ok(PushEvent::Message(message("job-1", 6))));
        settle().await;

        let received = f.subscription.try_recv().unwrap();
        assert_eq!(received.entity_id(), "job-1");
        assert!(f.subscription.try_recv().is_none());
    }
}
