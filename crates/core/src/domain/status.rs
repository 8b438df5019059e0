// Status messages published on the synchronization channel

use crate::domain::document::JobDocument;
use crate::domain::job::{Job, JobId};
use crate::domain::review::ReviewQueueItem;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Document,
    Review,
}

/// `{kind, entity, updated_at}` change notification
///
/// Consumers apply a message only when `updated_at` is strictly newer than
/// what they already hold for the same `(kind, entity id)`, which makes
/// duplicate delivery harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusMessage {
    Job { entity: Job, updated_at: i64 },
    Document { entity: JobDocument, updated_at: i64 },
    Review { entity: ReviewQueueItem, updated_at: i64 },
}

impl StatusMessage {
    pub fn job(job: &Job) -> Self {
        StatusMessage::Job {
            updated_at: job.updated_at,
            entity: job.clone(),
        }
    }

    pub fn document(document: &JobDocument) -> Self {
        StatusMessage::Document {
            updated_at: document.updated_at,
            entity: document.clone(),
        }
    }

    pub fn review(item: &ReviewQueueItem) -> Self {
        StatusMessage::Review {
            updated_at: item.updated_at,
            entity: item.clone(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            StatusMessage::Job { .. } => EntityKind::Job,
            StatusMessage::Document { .. } => EntityKind::Document,
            StatusMessage::Review { .. } => EntityKind::Review,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            StatusMessage::Job { entity, .. } => &entity.id,
            StatusMessage::Document { entity, .. } => &entity.id,
            StatusMessage::Review { entity, .. } => &entity.id,
        }
    }

    pub fn updated_at(&self) -> i64 {
        match self {
            StatusMessage::Job { updated_at, .. }
            | StatusMessage::Document { updated_at, .. }
            | StatusMessage::Review { updated_at, .. } => *updated_at,
        }
    }

    /// Owning job, used for scoping
    pub fn job_id(&self) -> &str {
        match self {
            StatusMessage::Job { entity, .. } => &entity.id,
            StatusMessage::Document { entity, .. } => &entity.job_id,
            StatusMessage::Review { entity, .. } => &entity.job_id,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            kind: self.kind(),
            id: self.entity_id().to_string(),
        }
    }
}

/// Identity used for "strictly newer" dedupe
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

/// The jobs a dashboard cares about. Empty means every job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    #[serde(default)]
    pub job_ids: Vec<JobId>,
}

impl SyncScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn jobs<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            job_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn includes_job(&self, job_id: &str) -> bool {
        self.job_ids.is_empty() || self.job_ids.iter().any(|id| id == job_id)
    }

    pub fn matches(&self, message: &StatusMessage) -> bool {
        self.includes_job(message.job_id())
    }
}

/// Frame delivered by a push transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    Message(StatusMessage),
    /// Liveness signal; a silent push channel is treated as disconnected
    Heartbeat { at: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{
        JobConfig, JobOptions, NotificationConfig, ProcessingConfig, ProcessingMode, SourceConfig,
    };

    fn job(id: &str) -> Job {
        let config = JobConfig {
            name: "n".to_string(),
            source: SourceConfig::Cloud {
                provider: crate::domain::config::CloudProvider::Dropbox,
                folder_id: "f".to_string(),
                credentials_ref: None,
            },
            processing: ProcessingConfig {
                mode: ProcessingMode::Continuous,
                batch_size: 5,
            },
            options: JobOptions::default(),
            notifications: NotificationConfig::default(),
        };
        Job::new(id, 42, config)
    }

    #[test]
    fn test_message_wire_shape() {
        let message = StatusMessage::job(&job("job-1"));
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["kind"], "job");
        assert_eq!(value["updated_at"], 42);
        assert_eq!(value["entity"]["id"], "job-1");

        let back: StatusMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back.key(), message.key());
    }

    #[test]
    fn test_scope_filters_by_job() {
        let message = StatusMessage::job(&job("job-2"));
        assert!(SyncScope::all().matches(&message));
        assert!(SyncScope::jobs(["job-2"]).matches(&message));
        assert!(!SyncScope::jobs(["job-1"]).matches(&message));
    }

    #[test]
    fn test_push_event_tagging() {
        let heartbeat = serde_json::to_value(PushEvent::Heartbeat { at: 7 }).unwrap();
        assert_eq!(heartbeat, serde_json::json!({"event": "heartbeat", "at": 7}));

        let event = PushEvent::Message(StatusMessage::job(&job("job-3")));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "message");
        assert_eq!(value["kind"], "job");
        let back: PushEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
