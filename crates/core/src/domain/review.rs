// Review Queue Item - documents that exhausted automatic retries

use crate::domain::document::{DocumentId, ErrorKind, JobDocument};
use crate::domain::error::{DomainError, Result};
use crate::domain::job::{JobId, Priority};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type ReviewItemId = String;

/// Why a document was escalated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    MaxRetriesExceeded,
    TerminalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Open,
    Resolved,
}

/// How an item left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewResolution {
    /// Closed by an operator without reprocessing
    Closed,
    /// Document sent back to the scheduler
    Retried,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

str_enum!(ReviewReason {
    MaxRetriesExceeded => "max_retries_exceeded",
    TerminalError => "terminal_error",
});

str_enum!(ReviewStatus {
    Open => "open",
    Resolved => "resolved",
});

str_enum!(ReviewResolution {
    Closed => "closed",
    Retried => "retried",
});

/// Operator note attached to a review item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewNote {
    pub text: String,
    pub added_at: i64,
}

/// Review Queue Item Entity (at most one per document)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueueItem {
    pub id: ReviewItemId,
    pub document_id: DocumentId,
    pub job_id: JobId,
    pub source_ref: String,

    pub reason: ReviewReason,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: Priority,
    pub notes: Vec<ReviewNote>,

    pub status: ReviewStatus,
    pub resolution: Option<ReviewResolution>,

    pub created_at: i64,
    pub updated_at: i64,
    pub resolved_at: Option<i64>,
}

impl ReviewQueueItem {
    /// Build the item for a document that was just escalated
    pub fn escalated(
        id: impl Into<String>,
        document: &JobDocument,
        reason: ReviewReason,
        max_retries: u32,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            document_id: document.id.clone(),
            job_id: document.job_id.clone(),
            source_ref: document.source_ref.clone(),
            reason,
            error_kind: document.error_kind,
            error_message: document.last_error.clone(),
            retry_count: document.retry_count,
            max_retries,
            priority: document.priority,
            notes: Vec::new(),
            status: ReviewStatus::Open,
            resolution: None,
            created_at: now_millis,
            updated_at: now_millis,
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ReviewStatus::Open
    }

    pub fn add_note(&mut self, text: impl Into<String>, now_millis: i64) {
        self.notes.push(ReviewNote {
            text: text.into(),
            added_at: now_millis,
        });
        self.touch(now_millis);
    }

    /// Close the item. Resolved items never reopen.
    pub fn resolve(&mut self, resolution: ReviewResolution, now_millis: i64) -> Result<()> {
        if !self.is_open() {
            return Err(DomainError::InvalidStateTransition {
                from: format!("review {}", self.status),
                to: resolution.to_string(),
            });
        }
        self.status = ReviewStatus::Resolved;
        self.resolution = Some(resolution);
        self.resolved_at = Some(now_millis);
        self.touch(now_millis);
        Ok(())
    }

    fn touch(&mut self, now_millis: i64) {
        self.updated_at = self.updated_at.max(now_millis - 1) + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::DocumentStatus;

    fn escalated_item() -> ReviewQueueItem {
        let document = JobDocument {
            id: "doc-9".to_string(),
            job_id: "job-1".to_string(),
            source_ref: "/in/scan.tiff".to_string(),
            display_name: "scan.tiff".to_string(),
            size_bytes: None,
            status: DocumentStatus::NeedsReview,
            priority: 5,
            retry_count: 3,
            last_error: Some("unreadable page".to_string()),
            error_kind: Some(ErrorKind::Transient),
            processing_time_ms: Some(80),
            next_attempt_at: 0,
            enqueued_at: 0,
            created_at: 0,
            updated_at: 0,
            started_at: None,
            completed_at: None,
        };
        ReviewQueueItem::escalated("rev-1", &document, ReviewReason::MaxRetriesExceeded, 3, 1_000)
    }

    #[test]
    fn test_escalation_copies_failure_context() {
        let item = escalated_item();
        assert!(item.is_open());
        assert_eq!(item.priority, 5);
        assert_eq!(item.retry_count, 3);
        assert_eq!(item.max_retries, 3);
        assert_eq!(item.error_message.as_deref(), Some("unreadable page"));
    }

    #[test]
    fn test_resolve_once() {
        let mut item = escalated_item();
        item.add_note("checked by hand", 1_500);
        item.resolve(ReviewResolution::Closed, 2_000).unwrap();

        assert_eq!(item.status, ReviewStatus::Resolved);
        assert_eq!(item.resolution, Some(ReviewResolution::Closed));
        assert_eq!(item.notes.len(), 1);
        assert!(item.resolve(ReviewResolution::Retried, 3_000).is_err());
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(
            "terminal_error".parse::<ReviewReason>().unwrap(),
            ReviewReason::TerminalError
        );
        assert_eq!(ReviewResolution::Retried.to_string(), "retried");
        assert!("pending".parse::<ReviewStatus>().is_err());
    }
}
