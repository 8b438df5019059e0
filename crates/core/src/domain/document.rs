// Job Document - one discovered candidate item and its processing lifecycle

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{Job, JobId, Priority};
use crate::domain::review::{ReviewQueueItem, ReviewReason};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type DocumentId = String;

/// Document status
///
/// ```text
/// pending -> processing -> {completed, pending (retry), failed, needs_review, cancelled}
/// pending -> cancelled             (job stopped)
/// failed | needs_review -> pending (operator retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    NeedsReview,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::NeedsReview => "needs_review",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, to: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Pending)
                | (Processing, Failed)
                | (Processing, NeedsReview)
                | (Processing, Cancelled)
                | (Failed, Pending)
                | (NeedsReview, Pending)
        )
    }

    /// Pending or processing documents keep a `once` job from completing
    pub fn is_active(&self) -> bool {
        matches!(self, DocumentStatus::Pending | DocumentStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            "needs_review" => Ok(DocumentStatus::NeedsReview),
            "cancelled" => Ok(DocumentStatus::Cancelled),
            other => Err(format!("unknown document status '{}'", other)),
        }
    }
}

/// Classification of the last failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Terminal,
    Timeout,
    Panic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Terminal => "terminal",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Panic => "panic",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "transient" => Ok(ErrorKind::Transient),
            "terminal" => Ok(ErrorKind::Terminal),
            "timeout" => Ok(ErrorKind::Timeout),
            "panic" => Ok(ErrorKind::Panic),
            other => Err(format!("unknown error kind '{}'", other)),
        }
    }
}

/// An item reported by a source connector, not yet known to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_ref: String,
    pub display_name: String,
    pub size_bytes: Option<i64>,
}

impl Candidate {
    pub fn new(source_ref: impl Into<String>) -> Self {
        let source_ref = source_ref.into();
        let display_name = source_ref
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&source_ref)
            .to_string();
        Self {
            source_ref,
            display_name,
            size_bytes: None,
        }
    }
}

/// Job Document Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDocument {
    pub id: DocumentId,
    pub job_id: JobId,

    /// Connector-level identifier, unique per job (dedupe key)
    pub source_ref: String,
    pub display_name: String,
    pub size_bytes: Option<i64>,

    pub status: DocumentStatus,
    pub priority: Priority,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub processing_time_ms: Option<i64>,

    /// Earliest instant a retry may be claimed (epoch ms)
    pub next_attempt_at: i64,
    /// Tie-breaker for dequeue order within a priority
    pub enqueued_at: i64,

    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl JobDocument {
    /// A freshly discovered document, immediately claimable
    pub fn discovered(
        id: impl Into<String>,
        job: &Job,
        candidate: &Candidate,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job.id.clone(),
            source_ref: candidate.source_ref.clone(),
            display_name: candidate.display_name.clone(),
            size_bytes: candidate.size_bytes,
            status: DocumentStatus::Pending,
            priority: job.priority,
            retry_count: 0,
            last_error: None,
            error_kind: None,
            processing_time_ms: None,
            next_attempt_at: now_millis,
            enqueued_at: now_millis,
            created_at: now_millis,
            updated_at: now_millis,
            started_at: None,
            completed_at: None,
        }
    }

    fn move_to(&mut self, to: DocumentStatus, now_millis: i64) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidDocumentTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = self.updated_at.max(now_millis - 1) + 1;
        Ok(())
    }

    /// Exclusive claim by one worker (pending -> processing)
    pub fn claim(&mut self, now_millis: i64) -> Result<()> {
        self.move_to(DocumentStatus::Processing, now_millis)?;
        self.started_at = Some(now_millis);
        Ok(())
    }

    /// Apply the result of one processing attempt
    pub fn apply_outcome(&mut self, outcome: &DocumentOutcome, now_millis: i64) -> Result<()> {
        if self.status != DocumentStatus::Processing {
            return Err(DomainError::InvalidDocumentTransition {
                from: self.status.to_string(),
                to: outcome.status().to_string(),
            });
        }

        self.move_to(outcome.status(), now_millis)?;
        self.retry_count = outcome.retry_count;
        self.last_error = outcome.last_error.clone();
        self.error_kind = outcome.error_kind;
        self.processing_time_ms = Some(outcome.processing_time_ms);

        match outcome.kind {
            OutcomeKind::RetryScheduled { next_attempt_at } => {
                self.next_attempt_at = next_attempt_at;
                self.enqueued_at = now_millis;
                self.started_at = None;
            }
            _ => self.completed_at = Some(now_millis),
        }
        Ok(())
    }

    /// Stop cancels documents that never started
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        self.move_to(DocumentStatus::Cancelled, now_millis)?;
        self.completed_at = Some(now_millis);
        Ok(())
    }

    /// Operator retry: reset the retry budget and requeue
    pub fn requeue(&mut self, now_millis: i64) -> Result<()> {
        if !matches!(
            self.status,
            DocumentStatus::Failed | DocumentStatus::NeedsReview
        ) {
            return Err(DomainError::InvalidDocumentTransition {
                from: self.status.to_string(),
                to: DocumentStatus::Pending.to_string(),
            });
        }
        self.move_to(DocumentStatus::Pending, now_millis)?;
        self.retry_count = 0;
        self.next_attempt_at = now_millis;
        self.enqueued_at = now_millis;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// Crash recovery: an interrupted claim goes back to pending untouched
    pub fn release(&mut self, now_millis: i64) -> Result<()> {
        if self.status != DocumentStatus::Processing {
            return Err(DomainError::InvalidDocumentTransition {
                from: self.status.to_string(),
                to: DocumentStatus::Pending.to_string(),
            });
        }
        self.move_to(DocumentStatus::Pending, now_millis)?;
        self.next_attempt_at = now_millis;
        self.started_at = None;
        Ok(())
    }
}

/// Where a processed document ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    Completed,
    RetryScheduled { next_attempt_at: i64 },
    Failed,
    NeedsReview {
        review_id: String,
        reason: ReviewReason,
        max_retries: u32,
    },
    Cancelled,
}

/// Result of one processing attempt, recorded atomically by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentOutcome {
    pub kind: OutcomeKind,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub processing_time_ms: i64,
}

impl DocumentOutcome {
    pub fn completed(retry_count: u32, processing_time_ms: i64) -> Self {
        Self {
            kind: OutcomeKind::Completed,
            retry_count,
            last_error: None,
            error_kind: None,
            processing_time_ms,
        }
    }

    pub fn status(&self) -> DocumentStatus {
        match self.kind {
            OutcomeKind::Completed => DocumentStatus::Completed,
            OutcomeKind::RetryScheduled { .. } => DocumentStatus::Pending,
            OutcomeKind::Failed => DocumentStatus::Failed,
            OutcomeKind::NeedsReview { .. } => DocumentStatus::NeedsReview,
            OutcomeKind::Cancelled => DocumentStatus::Cancelled,
        }
    }
}

/// Everything one recorded outcome changed, for publication
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    pub document: JobDocument,
    pub job: Job,
    pub review: Option<ReviewQueueItem>,
}
