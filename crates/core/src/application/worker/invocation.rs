// Invocation - one processing call with timeout and panic isolation

use crate::application::context::EngineContext;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::application::worker::{ControlToken, RunState};
use crate::domain::{DocumentOutcome, DocumentStatus, ErrorKind, JobDocument, OutcomeKind};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why an attempt did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

pub(crate) struct Invocation {
    pub ctx: Arc<EngineContext>,
    pub policy: Arc<RetryPolicy>,
    pub timeout: Option<Duration>,
    pub control: ControlToken,
    pub document: JobDocument,
}

impl Invocation {
    /// Process the claimed document and record the outcome
    pub(crate) async fn run(self) {
        let started = Instant::now();
        let result = self.execute().await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let outcome = self.outcome_for(result, elapsed_ms);
        let document_id = self.document.id.clone();

        match self
            .ctx
            .store
            .record_outcome(&document_id, &outcome, self.ctx.now())
            .await
        {
            Ok(record) => {
                let doc = &record.document;
                match doc.status {
                    DocumentStatus::Completed => debug!(
                        job_id = %doc.job_id,
                        document_id = %doc.id,
                        processing_time_ms = elapsed_ms,
                        "Document completed"
                    ),
                    DocumentStatus::Pending => info!(
                        job_id = %doc.job_id,
                        document_id = %doc.id,
                        retry_count = doc.retry_count,
                        next_attempt_at = doc.next_attempt_at,
                        error = ?doc.last_error,
                        "Retry scheduled"
                    ),
                    DocumentStatus::NeedsReview => warn!(
                        job_id = %doc.job_id,
                        document_id = %doc.id,
                        retry_count = doc.retry_count,
                        error_kind = ?doc.error_kind,
                        "Document escalated to review queue"
                    ),
                    status => warn!(
                        job_id = %doc.job_id,
                        document_id = %doc.id,
                        status = %status,
                        error = ?doc.last_error,
                        "Document terminalized"
                    ),
                }
                self.ctx.bus.publish_outcome(&record);
            }
            Err(e) => error!(
                job_id = %self.document.job_id,
                document_id = %document_id,
                error = %e,
                "Failed to record processing outcome"
            ),
        }
    }

    /// Run the processing unit in its own task so a panic cannot escape
    async fn execute(&self) -> Result<(), Failure> {
        let processor = Arc::clone(&self.ctx.processor);
        let document = self.document.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move { processor.process(&document, timeout).await });
        let abort = handle.abort_handle();

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(Failure {
                        kind: ErrorKind::Timeout,
                        message: format!("processing timed out after {}s", limit.as_secs()),
                    });
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(Failure {
                kind: e.kind(),
                message: e.to_string(),
            }),
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                error!(
                    document_id = %self.document.id,
                    panic_msg = %message,
                    "Processing unit panicked"
                );
                Err(Failure {
                    kind: ErrorKind::Panic,
                    message: format!("processing unit panicked: {}", message),
                })
            }
            Err(_) => Err(Failure {
                kind: ErrorKind::Transient,
                message: "invocation cancelled".to_string(),
            }),
        }
    }

    fn outcome_for(&self, result: Result<(), Failure>, elapsed_ms: i64) -> DocumentOutcome {
        let failure = match result {
            Ok(()) => return DocumentOutcome::completed(self.document.retry_count, elapsed_ms),
            Err(failure) => failure,
        };

        let decision = self.policy.decide(self.document.retry_count, failure.kind);
        let kind = match decision {
            RetryDecision::Retry { .. } if self.control.state() == RunState::Stopped => {
                OutcomeKind::Cancelled
            }
            RetryDecision::Retry { delay, .. } => OutcomeKind::RetryScheduled {
                next_attempt_at: self.ctx.now() + delay.as_millis() as i64,
            },
            RetryDecision::Escalate { reason, .. } => OutcomeKind::NeedsReview {
                review_id: self.ctx.ids.generate_id(),
                reason,
                max_retries: self.policy.max_retries(),
            },
            RetryDecision::Fail { .. } => OutcomeKind::Failed,
        };

        DocumentOutcome {
            kind,
            retry_count: decision.retry_count(),
            last_error: Some(failure.message),
            error_kind: Some(failure.kind),
            processing_time_ms: elapsed_ms,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
