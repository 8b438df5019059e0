// Persistent Store Port
// The single source of truth; application services hold one `Arc<dyn Store>`

use crate::port::{DocumentRepository, JobRepository, ReviewRepository};

/// Everything the engine persists
pub trait Store: JobRepository + DocumentRepository + ReviewRepository {}

impl<T> Store for T where T: JobRepository + DocumentRepository + ReviewRepository + ?Sized {}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use crate::domain::{
        paginate, DocumentOutcome, DocumentStatus, DomainError, Job, JobDocument, JobStatus,
        OutcomeKind, OutcomeRecord, Page, PageRequest, ReviewQueueItem, ReviewResolution,
        ReviewStatus, SyncScope,
    };
    use crate::error::{AppError, Result};
    use crate::port::{
        DiscoveredBatch, DocumentRepository, JobRepository, RequeueRecord, ReviewRepository,
    };
    use async_trait::async_trait;
    use std::cmp::Reverse;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        jobs: HashMap<String, Job>,
        documents: HashMap<String, JobDocument>,
        reviews: HashMap<String, ReviewQueueItem>,
    }

    /// In-memory store with the same atomicity guarantees as the SQLite
    /// adapter (one lock around every operation)
    #[derive(Default)]
    pub struct InMemoryStore {
        inner: Mutex<Inner>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// All documents of a job, in creation order
        pub fn documents_of(&self, job_id: &str) -> Vec<JobDocument> {
            let inner = self.inner.lock().unwrap();
            let mut docs: Vec<JobDocument> = inner
                .documents
                .values()
                .filter(|d| d.job_id == job_id)
                .cloned()
                .collect();
            docs.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
            docs
        }

        pub fn reviews_of(&self, job_id: &str) -> Vec<ReviewQueueItem> {
            let inner = self.inner.lock().unwrap();
            inner
                .reviews
                .values()
                .filter(|r| r.job_id == job_id)
                .cloned()
                .collect()
        }
    }

    fn bump(updated_at: &mut i64, now: i64) {
        *updated_at = (*updated_at + 1).max(now);
    }

    fn invalid(err: DomainError) -> AppError {
        AppError::InvalidState(err.to_string())
    }

    fn since<'a, T: Clone + 'a>(
        items: impl Iterator<Item = &'a T>,
        keep: impl Fn(&T) -> bool,
        updated_at: impl Fn(&T) -> (i64, String),
        limit: u32,
    ) -> Vec<T> {
        let mut out: Vec<T> = items.filter(|item| keep(item)).cloned().collect();
        out.sort_by_key(|item| updated_at(item));
        out.truncate(limit as usize);
        out
    }

    impl Inner {
        fn job_mut(&mut self, id: &str) -> Result<&mut Job> {
            self.jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", id)))
        }

        fn requeue(
            &mut self,
            document_ids: &[String],
            now: i64,
        ) -> Result<(Vec<JobDocument>, Vec<ReviewQueueItem>, i64, i64)> {
            let mut documents = Vec::new();
            let mut reviews = Vec::new();
            let (mut failed, mut needs_review) = (0, 0);

            for id in document_ids {
                let Some(doc) = self.documents.get_mut(id) else {
                    continue;
                };
                match doc.status {
                    DocumentStatus::Failed => failed += 1,
                    DocumentStatus::NeedsReview => needs_review += 1,
                    _ => continue,
                }
                doc.requeue(now).map_err(invalid)?;
                documents.push(doc.clone());

                if let Some(item) = self
                    .reviews
                    .values_mut()
                    .find(|r| &r.document_id == id && r.is_open())
                {
                    item.resolve(ReviewResolution::Retried, now)
                        .map_err(invalid)?;
                    reviews.push(item.clone());
                }
            }
            Ok((documents, reviews, failed, needs_review))
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryStore {
        async fn insert_job(&self, job: &Job) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            if inner.jobs.contains_key(&job.id) {
                return Err(AppError::Conflict(format!("job {} already exists", job.id)));
            }
            inner.jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_job(&self, id: &str) -> Result<Option<Job>> {
            Ok(self.inner.lock().unwrap().jobs.get(id).cloned())
        }

        async fn transition_job(
            &self,
            id: &str,
            to: JobStatus,
            failure_reason: Option<&str>,
            now: i64,
        ) -> Result<Job> {
            let mut inner = self.inner.lock().unwrap();
            let job = inner.job_mut(id)?;
            job.transition(to, now).map_err(invalid)?;
            if to == JobStatus::Failed {
                job.failure_reason = failure_reason.map(str::to_string);
            }
            Ok(job.clone())
        }

        async fn mark_discovery_exhausted(&self, id: &str, now: i64) -> Result<Job> {
            let mut inner = self.inner.lock().unwrap();
            let job = inner.job_mut(id)?;
            if !job.discovery_exhausted {
                job.discovery_exhausted = true;
                bump(&mut job.updated_at, now);
            }
            Ok(job.clone())
        }

        async fn complete_if_drained(&self, id: &str, now: i64) -> Result<Option<Job>> {
            let mut inner = self.inner.lock().unwrap();
            let active = inner
                .documents
                .values()
                .any(|d| d.job_id == id && d.status.is_active());
            let job = inner.job_mut(id)?;
            if active || !job.discovery_exhausted || job.status != JobStatus::Running {
                return Ok(None);
            }
            job.transition(JobStatus::Completed, now).map_err(invalid)?;
            Ok(Some(job.clone()))
        }

        async fn list_jobs(
            &self,
            status: Option<JobStatus>,
            page: &PageRequest,
        ) -> Result<Page<Job>> {
            let inner = self.inner.lock().unwrap();
            let jobs: Vec<Job> = inner
                .jobs
                .values()
                .filter(|j| status.map_or(true, |s| j.status == s))
                .cloned()
                .collect();
            Ok(paginate(&jobs, page))
        }

        async fn find_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
            let inner = self.inner.lock().unwrap();
            let mut jobs: Vec<Job> = inner
                .jobs
                .values()
                .filter(|j| j.status == status)
                .cloned()
                .collect();
            jobs.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
            Ok(jobs)
        }

        async fn jobs_updated_since(
            &self,
            scope: &SyncScope,
            since_millis: i64,
            limit: u32,
        ) -> Result<Vec<Job>> {
            let inner = self.inner.lock().unwrap();
            Ok(since(
                inner.jobs.values(),
                |j| scope.includes_job(&j.id) && j.updated_at >= since_millis,
                |j| (j.updated_at, j.id.clone()),
                limit,
            ))
        }
    }

    #[async_trait]
    impl DocumentRepository for InMemoryStore {
        async fn insert_discovered(
            &self,
            job_id: &str,
            documents: &[JobDocument],
            now: i64,
        ) -> Result<DiscoveredBatch> {
            let mut inner = self.inner.lock().unwrap();
            let accepting = !inner.job_mut(job_id)?.status.is_terminal();

            let mut inserted = Vec::new();
            for doc in documents.iter().filter(|_| accepting) {
                let known = inner
                    .documents
                    .values()
                    .any(|d| d.job_id == job_id && d.source_ref == doc.source_ref);
                if known || inner.documents.contains_key(&doc.id) {
                    continue;
                }
                inner.documents.insert(doc.id.clone(), doc.clone());
                inserted.push(doc.clone());
            }

            let job = inner.job_mut(job_id)?;
            if !inserted.is_empty() {
                job.total_items += inserted.len() as i64;
                bump(&mut job.updated_at, now);
            }
            Ok(DiscoveredBatch {
                documents: inserted,
                job: job.clone(),
            })
        }

        async fn claim_next(&self, job_id: &str, now: i64) -> Result<Option<JobDocument>> {
            let mut inner = self.inner.lock().unwrap();
            let running = inner
                .jobs
                .get(job_id)
                .map_or(false, |j| j.status == JobStatus::Running);
            if !running {
                return Ok(None);
            }

            let next_id = inner
                .documents
                .values()
                .filter(|d| {
                    d.job_id == job_id
                        && d.status == DocumentStatus::Pending
                        && d.next_attempt_at <= now
                })
                .min_by_key(|d| (Reverse(d.priority), d.enqueued_at, d.id.clone()))
                .map(|d| d.id.clone());

            let Some(id) = next_id else {
                return Ok(None);
            };
            let doc = inner
                .documents
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;
            doc.claim(now).map_err(invalid)?;
            Ok(Some(doc.clone()))
        }

        async fn record_outcome(
            &self,
            document_id: &str,
            outcome: &DocumentOutcome,
            now: i64,
        ) -> Result<OutcomeRecord> {
            let mut inner = self.inner.lock().unwrap();

            let job_id = inner
                .documents
                .get(document_id)
                .map(|d| d.job_id.clone())
                .ok_or_else(|| AppError::NotFound(format!("document {}", document_id)))?;
            let job_stopped = inner.job_mut(&job_id)?.status == JobStatus::Stopped;

            let mut effective = outcome.clone();
            if job_stopped && matches!(outcome.kind, OutcomeKind::RetryScheduled { .. }) {
                effective.kind = OutcomeKind::Cancelled;
            }

            let doc = inner
                .documents
                .get_mut(document_id)
                .ok_or_else(|| AppError::NotFound(format!("document {}", document_id)))?;
            doc.apply_outcome(&effective, now).map_err(invalid)?;
            let document = doc.clone();

            let review = match &effective.kind {
                OutcomeKind::NeedsReview {
                    review_id,
                    reason,
                    max_retries,
                } => {
                    let existing = inner
                        .reviews
                        .values_mut()
                        .find(|r| r.document_id == document.id);
                    let item = match existing {
                        Some(item) => {
                            let mut fresh = ReviewQueueItem::escalated(
                                item.id.clone(),
                                &document,
                                *reason,
                                *max_retries,
                                item.created_at,
                            );
                            fresh.notes = std::mem::take(&mut item.notes);
                            fresh.updated_at = item.updated_at;
                            bump(&mut fresh.updated_at, now);
                            *item = fresh;
                            item.clone()
                        }
                        None => {
                            let item = ReviewQueueItem::escalated(
                                review_id.clone(),
                                &document,
                                *reason,
                                *max_retries,
                                now,
                            );
                            inner.reviews.insert(item.id.clone(), item.clone());
                            item
                        }
                    };
                    Some(item)
                }
                _ => None,
            };

            let job = inner.job_mut(&job_id)?;
            let counted = match effective.kind {
                OutcomeKind::Completed => Some(&mut job.processed_items),
                OutcomeKind::Failed => Some(&mut job.failed_items),
                OutcomeKind::NeedsReview { .. } => Some(&mut job.needs_review_items),
                OutcomeKind::RetryScheduled { .. } | OutcomeKind::Cancelled => None,
            };
            if let Some(counter) = counted {
                *counter += 1;
                bump(&mut job.updated_at, now);
            }

            Ok(OutcomeRecord {
                document,
                job: job.clone(),
                review,
            })
        }

        async fn cancel_pending(&self, job_id: &str, now: i64) -> Result<Vec<JobDocument>> {
            let mut inner = self.inner.lock().unwrap();
            let mut cancelled = Vec::new();
            for doc in inner.documents.values_mut() {
                if doc.job_id == job_id && doc.status == DocumentStatus::Pending {
                    doc.cancel(now).map_err(invalid)?;
                    cancelled.push(doc.clone());
                }
            }
            Ok(cancelled)
        }

        async fn requeue_failed(&self, job_id: &str, now: i64) -> Result<RequeueRecord> {
            let mut inner = self.inner.lock().unwrap();
            inner.job_mut(job_id)?;

            let ids: Vec<String> = inner
                .documents
                .values()
                .filter(|d| {
                    d.job_id == job_id
                        && matches!(d.status, DocumentStatus::Failed | DocumentStatus::NeedsReview)
                })
                .map(|d| d.id.clone())
                .collect();
            let (documents, reviews, failed, needs_review) = inner.requeue(&ids, now)?;

            let job = inner.job_mut(job_id)?;
            if !documents.is_empty() {
                job.failed_items -= failed;
                job.needs_review_items -= needs_review;
                bump(&mut job.updated_at, now);
            }
            Ok(RequeueRecord {
                documents,
                job: job.clone(),
                reviews,
            })
        }

        async fn release_processing(&self, now: i64) -> Result<Vec<JobDocument>> {
            let mut inner = self.inner.lock().unwrap();
            let mut released = Vec::new();
            for doc in inner.documents.values_mut() {
                if doc.status == DocumentStatus::Processing {
                    doc.release(now).map_err(invalid)?;
                    released.push(doc.clone());
                }
            }
            Ok(released)
        }

        async fn find_document(&self, id: &str) -> Result<Option<JobDocument>> {
            Ok(self.inner.lock().unwrap().documents.get(id).cloned())
        }

        async fn list_documents(
            &self,
            job_id: &str,
            status: Option<DocumentStatus>,
            page: &PageRequest,
        ) -> Result<Page<JobDocument>> {
            let inner = self.inner.lock().unwrap();
            let docs: Vec<JobDocument> = inner
                .documents
                .values()
                .filter(|d| d.job_id == job_id && status.map_or(true, |s| d.status == s))
                .cloned()
                .collect();
            Ok(paginate(&docs, page))
        }

        async fn count_active(&self, job_id: &str) -> Result<i64> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .documents
                .values()
                .filter(|d| d.job_id == job_id && d.status.is_active())
                .count() as i64)
        }

        async fn next_due_at(&self, job_id: &str) -> Result<Option<i64>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .documents
                .values()
                .filter(|d| d.job_id == job_id && d.status == DocumentStatus::Pending)
                .map(|d| d.next_attempt_at)
                .min())
        }

        async fn documents_updated_since(
            &self,
            scope: &SyncScope,
            since_millis: i64,
            limit: u32,
        ) -> Result<Vec<JobDocument>> {
            let inner = self.inner.lock().unwrap();
            Ok(since(
                inner.documents.values(),
                |d| scope.includes_job(&d.job_id) && d.updated_at >= since_millis,
                |d| (d.updated_at, d.id.clone()),
                limit,
            ))
        }
    }

    #[async_trait]
    impl ReviewRepository for InMemoryStore {
        async fn find_review(&self, id: &str) -> Result<Option<ReviewQueueItem>> {
            Ok(self.inner.lock().unwrap().reviews.get(id).cloned())
        }

        async fn list_reviews(
            &self,
            job_id: Option<&str>,
            status: Option<ReviewStatus>,
            page: &PageRequest,
        ) -> Result<Page<ReviewQueueItem>> {
            let inner = self.inner.lock().unwrap();
            let items: Vec<ReviewQueueItem> = inner
                .reviews
                .values()
                .filter(|r| job_id.map_or(true, |j| r.job_id == j))
                .filter(|r| status.map_or(true, |s| r.status == s))
                .cloned()
                .collect();
            Ok(paginate(&items, page))
        }

        async fn add_review_note(&self, id: &str, text: &str, now: i64) -> Result<ReviewQueueItem> {
            let mut inner = self.inner.lock().unwrap();
            let item = inner
                .reviews
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("review item {}", id)))?;
            item.add_note(text, now);
            Ok(item.clone())
        }

        async fn resolve_review(&self, id: &str, now: i64) -> Result<ReviewQueueItem> {
            let mut inner = self.inner.lock().unwrap();
            let item = inner
                .reviews
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("review item {}", id)))?;
            item.resolve(ReviewResolution::Closed, now)
                .map_err(invalid)?;
            Ok(item.clone())
        }

        async fn retry_review(&self, id: &str, now: i64) -> Result<RequeueRecord> {
            let mut inner = self.inner.lock().unwrap();
            let item = inner
                .reviews
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("review item {}", id)))?;
            if !item.is_open() {
                return Err(AppError::InvalidState(format!(
                    "review item {} is already resolved",
                    id
                )));
            }

            let (documents, reviews, failed, needs_review) =
                inner.requeue(std::slice::from_ref(&item.document_id), now)?;
            if documents.is_empty() {
                return Err(AppError::InvalidState(format!(
                    "document {} is not awaiting review",
                    item.document_id
                )));
            }

            let job = inner.job_mut(&item.job_id)?;
            job.failed_items -= failed;
            job.needs_review_items -= needs_review;
            bump(&mut job.updated_at, now);

            Ok(RequeueRecord {
                documents,
                job: job.clone(),
                reviews,
            })
        }

        async fn reviews_updated_since(
            &self,
            scope: &SyncScope,
            since_millis: i64,
            limit: u32,
        ) -> Result<Vec<ReviewQueueItem>> {
            let inner = self.inner.lock().unwrap();
            Ok(since(
                inner.reviews.values(),
                |r| scope.includes_job(&r.job_id) && r.updated_at >= since_millis,
                |r| (r.updated_at, r.id.clone()),
                limit,
            ))
        }
    }
}
