// Job Management Use Cases
//
// createJob / startJob / pauseJob / resumeJob / cancelJob / retryFailed plus
// the read side. Owns the live `JobRunner` of every running job.

use crate::application::context::EngineContext;
use crate::application::worker::{JobRunner, RunnerExit, RunnerHandle};
use crate::domain::{
    DocumentStatus, Job, JobConfig, JobDocument, JobId, JobStatus, ListQuery, Page, PageRequest,
};
use crate::error::{AppError, Result};
use crate::port::RequeueRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct JobManager {
    ctx: Arc<EngineContext>,
    runners: Mutex<HashMap<JobId, RunnerHandle>>,
}

impl JobManager {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            runners: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Validate and persist a new job in `pending`
    ///
    /// # Errors
    /// `AppError::Validation` listing every violated field
    pub async fn create_job(&self, config: JobConfig) -> Result<Job> {
        config.validate()?;

        let job = Job::new(self.ctx.ids.generate_id(), self.ctx.now(), config);
        self.ctx.store.insert_job(&job).await?;
        self.ctx.bus.publish_job(&job);

        info!(
            job_id = %job.id,
            name = %job.name,
            source = %job.config.source.kind(),
            mode = ?job.config.processing.mode,
            "Job created"
        );
        Ok(job)
    }

    /// `pending -> running`, then start discovery and dispatch
    pub async fn start_job(&self, id: &str) -> Result<Job> {
        let job = self.get_job(id).await?;
        if job.status != JobStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "job {} is {}; only pending jobs can be started",
                id, job.status
            )));
        }

        let job = self.transition(id, JobStatus::Running, None).await?;
        self.ensure_running(&job).await;
        info!(job_id = %id, "Job started");
        Ok(job)
    }

    /// `running -> paused`. In-flight invocations finish; nothing new is claimed.
    pub async fn pause_job(&self, id: &str) -> Result<Job> {
        let job = self.transition(id, JobStatus::Paused, None).await?;
        if let Some(runner) = self.runners.lock().await.get(id) {
            runner.pause();
        }
        info!(job_id = %id, "Job paused");
        Ok(job)
    }

    /// `paused -> running`, continuing from the same pending set
    pub async fn resume_job(&self, id: &str) -> Result<Job> {
        let current = self.get_job(id).await?;
        if current.status != JobStatus::Paused {
            return Err(AppError::InvalidState(format!(
                "job {} is {}; only paused jobs can be resumed",
                id, current.status
            )));
        }

        let job = self.transition(id, JobStatus::Running, None).await?;
        {
            let runners = self.runners.lock().await;
            if let Some(runner) = runners.get(id).filter(|r| !r.is_finished()) {
                runner.resume();
                info!(job_id = %id, "Job resumed");
                return Ok(job);
            }
        }

        // Paused across a restart: no runner survived
        self.ensure_running(&job).await;
        info!(job_id = %id, "Job resumed with a new runner");
        Ok(job)
    }

    /// Stop a job for good: pending documents become `cancelled`, in-flight
    /// invocations finish, no further dequeues
    pub async fn cancel_job(&self, id: &str) -> Result<Job> {
        let job = self.transition(id, JobStatus::Stopped, None).await?;

        if let Some(runner) = self.runners.lock().await.get(id) {
            runner.stop();
        }

        let cancelled = self.ctx.store.cancel_pending(id, self.ctx.now()).await?;
        for document in &cancelled {
            self.ctx.bus.publish_document(document);
        }

        info!(job_id = %id, cancelled = cancelled.len(), "Job cancelled");
        Ok(job)
    }

    /// Requeue every `failed` / `needs_review` document with a fresh retry budget
    ///
    /// A `completed` job is re-opened. Stopped and failed jobs are final.
    pub async fn retry_failed(&self, id: &str) -> Result<RequeueRecord> {
        let job = self.get_job(id).await?;
        ensure_reopenable(&job)?;

        let record = self.ctx.store.requeue_failed(id, self.ctx.now()).await?;
        self.ctx.bus.publish_requeue(&record);

        info!(
            job_id = %id,
            requeued = record.documents.len(),
            reviews_closed = record.reviews.len(),
            "Failed documents requeued"
        );

        if !record.documents.is_empty() {
            self.after_requeue(record.job.clone()).await?;
        }
        Ok(record)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        self.ctx
            .store
            .find_job(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>, query: &ListQuery) -> Result<Page<Job>> {
        let page = self.page_request(query)?;
        self.ctx.store.list_jobs(status, &page).await
    }

    pub async fn list_documents(
        &self,
        job_id: &str,
        status: Option<DocumentStatus>,
        query: &ListQuery,
    ) -> Result<Page<JobDocument>> {
        let page = self.page_request(query)?;
        self.get_job(job_id).await?;
        self.ctx.store.list_documents(job_id, status, &page).await
    }

    pub(crate) fn page_request(&self, query: &ListQuery) -> Result<PageRequest> {
        let pagination = &self.ctx.settings.pagination;
        Ok(query.resolve(pagination.default_page_size, pagination.max_page_size)?)
    }

    /// Spawn a runner for every job persisted as `running` (after a restart)
    pub async fn resume_active_jobs(&self) -> Result<usize> {
        let jobs = self.ctx.store.find_jobs_by_status(JobStatus::Running).await?;
        let count = jobs.len();
        for job in &jobs {
            self.ensure_running(job).await;
        }
        if count > 0 {
            info!(count, "Resumed running jobs");
        }
        Ok(count)
    }

    /// Wait for a job's runner to exit (completion, stop or shutdown)
    pub async fn join(&self, id: &str) -> Option<RunnerExit> {
        let handle = self.runners.lock().await.remove(id)?;
        handle.join().await
    }

    /// Jobs with a live runner
    pub async fn active_runners(&self) -> Vec<JobId> {
        let mut runners = self.runners.lock().await;
        runners.retain(|_, handle| !handle.is_finished());
        runners.keys().cloned().collect()
    }

    /// Stop dispatching everywhere and wait for in-flight work
    ///
    /// Job status is left untouched so the jobs resume on the next start.
    pub async fn shutdown(&self) {
        let handles: Vec<RunnerHandle> = self.runners.lock().await.drain().map(|(_, h)| h).collect();
        info!(runners = handles.len(), "Shutting down job runners");

        for handle in &handles {
            handle.shutdown();
        }
        for handle in handles {
            let job_id = handle.job_id().to_string();
            let exit = handle.join().await;
            debug!(job_id = %job_id, exit = ?exit, "Runner joined");
        }
    }

    /// Make sure a runner drains the job: wake the live one or spawn a new one
    pub(crate) async fn ensure_running(&self, job: &Job) {
        let mut runners = self.runners.lock().await;
        if let Some(runner) = runners.get(&job.id).filter(|r| !r.is_finished()) {
            runner.wake();
            return;
        }
        debug!(job_id = %job.id, "Spawning job runner");
        let handle = JobRunner::spawn(Arc::clone(&self.ctx), job.clone());
        runners.insert(job.id.clone(), handle);
    }

    /// Re-open a completed job or nudge the runner of an active one
    pub(crate) async fn after_requeue(&self, job: Job) -> Result<()> {
        match job.status {
            JobStatus::Completed => {
                let job = self.transition(&job.id, JobStatus::Running, None).await?;
                info!(job_id = %job.id, "Completed job re-opened");
                self.ensure_running(&job).await;
            }
            JobStatus::Running => self.ensure_running(&job).await,
            // Picked up on resume
            JobStatus::Paused | JobStatus::Pending => {}
            JobStatus::Stopped | JobStatus::Failed => {
                warn!(job_id = %job.id, status = %job.status, "Requeued documents of a final job");
            }
        }
        Ok(())
    }

    async fn transition(&self, id: &str, to: JobStatus, reason: Option<&str>) -> Result<Job> {
        let job = self
            .ctx
            .store
            .transition_job(id, to, reason, self.ctx.now())
            .await?;
        self.ctx.bus.publish_job(&job);
        Ok(job)
    }
}

/// Stopped and failed jobs never take documents back
pub(crate) fn ensure_reopenable(job: &Job) -> Result<()> {
    if job.status.is_terminal() {
        return Err(AppError::InvalidState(format!(
            "job {} is {}; create a new job instead",
            job.id, job.status
        )));
    }
    Ok(())
}
