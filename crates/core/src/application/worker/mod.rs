// Worker - per-job dispatcher bounding concurrent processing invocations

pub mod constants;
mod control;
mod invocation;

use constants::*;
pub use control::{control_channel, ControlSender, ControlToken, RunState};

use crate::application::context::EngineContext;
use crate::application::discovery::{DiscoveryScanner, DiscoveryState};
use crate::application::rate_limit::RollingWindowLimiter;
use crate::application::retry::RetryPolicy;
use crate::domain::{Job, JobId, JobStatus};
use invocation::Invocation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Why a runner's dispatch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerExit {
    /// `once` job drained and marked completed
    Completed,
    Stopped,
    Shutdown,
    /// Source failed the job
    DiscoveryFailed,
}

/// Owner-side handle of a running job
pub struct RunnerHandle {
    job_id: JobId,
    control: ControlSender,
    wake: Arc<Notify>,
    task: JoinHandle<RunnerExit>,
}

impl RunnerHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn pause(&self) {
        self.control.set(RunState::Paused);
    }

    pub fn resume(&self) {
        self.control.set(RunState::Running);
    }

    pub fn stop(&self) {
        self.control.set(RunState::Stopped);
    }

    pub fn shutdown(&self) {
        self.control.set(RunState::Shutdown);
    }

    /// Re-check the queue now (e.g. after documents were requeued)
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the runner and all its in-flight invocations are done
    pub async fn join(self) -> Option<RunnerExit> {
        match self.task.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "Job runner task failed");
                None
            }
        }
    }
}

/// Drains one job's pending queue
///
/// - At most `parallel_workers` invocations in flight (semaphore permits)
/// - Optional rolling-minute cap on invocation starts
/// - Claims are exclusive compare-and-set operations in the store
/// - Pause/stop are checked before every dequeue; in-flight work always finishes
pub struct JobRunner {
    ctx: Arc<EngineContext>,
    job: Job,
    policy: Arc<RetryPolicy>,
    control: ControlToken,
    discovery: watch::Receiver<DiscoveryState>,
    discovery_open: bool,
    /// A source failure arrived while paused and waits for resume
    failure_held: bool,
    wake: Arc<Notify>,
    limiter: Option<RollingWindowLimiter>,
    slots: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

enum Wakeup {
    Timer,
    Control,
    Notified,
    Discovery(bool),
    TaskDone(Result<(), JoinError>),
}

impl JobRunner {
    /// Spawn discovery and dispatch for a job that is `running` in the store
    pub fn spawn(ctx: Arc<EngineContext>, job: Job) -> RunnerHandle {
        let (control_tx, control) = control_channel(RunState::Running);
        let wake = Arc::new(Notify::new());
        let (scanner, discovery) =
            DiscoveryScanner::new(ctx.clone(), job.clone(), control.clone(), wake.clone());

        let options = &job.config.options;
        let runner = JobRunner {
            policy: Arc::new(RetryPolicy::from_options(options, ctx.settings.max_backoff())),
            limiter: options
                .rate_limit_per_minute
                .map(RollingWindowLimiter::per_minute),
            slots: Arc::new(Semaphore::new(options.parallel_workers.max(1) as usize)),
            tasks: JoinSet::new(),
            discovery_open: true,
            failure_held: false,
            control: control.clone(),
            wake: wake.clone(),
            discovery,
            job,
            ctx,
        };
        let job_id = runner.job.id.clone();

        let task = tokio::spawn(async move {
            let scan = tokio::spawn(scanner.run());
            let exit = runner.run().await;
            if matches!(exit, RunnerExit::Stopped | RunnerExit::Shutdown) {
                scan.abort();
            }
            let _ = scan.await;
            exit
        });

        RunnerHandle {
            job_id,
            control: control_tx,
            wake,
            task,
        }
    }

    async fn run(mut self) -> RunnerExit {
        info!(
            job_id = %self.job.id,
            parallel_workers = self.job.config.options.parallel_workers,
            rate_limit_per_minute = ?self.job.config.options.rate_limit_per_minute,
            mode = ?self.job.config.processing.mode,
            "Job runner started"
        );

        let exit = self.dispatch().await;
        // Job is failed before in-flight work drains
        let failed = exit == RunnerExit::DiscoveryFailed && self.fail_job().await;

        // In-flight invocations always finish, whatever the exit reason
        let in_flight = self.tasks.len();
        if in_flight > 0 {
            debug!(job_id = %self.job.id, in_flight, "Waiting for in-flight invocations");
        }
        while let Some(res) = self.tasks.join_next().await {
            log_join(&self.job.id, res);
        }

        if failed {
            self.cancel_pending().await;
        }

        info!(job_id = %self.job.id, exit = ?exit, "Job runner stopped");
        exit
    }

    async fn dispatch(&mut self) -> RunnerExit {
        loop {
            while let Some(res) = self.tasks.try_join_next() {
                log_join(&self.job.id, res);
            }

            match self.control.state() {
                RunState::Running => {}
                RunState::Paused => {
                    // Paused jobs cannot fail; the failure applies on resume
                    if !self.failure_held && self.discovery_failure().is_some() {
                        warn!(job_id = %self.job.id, "Source failed while paused, job fails on resume");
                        self.failure_held = true;
                    }
                    self.wait(MAX_IDLE_WAIT).await;
                    continue;
                }
                RunState::Stopped => return RunnerExit::Stopped,
                RunState::Shutdown => return RunnerExit::Shutdown,
            }
            if self.discovery_failure().is_some() {
                return RunnerExit::DiscoveryFailed;
            }

            // Concurrency slot first, so a full pool never consumes rate budget
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                self.wait(MAX_IDLE_WAIT).await;
                continue;
            };

            if let Some(limiter) = self.limiter.as_mut() {
                if let Some(wait) = limiter.wait_time(tokio::time::Instant::now()) {
                    drop(permit);
                    debug!(job_id = %self.job.id, wait_ms = wait.as_millis() as u64, "Rate limit reached");
                    self.wait(wait).await;
                    continue;
                }
            }

            let now = self.ctx.now();
            match self.ctx.store.claim_next(&self.job.id, now).await {
                Ok(Some(document)) => {
                    if let Some(limiter) = self.limiter.as_mut() {
                        limiter.record(tokio::time::Instant::now());
                    }
                    debug!(
                        job_id = %self.job.id,
                        document_id = %document.id,
                        retry_count = document.retry_count,
                        "Document claimed"
                    );
                    self.ctx.bus.publish_document(&document);

                    let invocation = Invocation {
                        ctx: Arc::clone(&self.ctx),
                        policy: Arc::clone(&self.policy),
                        timeout: self.job.config.options.processing_timeout(),
                        control: self.control.clone(),
                        document,
                    };
                    self.tasks.spawn(async move {
                        invocation.run().await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if let Some(exit) = self.try_complete(now).await {
                        return exit;
                    }
                    let wait = self.next_due_wait(now).await;
                    self.wait(wait).await;
                }
                Err(e) => {
                    drop(permit);
                    error!(job_id = %self.job.id, error = %e, "Failed to claim next document");
                    self.wait(ERROR_RECOVERY_SLEEP_DURATION).await;
                }
            }
        }
    }

    /// `once` jobs complete when discovery is exhausted and nothing is active
    async fn try_complete(&self, now: i64) -> Option<RunnerExit> {
        if self.job.config.is_continuous()
            || *self.discovery.borrow() != DiscoveryState::Exhausted
            || !self.tasks.is_empty()
        {
            return None;
        }

        match self.ctx.store.complete_if_drained(&self.job.id, now).await {
            Ok(Some(job)) => {
                info!(
                    job_id = %job.id,
                    total_items = job.total_items,
                    processed_items = job.processed_items,
                    failed_items = job.failed_items,
                    needs_review_items = job.needs_review_items,
                    "Job completed"
                );
                self.ctx.bus.publish_job(&job);
                Some(RunnerExit::Completed)
            }
            Ok(None) => None,
            Err(e) => {
                error!(job_id = %self.job.id, error = %e, "Completion check failed");
                None
            }
        }
    }

    /// Time until the earliest delayed retry becomes claimable
    async fn next_due_wait(&self, now: i64) -> Duration {
        match self.ctx.store.next_due_at(&self.job.id).await {
            Ok(Some(due)) if due > now => {
                Duration::from_millis((due - now) as u64).min(MAX_IDLE_WAIT)
            }
            Ok(Some(_)) => MIN_DUE_WAIT.max(self.ctx.settings.idle_poll()),
            Ok(None) => MAX_IDLE_WAIT,
            Err(e) => {
                warn!(job_id = %self.job.id, error = %e, "Could not read next due time");
                ERROR_RECOVERY_SLEEP_DURATION
            }
        }
    }

    /// Sleep until `timeout`, a control change, a wake-up, a discovery state
    /// change or an invocation finishing, whichever comes first
    async fn wait(&mut self, timeout: Duration) {
        let has_tasks = !self.tasks.is_empty();
        let discovery_open = self.discovery_open;

        let wakeup = tokio::select! {
            _ = tokio::time::sleep(timeout) => Wakeup::Timer,
            _ = self.control.changed() => Wakeup::Control,
            _ = self.wake.notified() => Wakeup::Notified,
            res = self.discovery.changed(), if discovery_open => Wakeup::Discovery(res.is_ok()),
            Some(res) = self.tasks.join_next(), if has_tasks => Wakeup::TaskDone(res),
        };

        match wakeup {
            Wakeup::Discovery(open) => self.discovery_open = open,
            Wakeup::TaskDone(res) => log_join(&self.job.id, res),
            Wakeup::Timer | Wakeup::Control | Wakeup::Notified => {}
        }
    }

    fn discovery_failure(&self) -> Option<String> {
        match &*self.discovery.borrow() {
            DiscoveryState::Failed { reason } => Some(reason.clone()),
            _ => None,
        }
    }

    /// `running -> failed` with the source error as the reason
    async fn fail_job(&self) -> bool {
        let Some(reason) = self.discovery_failure() else {
            return false;
        };
        match self
            .ctx
            .store
            .transition_job(&self.job.id, JobStatus::Failed, Some(&reason), self.ctx.now())
            .await
        {
            Ok(job) => {
                error!(job_id = %job.id, reason = %reason, "Job failed");
                self.ctx.bus.publish_job(&job);
                true
            }
            Err(e) => {
                // Paused or stopped in the meantime: a later resume rescans the source
                warn!(job_id = %self.job.id, error = %e, "Could not mark job failed");
                false
            }
        }
    }

    async fn cancel_pending(&self) {
        match self
            .ctx
            .store
            .cancel_pending(&self.job.id, self.ctx.now())
            .await
        {
            Ok(cancelled) => {
                if !cancelled.is_empty() {
                    info!(job_id = %self.job.id, cancelled = cancelled.len(), "Pending documents cancelled");
                }
                for document in &cancelled {
                    self.ctx.bus.publish_document(document);
                }
            }
            Err(e) => error!(job_id = %self.job.id, error = %e, "Failed to cancel pending documents"),
        }
    }
}

fn log_join(job_id: &str, res: Result<(), JoinError>) {
    if let Err(e) = res {
        // Invocation wrappers contain panics themselves; this is the runtime cancelling them
        warn!(job_id = %job_id, error = %e, "Invocation task ended abnormally");
    }
}
