// Discovery Scanner - feeds the pending queue from the source connector
//
// Never blocks on processing: documents accumulate in the store and the job
// runner alone decides how fast they drain.

use crate::application::context::EngineContext;
use crate::application::worker::ControlToken;
use crate::domain::{Job, JobDocument};
use crate::error::{AppError, Result};
use crate::port::{ScanBatch, SourceError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryState {
    Scanning,
    /// `once` source fully scanned; no more documents will appear
    Exhausted,
    /// Unrecoverable source error; the runner fails the job once it is
    /// running (a paused job fails when resumed)
    Failed { reason: String },
}

pub struct DiscoveryScanner {
    ctx: Arc<EngineContext>,
    job: Job,
    control: ControlToken,
    state: watch::Sender<DiscoveryState>,
    wake: Arc<Notify>,
}

impl DiscoveryScanner {
    /// # Arguments
    /// * `wake` - Notified whenever new documents were inserted
    pub fn new(
        ctx: Arc<EngineContext>,
        job: Job,
        control: ControlToken,
        wake: Arc<Notify>,
    ) -> (Self, watch::Receiver<DiscoveryState>) {
        let (state, rx) = watch::channel(DiscoveryState::Scanning);
        (
            Self {
                ctx,
                job,
                control,
                state,
                wake,
            },
            rx,
        )
    }

    pub async fn run(mut self) {
        if !self.job.config.is_continuous() && self.job.discovery_exhausted {
            debug!(job_id = %self.job.id, "Source already exhausted, skipping discovery");
            self.state.send_replace(DiscoveryState::Exhausted);
            return;
        }

        let mut token: Option<String> = None;
        let mut cycle = 0u64;

        loop {
            if !self.control.wait_while_paused().await {
                return;
            }

            cycle += 1;
            match self.scan_cycle(token.as_deref(), cycle).await {
                Ok(batch) if batch.exhausted => {
                    if !self.job.config.is_continuous() {
                        self.finish_once().await;
                        return;
                    }
                    // Next round starts over; store dedupe filters known items
                    token = None;
                    if !self.idle(self.ctx.settings.discovery_interval()).await {
                        return;
                    }
                }
                Ok(batch) if batch.candidates.is_empty() => {
                    token = batch.next_token;
                    if !self.idle(self.ctx.settings.discovery_interval()).await {
                        return;
                    }
                }
                Ok(batch) => token = batch.next_token,
                Err(AppError::Source(e)) if e.is_unrecoverable() => {
                    self.fail(&e);
                    return;
                }
                Err(e) => {
                    warn!(
                        job_id = %self.job.id,
                        cycle,
                        error = %e,
                        "Discovery cycle failed, retrying next interval"
                    );
                    if !self.idle(self.ctx.settings.discovery_interval()).await {
                        return;
                    }
                }
            }
        }
    }

    /// One request for up to `batch_size` candidates
    async fn scan_cycle(&self, token: Option<&str>, cycle: u64) -> Result<ScanBatch> {
        let batch = self
            .ctx
            .connector
            .scan(
                &self.job.config.source,
                token,
                self.job.config.processing.batch_size,
            )
            .await?;

        let now = self.ctx.now();
        let documents: Vec<JobDocument> = batch
            .candidates
            .iter()
            .map(|candidate| {
                JobDocument::discovered(self.ctx.ids.generate_id(), &self.job, candidate, now)
            })
            .collect();

        let inserted = self
            .ctx
            .store
            .insert_discovered(&self.job.id, &documents, now)
            .await?;

        debug!(
            job_id = %self.job.id,
            cycle,
            candidates = batch.candidates.len(),
            inserted = inserted.documents.len(),
            total_items = inserted.job.total_items,
            exhausted = batch.exhausted,
            "Discovery cycle"
        );

        if !inserted.documents.is_empty() {
            self.ctx.bus.publish_discovered(&inserted);
            self.wake.notify_one();
        }
        Ok(batch)
    }

    async fn finish_once(&self) {
        match self
            .ctx
            .store
            .mark_discovery_exhausted(&self.job.id, self.ctx.now())
            .await
        {
            Ok(job) => {
                info!(
                    job_id = %job.id,
                    total_items = job.total_items,
                    "Source exhausted, discovery finished"
                );
                self.ctx.bus.publish_job(&job);
                self.state.send_replace(DiscoveryState::Exhausted);
            }
            Err(e) => {
                // Leave state at Scanning: the job cannot complete without the flag
                error!(job_id = %self.job.id, error = %e, "Failed to record source exhaustion");
            }
        }
        self.wake.notify_one();
    }

    fn fail(&self, source_error: &SourceError) {
        let reason = source_error.to_string();
        error!(job_id = %self.job.id, reason = %reason, "Unrecoverable source error");
        self.state.send_replace(DiscoveryState::Failed { reason });
        self.wake.notify_one();
    }

    /// Sleep between cycles. Returns `false` if the runner must exit.
    async fn idle(&mut self, interval: Duration) -> bool {
        let deadline = tokio::time::sleep(interval);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                _ = self.control.changed() => {
                    if self.control.state().is_final() {
                        return false;
                    }
                }
            }
        }
    }
}
