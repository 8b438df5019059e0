// Crash recovery - run once on daemon startup before serving requests
use crate::application::job_service::JobManager;
use crate::error::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// What startup recovery did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Documents interrupted mid-processing, returned to `pending`
    pub released_documents: usize,
    /// Jobs persisted as `running` that got a fresh runner
    pub resumed_jobs: usize,
}

/// Crash recovery service
///
/// A daemon that died with invocations in flight leaves documents in
/// `processing` that nobody will ever finish. Recovery:
/// 1. Returns every `processing` document to `pending` (retry count untouched)
/// 2. Spawns a runner for every job still `running`
///
/// Paused jobs stay paused; their runner is created on resume.
pub struct RecoveryService {
    manager: Arc<JobManager>,
}

impl RecoveryService {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self { manager }
    }

    pub async fn recover(&self) -> Result<RecoveryReport> {
        let ctx = self.manager.context();

        let released = ctx.store.release_processing(ctx.now()).await?;
        for document in &released {
            warn!(
                job_id = %document.job_id,
                document_id = %document.id,
                "Interrupted document returned to pending"
            );
            ctx.bus.publish_document(document);
        }

        let resumed_jobs = self.manager.resume_active_jobs().await?;

        let report = RecoveryReport {
            released_documents: released.len(),
            resumed_jobs,
        };
        info!(
            released_documents = report.released_documents,
            resumed_jobs = report.resumed_jobs,
            "Startup recovery finished"
        );
        Ok(report)
    }
}
