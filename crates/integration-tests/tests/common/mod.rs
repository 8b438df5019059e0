//! Shared engine wiring for the integration suites
//!
//! Real SQLite store and wall clock; source and processing unit are the core
//! crate's test doubles unless a suite plugs in the system adapters.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use docflow_core::application::{EngineContext, JobManager, RunnerExit, StatusBus};
use docflow_core::domain::{
    JobConfig, JobOptions, ProcessingConfig, ProcessingMode, SourceConfig,
};
use docflow_core::port::mocks::{MockProcessingUnit, MockSourceConnector};
use docflow_core::port::{ProcessingUnit, SourceConnector, SystemTimeProvider, UuidProvider};
use docflow_core::EngineSettings;
use docflow_infra_sqlite::SqliteStore;

/// Upper bound for any single job to settle in these suites
pub const JOB_DEADLINE: Duration = Duration::from_secs(20);

pub struct Engine {
    pub store: Arc<SqliteStore>,
    pub manager: Arc<JobManager>,
}

impl Engine {
    pub async fn in_memory(
        connector: Arc<dyn SourceConnector>,
        processor: Arc<dyn ProcessingUnit>,
    ) -> Self {
        Self::open("sqlite::memory:", connector, processor).await
    }

    pub async fn open(
        database_url: &str,
        connector: Arc<dyn SourceConnector>,
        processor: Arc<dyn ProcessingUnit>,
    ) -> Self {
        let store = Arc::new(SqliteStore::open(database_url).await.unwrap());
        let settings = engine_settings();
        let ctx = Arc::new(EngineContext {
            store: store.clone(),
            connector,
            processor,
            time: Arc::new(SystemTimeProvider),
            ids: Arc::new(UuidProvider),
            bus: StatusBus::new(settings.status_buffer),
            settings,
        });

        Self {
            store,
            manager: Arc::new(JobManager::new(ctx)),
        }
    }

    /// Mock source and processor, both kept for assertions
    pub async fn with_mocks(
        connector: MockSourceConnector,
        processor: MockProcessingUnit,
    ) -> (Self, Arc<MockSourceConnector>, Arc<MockProcessingUnit>) {
        let connector = Arc::new(connector);
        let processor = Arc::new(processor);
        let engine = Self::in_memory(connector.clone(), processor.clone()).await;
        (engine, connector, processor)
    }

    /// Wait for the job's runner to exit, failing the test past the deadline
    pub async fn join(&self, job_id: &str) -> Option<RunnerExit> {
        tokio::time::timeout(JOB_DEADLINE, self.manager.join(job_id))
            .await
            .expect("job did not settle in time")
    }

    pub async fn close(&self) {
        self.manager.shutdown().await;
        self.store.close().await;
    }
}

/// Tight scheduler timings so suites run on the wall clock
pub fn engine_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.idle_poll_ms = 10;
    settings.discovery_interval_secs = 1;
    settings.sync.poll_interval_secs = 1;
    settings.sync.reconnect_cooldown_secs = 1;
    settings
}

/// Folder job with immediate retries
pub fn folder_job(path: &str, mode: ProcessingMode, batch_size: u32) -> JobConfig {
    JobConfig {
        name: "scanned-invoices".to_string(),
        source: SourceConfig::Folder {
            path: path.to_string(),
            recursive: false,
            file_types: vec!["pdf".to_string()],
        },
        processing: ProcessingConfig { mode, batch_size },
        options: JobOptions {
            retry_delay_seconds: 0,
            ..JobOptions::default()
        },
        notifications: Default::default(),
    }
}
