// Shared fixtures for application tests

use crate::application::context::EngineContext;
use crate::application::job_service::JobManager;
use crate::application::sync::StatusBus;
use crate::domain::{JobConfig, JobOptions, ProcessingConfig, ProcessingMode, SourceConfig};
use crate::port::mocks::{
    InMemoryStore, MockProcessingUnit, MockSourceConnector, SequentialIdProvider,
    TokioTimeProvider,
};
use crate::settings::EngineSettings;
use std::sync::Arc;

pub(crate) const BASE_MILLIS: i64 = 1_700_000_000_000;

pub(crate) struct Harness {
    pub store: Arc<InMemoryStore>,
    pub connector: Arc<MockSourceConnector>,
    pub processor: Arc<MockProcessingUnit>,
    pub ctx: Arc<EngineContext>,
}

impl Harness {
    /// Must be called inside a (paused) tokio runtime: timestamps follow the tokio clock
    pub fn new(connector: MockSourceConnector, processor: MockProcessingUnit) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let connector = Arc::new(connector);
        let processor = Arc::new(processor);
        let settings = EngineSettings::default();

        let ctx = Arc::new(EngineContext {
            store: store.clone(),
            connector: connector.clone(),
            processor: processor.clone(),
            time: Arc::new(TokioTimeProvider::new(BASE_MILLIS)),
            ids: Arc::new(SequentialIdProvider::new()),
            bus: StatusBus::new(settings.status_buffer),
            settings,
        });

        Self {
            store,
            connector,
            processor,
            ctx,
        }
    }

    pub fn manager(&self) -> Arc<JobManager> {
        Arc::new(JobManager::new(self.ctx.clone()))
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(
            MockSourceConnector::with_items(0),
            MockProcessingUnit::new_success(),
        )
    }
}

pub(crate) fn folder_config(mode: ProcessingMode, batch_size: u32) -> JobConfig {
    JobConfig {
        name: "invoices".to_string(),
        source: SourceConfig::Folder {
            path: "/inbox".to_string(),
            recursive: false,
            file_types: vec!["pdf".to_string()],
        },
        processing: ProcessingConfig { mode, batch_size },
        options: JobOptions::default(),
        notifications: Default::default(),
    }
}
