// Engine Context - explicitly constructed dependencies shared by all services

use crate::application::sync::StatusBus;
use crate::port::{IdProvider, ProcessingUnit, SourceConnector, Store, TimeProvider};
use crate::settings::EngineSettings;
use std::sync::Arc;

/// Dependency-injected collaborators (no process-wide singletons)
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn Store>,
    pub connector: Arc<dyn SourceConnector>,
    pub processor: Arc<dyn ProcessingUnit>,
    pub time: Arc<dyn TimeProvider>,
    pub ids: Arc<dyn IdProvider>,
    pub bus: StatusBus,
    pub settings: EngineSettings,
}

impl EngineContext {
    pub fn now(&self) -> i64 {
        self.time.now_millis()
    }
}
