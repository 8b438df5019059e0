// Port Layer - Interfaces for external dependencies

pub mod document_repository;
pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod processing_unit;
pub mod review_repository;
pub mod source_connector;
pub mod status_transport;
pub mod store;
pub mod time_provider;

// Re-exports
pub use document_repository::{DiscoveredBatch, DocumentRepository, RequeueRecord};
pub use id_provider::{IdProvider, UuidProvider};
pub use job_repository::JobRepository;
pub use processing_unit::{ProcessingError, ProcessingOutput, ProcessingUnit};
pub use review_repository::ReviewRepository;
pub use source_connector::{ConnectorRegistry, ScanBatch, SourceConnector, SourceError};
pub use status_transport::{PollSource, PushStream, PushTransport, TransportError};
pub use store::Store;
pub use time_provider::{SystemTimeProvider, TimeProvider};

/// Test doubles for every port, shared by unit and integration tests
pub mod mocks {
    pub use super::id_provider::mocks::SequentialIdProvider;
    pub use super::processing_unit::mocks::{MockBehavior, MockProcessingUnit};
    pub use super::source_connector::mocks::MockSourceConnector;
    pub use super::status_transport::mocks::{ScriptedPollSource, ScriptedPushTransport};
    pub use super::store::mocks::InMemoryStore;
    pub use super::time_provider::mocks::{ManualTimeProvider, TokioTimeProvider};
}
