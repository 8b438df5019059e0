// Application Layer - Use Cases and Business Logic

pub mod context;
pub mod discovery;
pub mod job_service;
pub mod rate_limit;
pub mod recovery;
pub mod retry;
pub mod review;
pub mod sync;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use context::EngineContext;
pub use job_service::JobManager;
pub use recovery::{RecoveryReport, RecoveryService};
pub use retry::{RetryDecision, RetryPolicy};
pub use review::ReviewService;
pub use sync::{
    BusPushTransport, CacheUpdate, PageCache, StatusBus, StorePollSource, SyncSubscription,
    TransportMode, TransportOverride,
};
pub use worker::{JobRunner, RunnerExit, RunnerHandle};
