// Domain Layer - Pure business logic and entities

pub mod config;
pub mod cursor;
pub mod document;
pub mod error;
pub mod job;
pub mod review;
pub mod status;

// Re-exports
pub use config::{
    CloudProvider, FieldViolation, JobConfig, JobOptions, NotificationConfig, ProcessingConfig,
    ProcessingMode, SourceConfig, SourceKind, ValidationError,
};
pub use cursor::{paginate, Cursor, Keyed, ListQuery, Page, PageRequest, SortKey, SortOrder};
pub use document::{
    Candidate, DocumentId, DocumentOutcome, DocumentStatus, ErrorKind, JobDocument,
    OutcomeKind, OutcomeRecord,
};
pub use error::DomainError;
pub use job::{Job, JobId, JobStatus, Priority};
pub use review::{
    ReviewItemId, ReviewNote, ReviewQueueItem, ReviewReason, ReviewResolution, ReviewStatus,
};
pub use status::{EntityKey, EntityKind, PushEvent, StatusMessage, SyncScope};
