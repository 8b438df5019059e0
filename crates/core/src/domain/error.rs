// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid document state transition: {from} -> {to}")]
    InvalidDocumentTransition { from: String, to: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Review item not found: {0}")]
    ReviewItemNotFound(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
