// Central Error Type for the Application

use crate::domain::{DomainError, ValidationError};
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Source error: {0}")]
    Source(#[from] crate::port::SourceError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Not-found domain errors surface as `NotFound` so callers can map them uniformly
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_)
                | AppError::Domain(
                    DomainError::JobNotFound(_)
                        | DomainError::DocumentNotFound(_)
                        | DomainError::ReviewItemNotFound(_)
                )
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)
