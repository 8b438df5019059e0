//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use docflow_core::domain::DomainError;
use docflow_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;
use tracing::error;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const SOURCE_ERROR: i32 = 5002;
}

/// Convert AppError to JSON-RPC ErrorObject
///
/// Validation errors carry the violated fields as `data` so clients can
/// highlight them.
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    if err.is_not_found() {
        return ErrorObjectOwned::owned(code::NOT_FOUND, err.to_string(), None::<()>);
    }

    match err {
        AppError::Validation(e) => {
            let message = e.to_string();
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, message, Some(e.violations))
        }
        AppError::Domain(DomainError::InvalidCursor(msg)) => ErrorObjectOwned::owned(
            code::VALIDATION_ERROR,
            format!("invalid cursor: {}", msg),
            None::<()>,
        ),
        AppError::Domain(e) => ErrorObjectOwned::owned(code::CONFLICT, e.to_string(), None::<()>),
        AppError::Serialization(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::Conflict(msg) | AppError::InvalidState(msg) => {
            ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>)
        }
        AppError::Database(msg) => {
            error!(error = %msg, "Database error while serving RPC");
            ErrorObjectOwned::owned(code::DB_ERROR, msg, None::<()>)
        }
        AppError::Source(e) => {
            ErrorObjectOwned::owned(code::SOURCE_ERROR, e.to_string(), None::<()>)
        }
        other => {
            error!(error = %other, "Internal error while serving RPC");
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, other.to_string(), None::<()>)
        }
    }
}
