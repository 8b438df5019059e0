// Docflow Infrastructure - SQLite Adapter
// Implements: JobRepository, DocumentRepository, ReviewRepository

mod connection;
mod document_repository;
mod error;
mod job_repository;
mod migration;
mod review_repository;
mod rows;
mod store;

pub use connection::create_pool;
pub use migration::{current_version, run_migrations};
pub use store::SqliteStore;
