// Docflow Core - Domain Logic, Ports & Orchestration
// NO infrastructure dependencies (Hexagonal Architecture)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;
pub mod settings;

pub use error::{AppError, Result};
pub use settings::EngineSettings;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
