// Docflow Infrastructure - System Adapters
// Implements: SourceConnector (folder), ProcessingUnit (subprocess)

pub mod folder_connector;
pub mod subprocess_processor;

pub use folder_connector::FolderConnector;
pub use subprocess_processor::{SubprocessConfig, SubprocessProcessor};
