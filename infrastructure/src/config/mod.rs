//! Configuration file loading

pub mod file_config;
pub mod loader;

pub use file_config::{
    ConfigValidationError, FileAgentConfig, FileConfig, FileExecutionConfig, FileSinkConfig,
    FileStoreConfig, FileSupervisorConfig,
};
pub use loader::ConfigLoader;
