//! layerfix utilities
//!
//! Shared helpers for the layerfix workspace: logging setup on top of
//! `tracing`, configuration loading from TOML/JSON/YAML, and the small
//! string and file helpers the transformation engine leans on.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod file;
pub mod string;
pub mod config;
pub mod logging;

/// Re-export commonly used utilities
pub use file::{ensure_dir, read_text_file, write_atomic};
pub use string::{line_number_at, safe_truncate};
pub use config::{load_config, merge_configs, validate_config, ConfigBuilder};
pub use logging::{basic_config, init_logging, LogLevel, LoggerConfig};

/// Result type used throughout layerfix utilities
pub type Result<T> = std::result::Result<T, UtilError>;

/// Error types for utility operations
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path operation error
    #[error("Path operation error: {0}")]
    PathOperation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}
