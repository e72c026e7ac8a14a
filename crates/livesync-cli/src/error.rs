//! Error handling for the LiveSync chat CLI

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Sync engine error: {0}")]
    Sync(#[from] livesync_core::SyncError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Unexpected message format: {0}")]
    MessageFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
