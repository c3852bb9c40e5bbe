//! Common error types for parcelock

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for parcelock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while bootstrapping the service (config, record store)
#[derive(Error, Debug)]
pub enum Error {
    /// Record store failure (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML config file exists but does not parse
    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration value missing or out of range
    #[error("Configuration error: {0}")]
    Config(String),
}
