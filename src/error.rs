//! Error types shared across the crate.

use std::io;
use std::path::PathBuf;

/// Errors that can escape a fallible public entry point.
///
/// Per the concurrency model, a `ServerError` never unwinds out of a worker
/// task: each task boundary converts it into a logged line plus a
/// connection close.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] mysql::Error),

    #[error("database pool exhausted or failed to open any connection")]
    PoolInit,

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("log sink closed")]
    LogClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ServerError>;
