//! Error types for chatlens-core
//!
//! Only the I/O edges (REST source, snapshot cache, config, export) return
//! these. The normalize/group/filter/metrics pipeline is total and never fails.

use thiserror::Error;

/// Main error type for the chatlens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Snapshot cache database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Remote row source error (network, auth, non-2xx response)
    #[error("source error: {0}")]
    Source(String),
}

/// Result type alias for chatlens-core
pub type Result<T> = std::result::Result<T, Error>;
