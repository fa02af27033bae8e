//! Error types shared across sources, storage and history queries

use thiserror::Error;

/// Failure of one source in one fetch cycle. Never fatal: the source is
/// left out of that cycle's consensus.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error: {status} from {source_name}")]
    Status { source_name: String, status: u16 },

    #[error("API error from {source_name}: {message}")]
    Api { source_name: String, message: String },

    #[error("Failed to parse response from {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("{0} timed out")]
    Timeout(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Failed to encode or decode record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt key in {partition}")]
    CorruptKey { partition: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("History is not available")]
    Unavailable,

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
