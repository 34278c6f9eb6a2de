//! Error types for lore-core

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed event or query parameter. Nothing was written.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The primary store is unreadable or a migration failed beyond repair.
    /// Callers should exit with [`STORE_CORRUPT_EXIT_CODE`].
    #[error("Activity store corrupt: {0}")]
    StoreCorrupt(String),

    /// The full-text index could not be opened. Recovered by a rebuild;
    /// the primary store is unaffected.
    #[error("Search index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Search index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("{0}")]
    Other(String),
}

/// Process exit status signalling an irrecoverably corrupt store to a
/// supervisor.
pub const STORE_CORRUPT_EXIT_CODE: i32 = 27;

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;
