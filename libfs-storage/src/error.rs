//! Error types for the storage backend, catalog and view engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("unsupported connection scheme: {0}")]
    UnsupportedScheme(String),

    #[error("plugin error: {0}")]
    Plugin(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Inspect a `sqlx::Error` and fold a sqlite `UNIQUE constraint failed`
/// violation into `StorageError::UniqueViolation`, leaving every other
/// driver error to propagate as `DatabaseError`.
pub fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("2067") || db_err.message().contains("UNIQUE") {
            return StorageError::UniqueViolation(db_err.message().to_string());
        }
    }
    StorageError::DatabaseError(err.to_string())
}
