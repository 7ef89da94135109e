//! Error types for libfs core

use thiserror::Error;

/// Core error types shared across the catalog, view engine and operations
/// layer. Transport-specific codes (POSIX errno) are derived from this at
/// the `libfs-fuse` boundary, not carried here.
#[derive(Error, Debug)]
pub enum LibfsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LibfsError>;
