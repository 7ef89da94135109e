//! Maps `LibfsError`/`StorageError` onto the POSIX errno taxonomy the
//! operations layer's upcalls are documented to return. This is the one
//! place the engine talks `libc` error codes; every layer below stays a
//! typed Rust error.

use libfs_core::LibfsError;
use libfs_storage::StorageError;

/// `rename`'s cross-depth rejection, chosen so shells do not fall back to
/// copy+remove on failure.
pub const EADDRNOTAVAIL: i32 = libc::EADDRNOTAVAIL;

pub fn from_libfs_error(err: &LibfsError) -> i32 {
    match err {
        LibfsError::NotFound(_) => libc::ENOENT,
        LibfsError::InvalidData(_) => libc::EINVAL,
        LibfsError::PermissionDenied(_) => libc::EACCES,
        LibfsError::Internal(_) => libc::EIO,
    }
}

pub fn from_storage_error(err: &StorageError) -> i32 {
    match err {
        StorageError::NotFound(_) => libc::ENOENT,
        StorageError::InvalidMetadata(_) | StorageError::InvalidPath(_) => libc::EINVAL,
        StorageError::IoError(e) => e.raw_os_error().unwrap_or(libc::EIO),
        // `write_metadata` wraps genuine IO failures from the underlying tag
        // library (disk full, permission denied) as `Plugin`; without a
        // carried errno, `EIO` is the safe default rather than `EINVAL`.
        StorageError::Plugin(_) => libc::EIO,
        StorageError::UniqueViolation(_)
        | StorageError::DatabaseError(_)
        | StorageError::SerializationError(_)
        | StorageError::Unavailable(_)
        | StorageError::UnsupportedScheme(_) => libc::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_enoent() {
        assert_eq!(
            from_libfs_error(&LibfsError::NotFound("x".into())),
            libc::ENOENT
        );
    }

    #[test]
    fn invalid_metadata_maps_to_einval() {
        assert_eq!(
            from_storage_error(&StorageError::InvalidMetadata("x".into())),
            libc::EINVAL
        );
    }

    #[test]
    fn database_error_maps_to_eio() {
        assert_eq!(
            from_storage_error(&StorageError::DatabaseError("x".into())),
            libc::EIO
        );
    }
}
