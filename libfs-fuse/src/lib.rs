//! The FUSE-facing half of libfs: identity cache, open library, POSIX
//! errno mapping, the `fuser::Filesystem` impl and the mount bootstrap.

pub mod cache;
pub mod errno;
pub mod library;
pub mod mount;
pub mod ops;

pub use cache::Cache;
pub use library::Library;
pub use mount::mount;
pub use ops::LibfsFilesystem;
