//! Domain types shared by the storage, view-engine and FUSE layers of libfs.

pub mod error;
pub mod model;

pub use error::*;
pub use model::*;
