//! Storage layer: the sqlite-backed catalog, the view engine that projects
//! catalog rows into a virtual directory tree, and the metadata plugins that
//! bridge tags on disk to catalog columns.

pub mod backend;
pub mod catalog;
pub mod error;
pub mod plugin;
pub mod view;

#[cfg(feature = "filesystem")]
pub mod scanner;

pub use backend::{Backend, Param};
pub use catalog::Catalog;
pub use error::{Result, StorageError};
pub use plugin::{by_name, MetadataPlugin};
pub use view::{FilenameTemplate, ViewTree};
