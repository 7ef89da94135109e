//! Metadata Plugin — a typed capability set in place of the original's
//! duck-typed `import_module("Libfs.plugins.%s")`.
//!
//! Grounded on `Libfs/plugins/id3.py`, `Libfs/plugins/exif.py` and
//! `Libfs/plugins/no_plugin.py` for the contract; concrete plugins live in
//! sibling modules.

use std::collections::HashMap;
use std::path::Path;

use libfs_core::View;

use crate::error::Result;

pub mod audio;
pub mod image;
pub mod none;

/// A media-family adapter: read/write tags, validate candidate values, and
/// declare the keys and default view the engine should use for it.
pub trait MetadataPlugin: Send + Sync {
    /// Stable for the lifetime of one library; defines the catalog's
    /// columns beyond `src_path`/`src_inode`.
    fn valid_keys(&self) -> Vec<String>;

    /// The dirtree + filename template a freshly created library starts
    /// with.
    fn default_view(&self) -> View;

    /// Reads whatever tags the file carries. Missing fields are simply
    /// omitted — the catalog substitutes `"Unknown"` at insert time.
    fn read_metadata(&self, path: &Path) -> Result<HashMap<String, String>>;

    /// Writes `metadata` back onto the file. Must be atomic with respect to
    /// the catalog update the caller performs immediately afterward.
    fn write_metadata(&self, path: &Path, metadata: &HashMap<String, String>) -> Result<()>;

    /// A cheap veto used before accepting a new directory name or filename
    /// segment from the user.
    fn is_valid_metadata(&self, key: &str, value: &str) -> bool;

    /// Identifies the plugin in the library's magic row, e.g. `"audio"`.
    fn name(&self) -> &'static str;
}

/// Resolves a plugin by the name stored in a library's magic row / passed
/// to `libfs update --type`.
pub fn by_name(name: &str) -> Option<Box<dyn MetadataPlugin>> {
    match name {
        "audio" => Some(Box::new(audio::AudioPlugin)),
        "image" => Some(Box::new(image::ImagePlugin)),
        "none" => Some(Box::new(none::NonePlugin)),
        _ => None,
    }
}
