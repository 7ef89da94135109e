//! Core domain types describing a library: its view(s) and its magic row.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A view defines how catalog rows project into a virtual namespace: an
/// ordered list of metadata keys forming the directory tree, and a filename
/// template for the leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    /// Ordered metadata keys; dirtree[0] is the top-level directory.
    pub dirtree: Vec<String>,
    /// Filename template, e.g. `"%{track_number} -- %{title}"`.
    pub fn_gen: String,
}

impl View {
    pub fn new(dirtree: Vec<String>, fn_gen: impl Into<String>) -> Self {
        Self {
            dirtree,
            fn_gen: fn_gen.into(),
        }
    }

    pub fn depth(&self) -> usize {
        self.dirtree.len()
    }
}

/// The library's magic row: the active plugin, its declared valid keys, and
/// the default view. Written once at library creation and immutable across
/// mounts unless the library is rebuilt from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Magic {
    pub valid_keys: Vec<String>,
    pub default_view: View,
    pub plugin: String,
}

/// Sentinel stored for any metadata value that is missing or empty.
pub const UNKNOWN: &str = "Unknown";

/// A single persistent catalog record: one row per known source file, plus
/// one column per plugin-valid key. Identity is `(src_path, src_inode)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub src_path: String,
    pub src_inode: u64,
    pub fields: HashMap<String, String>,
}

impl CatalogRow {
    pub fn get(&self, key: &str) -> &str {
        self.fields.get(key).map(|s| s.as_str()).unwrap_or(UNKNOWN)
    }
}

/// Coerce an empty metadata value to the `"Unknown"` sentinel, mirroring the
/// catalog's insert-time normalization.
pub fn normalize_value(value: impl Into<String>) -> String {
    let value = value.into();
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_value_maps_empty_to_unknown() {
        assert_eq!(normalize_value(""), UNKNOWN);
        assert_eq!(normalize_value("Foo"), "Foo");
    }

    #[test]
    fn view_depth_matches_dirtree_length() {
        let view = View::new(
            vec!["genre".into(), "artist".into()],
            "%{title}".to_string(),
        );
        assert_eq!(view.depth(), 2);
    }
}
