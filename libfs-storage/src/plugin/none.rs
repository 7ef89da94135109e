//! Fallback plugin for files with no registered tag format.
//!
//! Grounded on `Libfs/plugins/no_plugin.py`: it exists purely so the
//! catalog always has *a* plugin to dispatch to, and it refuses every
//! metadata mutation outright.

use std::collections::HashMap;
use std::path::Path;

use libfs_core::View;

use crate::error::{Result, StorageError};

use super::MetadataPlugin;

pub struct NonePlugin;

impl MetadataPlugin for NonePlugin {
    fn valid_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn default_view(&self) -> View {
        View::new(Vec::new(), "%{src_name}")
    }

    fn read_metadata(&self, _path: &Path) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    fn write_metadata(&self, _path: &Path, _metadata: &HashMap<String, String>) -> Result<()> {
        Err(StorageError::Plugin("no_plugin cannot write metadata".into()))
    }

    fn is_valid_metadata(&self, _key: &str, _value: &str) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_metadata_always_errors() {
        let plugin = NonePlugin;
        let result = plugin.write_metadata(Path::new("/tmp/whatever"), &HashMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn is_valid_metadata_always_false() {
        let plugin = NonePlugin;
        assert!(!plugin.is_valid_metadata("anything", "anything"));
    }
}
