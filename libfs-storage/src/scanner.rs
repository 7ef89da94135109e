//! `update` subcommand support: walks a source tree, reads tags through a
//! plugin, and folds the results into a catalog.
//!
//! Grounded on `scripts/libfs.py`'s `update` branch (`os.walk`, per-file
//! `read_metadata`/`add_entry`, the `--remove_obsolete` liveness check),
//! using a `walkdir`-based directory walk and `tracing`-based progress
//! reporting.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::error::Result;
use crate::plugin::MetadataPlugin;

/// Outcome of a single `scan` call, so the CLI can report what happened
/// without the scanner itself doing any user-facing formatting.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub added: usize,
    pub skipped: usize,
    pub removed: usize,
}

/// Walks `source`, reading tags through `plugin` and adding one catalog
/// entry per file that parses cleanly. Files the plugin cannot read are
/// logged and skipped, matching `libfs.py`'s bare `except: continue`.
pub async fn scan(
    catalog: &Catalog,
    plugin: &dyn MetadataPlugin,
    source: &Path,
    remove_obsolete: bool,
) -> Result<ScanReport> {
    let mut report = ScanReport::default();

    #[cfg(feature = "filesystem")]
    {
        for entry in walkdir::WalkDir::new(source)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            match scan_one(catalog, plugin, path).await {
                Ok(()) => report.added += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot read metadata of file");
                    report.skipped += 1;
                }
            }
        }
    }
    #[cfg(not(feature = "filesystem"))]
    {
        let _ = source;
        return Err(crate::error::StorageError::Plugin(
            "filesystem feature not enabled".into(),
        ));
    }

    if remove_obsolete {
        report.removed = remove_obsolete_entries(catalog).await?;
    }

    Ok(report)
}

async fn scan_one(catalog: &Catalog, plugin: &dyn MetadataPlugin, path: &Path) -> Result<()> {
    let abs_path = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned();
    let inode = std::fs::metadata(path)?.ino();
    let metadata = plugin.read_metadata(path)?;
    debug!(path = %abs_path, "adding catalog entry");
    catalog.add_entry(&abs_path, inode, &metadata).await
}

/// Mirrors the `--remove_obsolete` branch: every catalog row whose
/// `src_path` no longer exists on disk is dropped.
async fn remove_obsolete_entries(catalog: &Catalog) -> Result<usize> {
    let mut removed = 0;
    for src_path in catalog.all_src_paths().await? {
        if !Path::new(&src_path).exists() {
            catalog.remove_entry(&src_path).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::none::NonePlugin;
    use libfs_core::{Magic, View};

    fn test_magic() -> Magic {
        Magic {
            valid_keys: Vec::new(),
            default_view: View::new(Vec::new(), "%{src_name}".to_string()),
            plugin: "none".into(),
        }
    }

    #[tokio::test]
    async fn scan_adds_every_file_under_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"one").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"two").unwrap();

        let catalog = Catalog::open(":memory:", Some(test_magic())).await.unwrap();
        let plugin = NonePlugin;
        let report = scan(&catalog, &plugin, dir.path(), false).await.unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(catalog.all_src_paths().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn remove_obsolete_drops_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("keep.bin");
        let gone = dir.path().join("gone.bin");
        std::fs::write(&keep, b"keep").unwrap();
        std::fs::write(&gone, b"gone").unwrap();

        let catalog = Catalog::open(":memory:", Some(test_magic())).await.unwrap();
        let plugin = NonePlugin;
        scan(&catalog, &plugin, dir.path(), false).await.unwrap();
        std::fs::remove_file(&gone).unwrap();

        let report = scan(&catalog, &plugin, dir.path(), true).await.unwrap();
        assert_eq!(report.removed, 1);
        let remaining = catalog.all_src_paths().await.unwrap();
        assert_eq!(remaining, vec![keep.canonicalize().unwrap().to_string_lossy().into_owned()]);
    }
}
