//! The open library: catalog, current view, filename template and the
//! in-memory virtual-directory tree, composed the way
//! `business_logic.py::BusinessLogic` composes a `db_backend`, a view and a
//! metadata plugin into one object the operations layer drives.

use std::collections::HashMap;
use std::sync::Mutex;

use libfs_core::{LibfsError, View};
use libfs_storage::view::{disambiguate, FilenameTemplate, ViewTree};
use libfs_storage::{Catalog, MetadataPlugin};

use crate::cache::ROOT_INODE;

/// One listed entry of a virtual directory, already carrying everything
/// `getattr`/`readdir` need without a second catalog round-trip.
pub enum Entry {
    /// A virtual subdirectory, either materialized from the catalog or a
    /// not-yet-committed `mkdir`.
    Dir { vnode: u64, name: String },
    /// The mountpoint's own parent, reported back so `cd ..` from a mounted
    /// library's root leaves the library the way `ls -la` expects.
    MountpointParent,
    /// A leaf file, backed by a real path on the host filesystem.
    File {
        inode: u64,
        name: String,
        src_path: String,
    },
}

pub struct Library {
    catalog: Catalog,
    plugin: Box<dyn MetadataPlugin>,
    view: View,
    template: FilenameTemplate,
    tree: Mutex<ViewTree>,
    vdirs: Mutex<Vec<String>>,
}

fn vpath_segments(vpath: &str) -> Vec<String> {
    vpath
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl Library {
    pub async fn open(connection_string: &str, view_name: Option<&str>) -> Result<Self, LibfsError> {
        let catalog = Catalog::open(connection_string, None)
            .await
            .map_err(|e| LibfsError::Internal(e.to_string()))?;
        let plugin = libfs_storage::by_name(&catalog.magic.plugin)
            .ok_or_else(|| LibfsError::Internal(format!("unknown plugin {}", catalog.magic.plugin)))?;
        let view = match view_name {
            Some(name) => catalog
                .get_view(name)
                .await
                .map_err(|e| LibfsError::Internal(e.to_string()))?
                .ok_or_else(|| LibfsError::NotFound(format!("view {name} not found")))?,
            None => catalog.magic.default_view.clone(),
        };
        let template = FilenameTemplate::compile(&view.fn_gen)
            .map_err(|e| LibfsError::InvalidData(e.to_string()))?;

        let library = Self {
            catalog,
            plugin,
            view,
            template,
            tree: Mutex::new(ViewTree::build(&[])),
            vdirs: Mutex::new(Vec::new()),
        };
        library.rebuild_tree().await?;
        Ok(library)
    }

    pub fn max_dir_level(&self) -> usize {
        self.view.depth()
    }

    pub fn dirtree(&self) -> &[String] {
        &self.view.dirtree
    }

    /// `generate_vtree` — rebuilds the in-memory view tree from the
    /// catalog's current distinct dirtree tuples.
    pub async fn rebuild_tree(&self) -> Result<(), LibfsError> {
        let tuples = self
            .catalog
            .distinct_dirtree_tuples(&self.view.dirtree)
            .await
            .map_err(|e| LibfsError::Internal(e.to_string()))?;
        *self.tree.lock().unwrap() = ViewTree::build(&tuples);
        Ok(())
    }

    /// `is_vdir` — true if `vpath` names a virtual directory level (at or
    /// above `max_dir_level`'s boundary).
    pub fn is_vdir(&self, vpath: &str) -> bool {
        vpath_segments(vpath).len() <= self.max_dir_level()
    }

    /// `lookup_dir` — true only if every segment of `vpath` actually exists
    /// in the current view tree (ephemeral `mkdir` entries count).
    pub fn lookup_dir(&self, vpath: &str) -> bool {
        self.tree.lock().unwrap().seek(&vpath_segments(vpath)).is_some()
    }

    /// `get_dir_vnode` / the `get_vdir_inode` allocator: `"/"` is always the
    /// reserved root inode; every other distinct vpath gets a stable,
    /// monotonically increasing inode starting at `ROOT_INODE + 1`.
    pub fn get_dir_vnode(&self, vpath: &str) -> u64 {
        if vpath.is_empty() || vpath == "/" {
            return ROOT_INODE;
        }
        let mut vdirs = self.vdirs.lock().unwrap();
        if let Some(pos) = vdirs.iter().position(|p| p == vpath) {
            return ROOT_INODE + 1 + pos as u64;
        }
        vdirs.push(vpath.to_string());
        ROOT_INODE + vdirs.len() as u64
    }

    /// `get_key_of_vpath` — the dirtree column a path segment at this depth
    /// corresponds to.
    pub fn key_of_vpath(&self, vpath: &str) -> Option<&str> {
        let depth = vpath_segments(vpath).len();
        self.view.dirtree.get(depth).map(|s| s.as_str())
    }

    pub fn is_valid_metadata(&self, key: &str, value: &str) -> bool {
        self.plugin.is_valid_metadata(key, value)
    }

    /// `mkdir` — validates the new leaf segment against the plugin, then
    /// splices an ephemeral node into the in-memory tree. Not committed to
    /// the catalog until a file actually moves there.
    pub fn mkdir(&self, vpath: &str) -> Result<u64, LibfsError> {
        let segments = vpath_segments(vpath);
        let dir_level = segments.len().saturating_sub(1);
        let key = self
            .view
            .dirtree
            .get(dir_level)
            .ok_or_else(|| LibfsError::InvalidData("mkdir: path exceeds view depth".into()))?;
        let value = segments.last().expect("mkdir requires a non-empty path");
        if !self.plugin.is_valid_metadata(key, value) {
            return Err(LibfsError::InvalidData(format!(
                "{value} is not valid for key {key}"
            )));
        }
        self.tree
            .lock()
            .unwrap()
            .mkdir(&segments)
            .map_err(|e| LibfsError::InvalidData(e.to_string()))?;
        Ok(self.get_dir_vnode(vpath))
    }

    /// `rmdir` — removes an ephemeral (empty, not catalog-backed) directory
    /// node from the in-memory tree.
    pub fn rmdir(&self, vpath: &str) -> Result<(), LibfsError> {
        self.tree
            .lock()
            .unwrap()
            .rmdir(&vpath_segments(vpath))
            .map_err(|e| LibfsError::InvalidData(e.to_string()))
    }

    /// `update_column` — rewrites the catalog rows under a renamed
    /// directory, then rebuilds the tree so the rename is reflected.
    pub async fn rename_dir(&self, old_vpath: &str, new_vpath: &str) -> Result<(), LibfsError> {
        let old_segments = vpath_segments(old_vpath);
        let new_segments = vpath_segments(new_vpath);
        self.catalog
            .update_columns(&self.view.dirtree, &old_segments, &new_segments)
            .await
            .map_err(|e| LibfsError::Internal(e.to_string()))?;
        self.rebuild_tree().await
    }

    /// `get_vpath_dict` — maps every already-fixed path segment onto its
    /// dirtree column name.
    pub fn vpath_dict(&self, vpath: &str) -> HashMap<String, String> {
        vpath_segments(vpath)
            .into_iter()
            .enumerate()
            .filter_map(|(i, seg)| self.view.dirtree.get(i).map(|k| (k.clone(), seg)))
            .collect()
    }

    /// `get_metadata_from_gen_filename` — re-derives the catalog fields a
    /// proposed leaf filename encodes, rejecting names outside the current
    /// template.
    pub fn metadata_from_filename(&self, filename: &str) -> Result<HashMap<String, String>, LibfsError> {
        self.template
            .parse(filename)
            .map_err(|e| LibfsError::InvalidData(e.to_string()))
    }

    pub fn plugin(&self) -> &dyn MetadataPlugin {
        self.plugin.as_ref()
    }

    pub async fn remove_entry(&self, src_path: &str) -> Result<(), LibfsError> {
        self.catalog
            .remove_entry(src_path)
            .await
            .map_err(|e| LibfsError::Internal(e.to_string()))
    }

    pub async fn add_entry(
        &self,
        src_path: &str,
        src_inode: u64,
        metadata: &HashMap<String, String>,
    ) -> Result<(), LibfsError> {
        self.catalog
            .add_entry(src_path, src_inode, metadata)
            .await
            .map_err(|e| LibfsError::Internal(e.to_string()))
    }

    pub async fn src_path_by_inode(&self, inode: u64) -> Result<Option<String>, LibfsError> {
        self.catalog
            .get_src_path_by_inode(inode)
            .await
            .map_err(|e| LibfsError::Internal(e.to_string()))
    }

    /// The full catalog row backing a source path, needed by leaf rename to
    /// recover the unchanging `src_inode` before re-inserting under the new
    /// metadata.
    pub async fn row_by_src_path(
        &self,
        src_path: &str,
    ) -> Result<Option<libfs_core::CatalogRow>, LibfsError> {
        self.catalog
            .get_by_src_path(src_path)
            .await
            .map_err(|e| LibfsError::Internal(e.to_string()))
    }

    /// Rewrites every allocated vnode path carrying `old_prefix` onto
    /// `new_prefix`, keeping directory inode numbers stable across a
    /// directory rename the way `cache.py::update_maps` does for the
    /// identity cache. Matches at a path-segment boundary so a sibling
    /// directory that merely shares a string prefix (`Artist A` vs.
    /// `Artist AB`) is left untouched.
    pub fn rename_vdir_prefix(&self, old_prefix: &str, new_prefix: &str) {
        let mut vdirs = self.vdirs.lock().unwrap();
        for path in vdirs.iter_mut() {
            let rest = path
                .strip_prefix(old_prefix)
                .filter(|rest| rest.is_empty() || rest.starts_with('/'));
            if let Some(rest) = rest {
                *path = format!("{new_prefix}{rest}");
            }
        }
    }

    /// `get_contents_by_vpath` — the full readdir listing for `vpath`: `.`
    /// and `..`, then either the child virtual directories at this level, or
    /// (at the leaf) the generated, duplicate-disambiguated filenames for
    /// every catalog row under it.
    pub async fn contents(&self, vpath: &str) -> Result<Vec<Entry>, LibfsError> {
        let segments = vpath_segments(vpath);
        let dir_level = segments.len();
        let mut entries = Vec::new();

        entries.push(Entry::Dir {
            vnode: self.get_dir_vnode(vpath),
            name: ".".to_string(),
        });
        if dir_level > 0 {
            let parent = format!("/{}", segments[..segments.len() - 1].join("/"));
            entries.push(Entry::Dir {
                vnode: self.get_dir_vnode(&parent),
                name: "..".to_string(),
            });
        } else {
            entries.push(Entry::MountpointParent);
        }

        if dir_level == self.max_dir_level() {
            let rows = self
                .catalog
                .rows_matching(&self.view.dirtree, &segments)
                .await
                .map_err(|e| LibfsError::Internal(e.to_string()))?;
            let mut names = Vec::with_capacity(rows.len());
            for (inode, src_path) in &rows {
                let row = self
                    .catalog
                    .get_by_inode(*inode)
                    .await
                    .map_err(|e| LibfsError::Internal(e.to_string()))?
                    .ok_or_else(|| LibfsError::NotFound(src_path.clone()))?;
                names.push(self.template.format(&row.fields));
            }
            for ((inode, src_path), name) in rows.into_iter().zip(disambiguate(names)) {
                entries.push(Entry::File {
                    inode,
                    name,
                    src_path,
                });
            }
        } else {
            let children: Vec<String> = {
                let tree = self.tree.lock().unwrap();
                match tree.seek(&segments) {
                    Some(node) => tree.children(node).map(|s| s.to_string()).collect(),
                    None => Vec::new(),
                }
            };
            for child in children {
                let child_vpath = format!("{}/{}", vpath.trim_end_matches('/'), child);
                entries.push(Entry::Dir {
                    vnode: self.get_dir_vnode(&child_vpath),
                    name: child,
                });
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libfs_core::Magic;

    async fn test_library() -> Library {
        let magic = Magic {
            valid_keys: vec!["genre".into(), "artist".into()],
            default_view: View::new(
                vec!["genre".into(), "artist".into()],
                "%{title}".to_string(),
            ),
            plugin: "none".to_string(),
        };
        let catalog = libfs_storage::Catalog::open(":memory:", Some(magic))
            .await
            .unwrap();
        Library {
            plugin: libfs_storage::by_name("none").unwrap(),
            view: catalog.magic.default_view.clone(),
            template: FilenameTemplate::compile(&catalog.magic.default_view.fn_gen).unwrap(),
            catalog,
            tree: Mutex::new(ViewTree::build(&[])),
            vdirs: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn get_dir_vnode_is_stable_and_monotonic() {
        let library = test_library().await;
        let a = library.get_dir_vnode("/Rock");
        let b = library.get_dir_vnode("/Jazz");
        assert_eq!(library.get_dir_vnode("/Rock"), a);
        assert_ne!(a, b);
        assert_ne!(a, ROOT_INODE);
    }

    #[tokio::test]
    async fn rename_vdir_prefix_does_not_touch_sibling_with_shared_prefix() {
        let library = test_library().await;
        let renamed = library.get_dir_vnode("/Rock/Artist A");
        let sibling = library.get_dir_vnode("/Rock/Artist AB");

        library.rename_vdir_prefix("/Rock/Artist A", "/Rock/Artist Z");

        assert_eq!(library.get_dir_vnode("/Rock/Artist Z"), renamed);
        assert_eq!(library.get_dir_vnode("/Rock/Artist AB"), sibling);
    }
}
