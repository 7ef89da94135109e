//! Operations Layer — the `fuser::Filesystem` impl that answers kernel
//! upcalls against the `Library` (catalog + view engine) and the identity
//! `Cache`.
//!
//! Grounded method-for-method on `Libfs/operations.py::Operations`, using
//! the classic/stable `fuser` 0.15 API (raw `ino: u64`, raw `libc` errno
//! ints via `reply.error(..)`) the same way `rgodha24-ghfs`'s `fs/mod.rs`
//! does, rather than the newtype API `cberner-fuser`'s own source exposes.

use std::ffi::OsStr;
use std::fs::Metadata;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, Request,
};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::cache::{Cache, ROOT_INODE};
use crate::errno;
use crate::library::{Entry, Library};

/// Attribute TTL handed back to the kernel. Short, because a rename can
/// change any metadata-derived name at any time and the engine has no
/// invalidation channel back into the kernel's cache other than a short
/// lease.
const TTL: Duration = Duration::from_secs(1);

fn join_vpath(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn depth(vpath: &str) -> usize {
    vpath
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .count()
}

/// `open`'s `O_CREAT` veto: this filesystem never creates content, so any
/// open that would create a missing file is refused outright.
fn requests_create(flags: i32) -> bool {
    flags & libc::O_CREAT != 0
}

/// `rename`'s cross-depth precondition: the source and destination vpaths
/// must name the same tree level, or the rename is rejected before either
/// the catalog or the cache is touched.
fn is_cross_depth_rename(old_full: &str, new_full: &str) -> bool {
    depth(old_full) != depth(new_full)
}

fn metadata_to_attr(ino: u64, meta: &Metadata) -> FileAttr {
    use std::os::unix::fs::MetadataExt;

    let kind = if meta.is_dir() {
        FileType::Directory
    } else if meta.file_type().is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    };
    FileAttr {
        ino,
        size: meta.len(),
        blocks: meta.blocks(),
        atime: meta.accessed().unwrap_or(std::time::UNIX_EPOCH),
        mtime: meta.modified().unwrap_or(std::time::UNIX_EPOCH),
        ctime: std::time::UNIX_EPOCH + Duration::from_secs(meta.ctime().max(0) as u64),
        crtime: std::time::UNIX_EPOCH,
        kind,
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

/// The `fuser::Filesystem` implementation. Holds the open `Library`, the
/// identity cache, and a handle back into the tokio runtime the binary's
/// `main` created, so each synchronous upcall can drive the async
/// storage/catalog layer with `Handle::block_on`, matching single-worker
/// upcall serialization.
pub struct LibfsFilesystem {
    library: Arc<Library>,
    cache: Cache,
    rt: Handle,
    vdir_template: FileAttr,
}

impl LibfsFilesystem {
    pub fn new(library: Arc<Library>, rt: Handle, mountpoint_meta: &Metadata) -> Self {
        let vdir_template = metadata_to_attr(ROOT_INODE, mountpoint_meta);
        Self {
            library,
            cache: Cache::new(),
            rt,
            vdir_template,
        }
    }

    /// Stamps a synthetic directory attribute for `ino`, copying every
    /// field off the mountpoint's own stat except the inode number —
    /// mirrors `operations.py::_get_vdir_attr` copying `self.vdir_stat`.
    fn dir_attr(&self, ino: u64) -> FileAttr {
        FileAttr {
            ino,
            kind: FileType::Directory,
            ..self.vdir_template
        }
    }

    /// Lists `vpath` and folds every entry into the cache (child vnodes,
    /// leaf `(parent, name) -> src_path` hints), returning the rows a
    /// `readdir` reply streams back. Also used by `lookup`'s
    /// materialize-then-retry fallback on a leaf-hint cache miss.
    fn list_and_cache(
        &self,
        ino: u64,
        vpath: &str,
    ) -> Result<Vec<(u64, FileType, String)>, libfs_core::LibfsError> {
        let entries = self.rt.block_on(self.library.contents(vpath))?;
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                Entry::Dir { vnode, name } => {
                    if name != "." && name != ".." {
                        let child_vpath = join_vpath(vpath, &name);
                        self.cache.add_inode_path_pair(vnode, &child_vpath);
                    }
                    rows.push((vnode, FileType::Directory, name));
                }
                Entry::MountpointParent => {
                    rows.push((ROOT_INODE, FileType::Directory, "..".to_string()));
                }
                Entry::File {
                    inode,
                    name,
                    src_path,
                } => {
                    self.cache.set_leaf_hint(ino, &name, &src_path);
                    rows.push((inode, FileType::RegularFile, name));
                }
            }
        }
        Ok(rows)
    }
}

impl Filesystem for LibfsFilesystem {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        trace!(parent, name = name_str, "lookup");

        let parent_vpath = match self.cache.path_by_inode(parent) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let full = join_vpath(&parent_vpath, name_str);

        if self.library.is_vdir(&full) {
            if !self.library.lookup_dir(&full) {
                reply.error(libc::ENOENT);
                return;
            }
            let vnode = self.library.get_dir_vnode(&full);
            self.cache.add_inode_path_pair(vnode, &full);
            reply.entry(&TTL, &self.dir_attr(vnode), 0);
            return;
        }

        let src_path = match self.cache.leaf_hint(parent, name_str) {
            Some(p) => Some(p),
            None => {
                if let Err(e) = self.list_and_cache(parent, &parent_vpath) {
                    warn!(error = %e, "lookup: readdir fallback failed");
                }
                self.cache.leaf_hint(parent, name_str)
            }
        };
        let Some(src_path) = src_path else {
            reply.error(libc::ENOENT);
            return;
        };
        match std::fs::symlink_metadata(&src_path) {
            Ok(meta) => {
                let ino = {
                    use std::os::unix::fs::MetadataExt;
                    meta.ino()
                };
                let attr = metadata_to_attr(ino, &meta);
                self.cache.add_inode_path_pair(ino, &full);
                reply.entry(&TTL, &attr, 0);
            }
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.cache.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");
        if let Some(fd) = self.cache.fd_by_inode(ino) {
            let stat = self
                .cache
                .with_open_file(fd, |f| f.metadata())
                .and_then(|r| r.ok());
            if let Some(meta) = stat {
                reply.attr(&TTL, &metadata_to_attr(ino, &meta));
                return;
            }
        }

        if let Some(vpath) = self.cache.path_by_inode(ino) {
            if self.library.is_vdir(&vpath) {
                reply.attr(&TTL, &self.dir_attr(ino));
                return;
            }
        }

        match self.rt.block_on(self.library.src_path_by_inode(ino)) {
            Ok(Some(src_path)) => match std::fs::symlink_metadata(&src_path) {
                Ok(meta) => reply.attr(&TTL, &metadata_to_attr(ino, &meta)),
                Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
            },
            Ok(None) => reply.error(libc::ENOENT),
            Err(e) => reply.error(errno::from_libfs_error(&e)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.cache.path_by_inode(ino) {
            Some(vpath) if self.library.is_vdir(&vpath) => reply.opened(ino, 0),
            Some(_) => reply.error(libc::ENOTDIR),
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(ino, offset, "readdir");
        let vpath = match self.cache.path_by_inode(ino) {
            Some(v) => v,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let mut rows = match self.list_and_cache(ino, &vpath) {
            Ok(rows) => rows,
            Err(e) => {
                reply.error(errno::from_libfs_error(&e));
                return;
            }
        };
        rows.sort_by_key(|(entry_ino, _, _)| *entry_ino);

        for (entry_ino, kind, name) in rows {
            if entry_ino <= offset as u64 {
                continue;
            }
            if reply.add(entry_ino, entry_ino as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        let parent_vpath = match self.cache.path_by_inode(parent) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let full = join_vpath(&parent_vpath, name_str);
        if !self.library.is_vdir(&full) {
            reply.error(libc::ENOLINK);
            return;
        }
        match self.library.mkdir(&full) {
            Ok(vnode) => {
                self.cache.add_inode_path_pair(vnode, &full);
                reply.entry(&TTL, &self.dir_attr(vnode), 0);
            }
            Err(e) => reply.error(errno::from_libfs_error(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        let parent_vpath = match self.cache.path_by_inode(parent) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let full = join_vpath(&parent_vpath, name_str);
        if !self.library.is_vdir(&full) {
            reply.error(libc::ENOLINK);
            return;
        }
        let vnode = self.library.get_dir_vnode(&full);
        match self.library.rmdir(&full) {
            Ok(()) => {
                self.cache.forget_path(vnode);
                self.cache.clear_leaf_hints(vnode);
                reply.ok();
            }
            Err(e) => reply.error(errno::from_libfs_error(&e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(name_str), Some(newname_str)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let (Some(old_parent_vpath), Some(new_parent_vpath)) = (
            self.cache.path_by_inode(parent),
            self.cache.path_by_inode(newparent),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        let old_full = join_vpath(&old_parent_vpath, name_str);
        let new_full = join_vpath(&new_parent_vpath, newname_str);

        if old_full == new_full {
            reply.error(libc::EINVAL);
            return;
        }
        if is_cross_depth_rename(&old_full, &new_full) {
            reply.error(errno::EADDRNOTAVAIL);
            return;
        }

        if self.library.is_vdir(&old_full) {
            self.rename_directory(&old_parent_vpath, &old_full, newname_str, &new_full, reply);
        } else {
            self.rename_leaf(
                parent,
                name_str,
                newparent,
                newname_str,
                &new_parent_vpath,
                &new_full,
                reply,
            );
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if requests_create(flags) {
            reply.error(libc::EROFS);
            return;
        }
        if let Some(fd) = self.cache.open_existing(ino) {
            reply.opened(fd, 0);
            return;
        }
        let src_path = match self.rt.block_on(self.library.src_path_by_inode(ino)) {
            Ok(Some(p)) => p,
            Ok(None) => {
                reply.error(libc::ENOENT);
                return;
            }
            Err(e) => {
                reply.error(errno::from_libfs_error(&e));
                return;
            }
        };
        match std::fs::File::open(&src_path) {
            Ok(file) => {
                let fd = self.cache.register_open(ino, file);
                reply.opened(fd, 0);
            }
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        use std::io::{Read, Seek, SeekFrom};

        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let result = self.cache.with_open_file(fh, |file| -> std::io::Result<Vec<u8>> {
            file.seek(SeekFrom::Start(offset as u64))?;
            let mut buf = vec![0u8; size as usize];
            let n = file.read(&mut buf)?;
            buf.truncate(n);
            Ok(buf)
        });
        match result {
            Some(Ok(buf)) => reply.data(&buf),
            Some(Err(e)) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
            None => reply.error(libc::EBADF),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.cache.release(fh);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        // Placeholder non-zero totals so tools like `df`
        // display a populated row instead of erroring on ENOSYS.
        reply.statfs(1_000_000, 500_000, 500_000, 1_000_000, 500_000, 512, 255, 512);
    }
}

impl LibfsFilesystem {
    fn rename_directory(
        &self,
        old_parent_vpath: &str,
        old_full: &str,
        newname: &str,
        new_full: &str,
        reply: ReplyEmpty,
    ) {
        let Some(key) = self.library.key_of_vpath(old_parent_vpath).map(str::to_string) else {
            reply.error(libc::EINVAL);
            return;
        };
        if !self.library.is_valid_metadata(&key, newname) {
            reply.error(libc::EINVAL);
            return;
        }
        match self.rt.block_on(self.library.rename_dir(old_full, new_full)) {
            Ok(()) => {
                self.library.rename_vdir_prefix(old_full, new_full);
                self.cache.update_maps(old_full, new_full);
                debug!(old_full, new_full, "renamed directory");
                reply.ok();
            }
            Err(e) => reply.error(errno::from_libfs_error(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rename_leaf(
        &self,
        parent: u64,
        name: &str,
        newparent: u64,
        newname: &str,
        new_parent_vpath: &str,
        new_full: &str,
        reply: ReplyEmpty,
    ) {
        let src_path = match self.cache.leaf_hint(parent, name) {
            Some(p) => p,
            None => match self.list_and_cache(parent, new_parent_vpath) {
                Ok(_) => match self.cache.leaf_hint(parent, name) {
                    Some(p) => p,
                    None => {
                        reply.error(libc::ENOENT);
                        return;
                    }
                },
                Err(e) => {
                    reply.error(errno::from_libfs_error(&e));
                    return;
                }
            },
        };

        let filename_fields = match self.library.metadata_from_filename(newname) {
            Ok(m) => m,
            Err(e) => {
                reply.error(errno::from_libfs_error(&e));
                return;
            }
        };
        let mut target = self.library.vpath_dict(new_parent_vpath);
        target.extend(filename_fields);

        if let Err(e) = self
            .library
            .plugin()
            .write_metadata(Path::new(&src_path), &target)
        {
            reply.error(errno::from_storage_error(&e));
            return;
        }

        let row = match self.rt.block_on(self.library.row_by_src_path(&src_path)) {
            Ok(Some(row)) => row,
            Ok(None) => {
                reply.error(libc::EIO);
                return;
            }
            Err(e) => {
                reply.error(errno::from_libfs_error(&e));
                return;
            }
        };

        let result: Result<(), libfs_core::LibfsError> = (|| {
            self.rt.block_on(self.library.remove_entry(&src_path))?;
            self.rt
                .block_on(self.library.add_entry(&src_path, row.src_inode, &target))?;
            self.rt.block_on(self.library.rebuild_tree())
        })();
        if let Err(e) = result {
            reply.error(errno::from_libfs_error(&e));
            return;
        }

        self.cache.update_inode_path_pair(row.src_inode, new_full);
        self.cache.remove_leaf_hint(parent, name);
        self.cache
            .set_leaf_hint(newparent, newname, &src_path);
        debug!(src_path, new_full, "renamed leaf");
        reply.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_vpath_handles_root_and_nested_parents() {
        assert_eq!(join_vpath("/", "Rock"), "/Rock");
        assert_eq!(join_vpath("/Rock", "Artist A"), "/Rock/Artist A");
    }

    #[test]
    fn depth_counts_non_empty_segments() {
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/Rock/Artist A"), 2);
    }

    #[test]
    fn requests_create_detects_o_creat_only() {
        assert!(requests_create(libc::O_CREAT));
        assert!(requests_create(libc::O_RDWR | libc::O_CREAT));
        assert!(!requests_create(libc::O_RDONLY));
    }

    #[test]
    fn is_cross_depth_rename_rejects_depth_mismatch_only() {
        assert!(is_cross_depth_rename("/Rock/Artist A", "/Rock/Artist A/Extra"));
        assert!(!is_cross_depth_rename("/Rock/Artist A", "/Jazz/Artist B"));
    }
}
