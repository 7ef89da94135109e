//! Mount bootstrap — resolves the library, builds the synthetic root
//! attribute template, and hands the `LibfsFilesystem` to `fuser::mount2`.
//!
//! Grounded on `rgodha24-ghfs`'s `fs/mod.rs::GhFs::mount`, adapted to a
//! read/rename-only option set.

use std::path::Path;

use fuser::MountOption;
use tracing::info;

use crate::library::Library;
use crate::ops::LibfsFilesystem;

/// Opens `connection_string` as a `Library` under `view_name` and mounts it
/// read/rename-only at `mountpoint`. Blocks until the filesystem is
/// unmounted.
pub fn mount(
    rt: &tokio::runtime::Runtime,
    connection_string: &str,
    view_name: Option<&str>,
    mountpoint: &Path,
    debug_fuse: bool,
) -> anyhow::Result<()> {
    let library = rt.block_on(Library::open(connection_string, view_name))?;
    let mountpoint_meta = std::fs::metadata(mountpoint)?;

    let fs = LibfsFilesystem::new(std::sync::Arc::new(library), rt.handle().clone(), &mountpoint_meta);

    // Deliberately not `MountOption::RO`: that flag blocks every write-class
    // syscall at the kernel VFS layer before it ever reaches `Filesystem`,
    // which would take `rename` down with it. Content writes are refused one
    // layer up instead, at `open`'s `O_CREAT` check (`EROFS`) — grounded on
    // `operations.py::main`'s plain `llfuse.default_options` (no read-only
    // flag), not a read-only mount.
    let options = vec![
        MountOption::FSName("libfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    if debug_fuse {
        // `operations.py::main` adds libfuse's own `debug` option here,
        // which has no equivalent in `fuser`'s `MountOption`; trace-level
        // upcall logging (already emitted by every upcall, see `ops.rs`)
        // is the in-process analogue, so the caller is expected to pair
        // `--debug_fuse` with `RUST_LOG=libfs=trace` rather than a mount flag.
        tracing::debug!("debug_fuse requested: raise RUST_LOG to libfs=trace for upcall traces");
    }

    info!(mountpoint = %mountpoint.display(), "mounting");
    fuser::mount2(fs, mountpoint, &options)?;
    Ok(())
}
